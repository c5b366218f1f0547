//! Test data builders for creating test nodes

use frameflow::pipeline::{DataObject, FnNode, FrameRef, PayloadKind, PortDescriptor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Frames read per execution, one entry per input
pub type Seen = Arc<Mutex<Vec<Vec<FrameRef>>>>;

/// Builder for compute nodes that count their executions and record what they read
pub struct RecorderBuilder {
    name: String,
    inputs: usize,
    output: bool,
    runs: Arc<AtomicUsize>,
    seen: Seen,
}

impl RecorderBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inputs: 1,
            output: false,
            runs: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inputs(mut self, inputs: usize) -> Self {
        self.inputs = inputs;
        self
    }

    /// Forward the first input on a static output
    pub fn with_output(mut self) -> Self {
        self.output = true;
        self
    }

    pub fn runs(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }

    pub fn seen(&self) -> Seen {
        self.seen.clone()
    }

    pub fn build(self) -> FnNode {
        let mut ports: Vec<PortDescriptor> = (0..self.inputs)
            .map(|i| {
                PortDescriptor::named(
                    format!("in{}", i),
                    frameflow::pipeline::PortDirection::Input,
                    PayloadKind::Any,
                )
            })
            .collect();
        if self.output {
            ports.push(PortDescriptor::output("out", PayloadKind::Any));
        }

        let inputs = self.inputs;
        let output = self.output;
        let runs = self.runs;
        let seen = self.seen;
        FnNode::new(self.name, ports, move |ctx| {
            runs.fetch_add(1, Ordering::SeqCst);
            let mut frames = Vec::with_capacity(inputs);
            for port in 0..inputs {
                frames.push(ctx.input(port)?);
            }
            if output {
                if let Some(first) = frames.first() {
                    ctx.publish(0, DataObject::clone(first.data()))?;
                }
            }
            seen.lock().push(frames);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_builder() {
        let builder = RecorderBuilder::new("recorder").inputs(2).with_output();
        let runs = builder.runs();
        let node = builder.build();

        assert_eq!(node.name(), "recorder");
        assert_eq!(node.ports().len(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
