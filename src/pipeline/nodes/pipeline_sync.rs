//! PipelineSynchronizer: exposes the newest frame of several inputs at once.
//!
//! Output `i` mirrors input `i`. Each run takes whatever is newest on every
//! input without blocking; an input with nothing new keeps its previous
//! frame on the output, so fast producers always show their latest frame
//! next to the last known frame of slow ones.

use crate::error::Result;
use crate::pipeline::data::{FrameRef, PayloadKind};
use crate::pipeline::node::NodeContext;
use crate::pipeline::port::{PortDescriptor, PortDirection};
use crate::pipeline::stream::FramePoll;

pub struct PipelineSynchronizer {
    ports: Vec<PortDescriptor>,
    inputs: usize,
}

impl PipelineSynchronizer {
    pub fn new(inputs: usize) -> Self {
        let mut ports = Vec::with_capacity(inputs * 2);
        for i in 0..inputs {
            ports.push(
                PortDescriptor::named(format!("in{}", i), PortDirection::Input, PayloadKind::Any)
                    .optional(),
            );
        }
        for i in 0..inputs {
            ports.push(PortDescriptor::named(
                format!("out{}", i),
                PortDirection::Output,
                PayloadKind::Any,
            ));
        }
        Self { ports, inputs }
    }

    pub fn name(&self) -> &str {
        "PipelineSynchronizer"
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    /// Drain everything pending on `port` and keep the newest frame.
    fn newest(ctx: &NodeContext, port: usize) -> Result<Option<FrameRef>> {
        let is_stream = ctx.input_stream(port).is_some();
        let mut newest = None;
        while let FramePoll::Ready(frame) = ctx.poll_input(port)? {
            newest = Some(frame);
            if !is_stream {
                break;
            }
        }
        Ok(newest)
    }

    pub fn execute(&mut self, ctx: &mut NodeContext) -> Result<()> {
        for port in 0..self.inputs {
            if !ctx.is_connected(port) {
                continue;
            }
            match Self::newest(ctx, port)? {
                Some(frame) => ctx.publish_frame(port, frame)?,
                None => {
                    tracing::trace!(
                        "PipelineSynchronizer {}: input {} has nothing new",
                        ctx.node_id(),
                        port
                    );
                }
            }
        }
        Ok(())
    }
}
