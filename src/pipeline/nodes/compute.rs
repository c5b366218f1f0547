//! FnNode: a compute node backed by a closure.

use crate::error::Result;
use crate::pipeline::data::{DataObject, FrameRef, PayloadKind};
use crate::pipeline::node::NodeContext;
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::stream::StreamingMode;

type ComputeFn = Box<dyn FnMut(&mut NodeContext) -> Result<()> + Send>;

pub struct FnNode {
    name: String,
    ports: Vec<PortDescriptor>,
    body: ComputeFn,
}

impl FnNode {
    pub fn new(
        name: impl Into<String>,
        ports: Vec<PortDescriptor>,
        body: impl FnMut(&mut NodeContext) -> Result<()> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            ports,
            body: Box::new(body),
        }
    }

    /// One input, one static output: `f` maps the input frame to a new object.
    pub fn map(
        name: impl Into<String>,
        input: PayloadKind,
        output: PayloadKind,
        mut f: impl FnMut(&FrameRef) -> Result<DataObject> + Send + 'static,
    ) -> Self {
        Self::new(
            name,
            vec![
                PortDescriptor::input("in", input),
                PortDescriptor::output("out", output),
            ],
            move |ctx| {
                let frame = ctx.input(0)?;
                let data = f(&frame)?;
                ctx.publish(0, data)
            },
        )
    }

    /// Turn every output into a stream with the given retention mode.
    ///
    /// Each downstream connection then reads through its own cursor, so
    /// several consumers of a ProcessAllFrames output all see every frame.
    pub fn streaming(mut self, mode: StreamingMode) -> Self {
        for port in self.ports.iter_mut().filter(|p| p.is_output()) {
            *port = port.clone().with_mode(mode);
        }
        self
    }

    /// One input, no outputs: `f` observes every frame the node is given.
    pub fn sink(
        name: impl Into<String>,
        input: PayloadKind,
        mut f: impl FnMut(&FrameRef) -> Result<()> + Send + 'static,
    ) -> Self {
        Self::new(name, vec![PortDescriptor::input("in", input)], move |ctx| {
            let frame = ctx.input(0)?;
            f(&frame)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn execute(&mut self, ctx: &mut NodeContext) -> Result<()> {
        (self.body)(ctx)
    }
}
