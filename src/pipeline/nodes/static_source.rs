//! StaticSource: holds one data object and publishes it on a static output.
//!
//! The value only changes when the pipeline replaces it through
//! `Pipeline::set_static_data`, which also marks the node modified so
//! dependents recompute on their next update.

use crate::error::{FlowError, Result};
use crate::pipeline::data::{DataObject, PayloadKind};
use crate::pipeline::node::NodeContext;
use crate::pipeline::port::PortDescriptor;

pub struct StaticSource {
    ports: [PortDescriptor; 1],
    data: Option<DataObject>,
}

impl StaticSource {
    /// Source with no value yet. Executing it before `set_data` fails.
    pub fn empty(kind: PayloadKind) -> Self {
        Self {
            ports: [PortDescriptor::output("data", kind)],
            data: None,
        }
    }

    pub fn new(data: DataObject) -> Self {
        let mut source = Self::empty(data.kind());
        source.data = Some(data);
        source
    }

    pub fn name(&self) -> &str {
        "StaticSource"
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn data(&self) -> Option<&DataObject> {
        self.data.as_ref()
    }

    /// Replace the stored value. The payload kind must match the output port.
    pub fn set_data(&mut self, data: DataObject) -> Result<()> {
        let kind = self.ports[0].kind;
        if !kind.accepts(data.kind()) {
            return Err(FlowError::PortMismatch(format!(
                "static source declared {} but was given {}",
                kind,
                data.kind()
            )));
        }
        self.data = Some(data);
        Ok(())
    }

    pub fn execute(&mut self, ctx: &mut NodeContext) -> Result<()> {
        let data = self.data.clone().ok_or_else(|| {
            FlowError::InvalidState(format!("static source {} has no data", ctx.node_id()))
        })?;
        ctx.publish(0, data)
    }
}
