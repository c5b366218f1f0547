//! Port descriptors for the node system.
//!
//! Each node declares its ports (inputs/outputs) via `PortDescriptor` lists.
//! The pipeline uses these to validate connections once, when the edge is
//! built; execution never re-checks payload types.

use crate::error::{FlowError, Result};
use crate::pipeline::data::PayloadKind;
use crate::pipeline::stream::StreamingMode;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Whether data on a port is produced once or continuously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFlow {
    /// One value per execution, replaced on recompute.
    Static,
    /// A stream buffer fed by a producer task.
    Stream,
    /// Input ports only: accepts either flow.
    Any,
}

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Descriptor for a node's port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub name: Cow<'static, str>,
    pub direction: PortDirection,
    pub kind: PayloadKind,
    pub flow: DataFlow,
    /// Inputs only: execution fails with `MissingInput` when unbound.
    pub required: bool,
    /// Stream outputs the pipeline allocates: retention mode of the buffer.
    /// `None` uses the configured default mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<StreamingMode>,
}

impl PortDescriptor {
    /// Required input accepting static or streamed data.
    pub const fn input(name: &'static str, kind: PayloadKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            direction: PortDirection::Input,
            kind,
            flow: DataFlow::Any,
            required: true,
            mode: None,
        }
    }

    /// Static output.
    pub const fn output(name: &'static str, kind: PayloadKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            direction: PortDirection::Output,
            kind,
            flow: DataFlow::Static,
            required: false,
            mode: None,
        }
    }

    /// Output backed by a stream buffer.
    pub const fn stream_output(name: &'static str, kind: PayloadKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            direction: PortDirection::Output,
            kind,
            flow: DataFlow::Stream,
            required: false,
            mode: None,
        }
    }

    /// Port with a runtime-built name, e.g. the n-th synchronizer input.
    pub fn named(name: String, direction: PortDirection, kind: PayloadKind) -> Self {
        let (flow, required) = match direction {
            PortDirection::Input => (DataFlow::Any, true),
            PortDirection::Output => (DataFlow::Static, false),
        };
        Self {
            name: Cow::Owned(name),
            direction,
            kind,
            flow,
            required,
            mode: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_flow(mut self, flow: DataFlow) -> Self {
        self.flow = flow;
        self
    }

    /// Turn an output into a stream output with its own retention mode.
    pub fn with_mode(mut self, mode: StreamingMode) -> Self {
        self.flow = DataFlow::Stream;
        self.mode = Some(mode);
        self
    }

    #[inline]
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    #[inline]
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// Validate that `output` may feed `input`.
pub fn check_connection(output: &PortDescriptor, input: &PortDescriptor) -> Result<()> {
    if !output.is_output() {
        return Err(FlowError::PortMismatch(format!(
            "'{}' is not an output port",
            output.name
        )));
    }
    if !input.is_input() {
        return Err(FlowError::PortMismatch(format!(
            "'{}' is not an input port",
            input.name
        )));
    }
    if !input.kind.accepts(output.kind) {
        return Err(FlowError::PortMismatch(format!(
            "output '{}' produces {} but input '{}' expects {}",
            output.name, output.kind, input.name, input.kind
        )));
    }
    let flows_match = input.flow == DataFlow::Any || input.flow == output.flow;
    if !flows_match {
        return Err(FlowError::PortMismatch(format!(
            "output '{}' is {:?} but input '{}' requires {:?}",
            output.name, output.flow, input.name, input.flow
        )));
    }
    Ok(())
}
