//! Boundary between a pipeline and the code that reads its results.
//!
//! [`Subscription`] is an external consumer of one output port, with its
//! own cursor on stream outputs. The snapshot types describe the graph in a
//! serialisable form for logging or tooling.

use crate::error::Result;
use crate::pipeline::data::FrameRef;
use crate::pipeline::executor::ExecutionTiming;
use crate::pipeline::id::{ConsumerId, EdgeId, NodeId};
use crate::pipeline::output::OutputSlot;
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::stream::{FramePoll, StreamStats};
use serde::Serialize;

/// Reader handle returned by `Pipeline::subscribe`.
///
/// On a stream output it behaves like any other consumer of the buffer: a
/// ProcessAllFrames producer waits for it, so a subscription that is never
/// read holds the stream back. Dropping it releases its cursor.
#[derive(Debug)]
pub struct Subscription {
    node: NodeId,
    port: usize,
    output: OutputSlot,
    consumer: ConsumerId,
}

impl Subscription {
    pub(crate) fn new(node: NodeId, port: usize, output: OutputSlot, consumer: ConsumerId) -> Self {
        if let OutputSlot::Stream(buffer) = &output {
            buffer.register_consumer(consumer);
        }
        Self {
            node,
            port,
            output,
            consumer,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn port(&self) -> usize {
        self.port
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    pub fn is_stream(&self) -> bool {
        self.output.is_stream()
    }

    /// Blocking read of the next frame. `None` once a lossless stream has
    /// ended and this subscription has seen all of it. Static outputs return
    /// their current value.
    ///
    /// A NewestFrameOnly stream keeps handing out its latest frame, even
    /// after the producer ended, so `while let Some(..)` never terminates on
    /// one. Check [`has_reached_end`](Self::has_reached_end) or use
    /// [`try_next_frame`](Self::try_next_frame) there.
    pub fn next_frame(&self) -> Result<Option<FrameRef>> {
        match &self.output {
            OutputSlot::Static(slot) => Ok(slot.current()),
            OutputSlot::Stream(buffer) => buffer.next_frame(self.consumer),
        }
    }

    pub fn try_next_frame(&self) -> Result<FramePoll> {
        match &self.output {
            OutputSlot::Static(slot) => Ok(slot.current().map_or(FramePoll::Pending, FramePoll::Ready)),
            OutputSlot::Stream(buffer) => buffer.try_next_frame(self.consumer),
        }
    }

    /// Newest value without consuming it.
    pub fn latest(&self) -> Option<FrameRef> {
        self.output.latest()
    }

    /// Whether the stream is over for this subscription. On ProcessAllFrames
    /// streams that also waits for every other consumer. Static outputs
    /// never end.
    pub fn has_reached_end(&self) -> bool {
        match &self.output {
            OutputSlot::Static(_) => false,
            OutputSlot::Stream(buffer) => buffer.has_reached_end(self.consumer),
        }
    }

    pub fn stats(&self) -> Option<StreamStats> {
        self.output.as_stream().map(|buffer| buffer.stats())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let OutputSlot::Stream(buffer) = &self.output {
            buffer.unregister_consumer(self.consumer);
        }
    }
}

/// Snapshot of a single pipeline node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub ports: Vec<PortDescriptor>,
    pub modified: bool,
    pub execution_count: u64,
    pub timing: ExecutionTiming,
    /// Stats of every stream output, in output order.
    pub streams: Vec<StreamStats>,
}

/// Snapshot of a single pipeline edge.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeSnapshot {
    pub id: EdgeId,
    pub from_node: NodeId,
    pub from_port: usize,
    pub to_node: NodeId,
    pub to_port: usize,
}

/// Complete topology snapshot of the pipeline graph.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl TopologySnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
