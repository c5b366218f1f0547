//! Output slots and input bindings.
//!
//! Every output port of a node owns an [`OutputSlot`]: either a static cell
//! holding the value of the last execution, or a stream buffer fed by a
//! producer task. Every connected input port holds an [`InputBinding`] that
//! names the upstream output and remembers the last timestamp it observed.

use crate::pipeline::data::FrameRef;
use crate::pipeline::id::{ConsumerId, EdgeId, NodeId};
use crate::pipeline::stream::StreamBuffer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Value cell behind a static output port.
#[derive(Debug, Default)]
pub struct StaticSlot {
    value: Mutex<Option<FrameRef>>,
    timestamp: AtomicU64,
    publishes: AtomicU64,
}

impl StaticSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, if the owning node ever published one.
    pub fn current(&self) -> Option<FrameRef> {
        self.value.lock().clone()
    }

    /// Replace the current value. Returns the publish count.
    pub fn set(&self, frame: FrameRef) -> u64 {
        *self.value.lock() = Some(frame);
        self.publishes.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of values published so far.
    pub fn publishes(&self) -> u64 {
        self.publishes.load(Ordering::Acquire)
    }

    /// Timestamp of the last execution that touched this slot (0 = never).
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    pub fn touch(&self, timestamp: u64) {
        self.timestamp.store(timestamp, Ordering::Release);
    }
}

/// Storage behind one output port.
#[derive(Debug, Clone)]
pub enum OutputSlot {
    Static(Arc<StaticSlot>),
    Stream(Arc<StreamBuffer>),
}

impl OutputSlot {
    pub fn new_static() -> Self {
        OutputSlot::Static(Arc::new(StaticSlot::new()))
    }

    /// Timestamp of this output as observed by `consumer`.
    pub fn timestamp_for(&self, consumer: ConsumerId) -> u64 {
        match self {
            OutputSlot::Static(slot) => slot.timestamp(),
            OutputSlot::Stream(buffer) => buffer.timestamp_for(consumer),
        }
    }

    /// Most recent value without consuming anything.
    pub fn latest(&self) -> Option<FrameRef> {
        match self {
            OutputSlot::Static(slot) => slot.current(),
            OutputSlot::Stream(buffer) => buffer.latest_frame(),
        }
    }

    pub fn as_stream(&self) -> Option<&Arc<StreamBuffer>> {
        match self {
            OutputSlot::Stream(buffer) => Some(buffer),
            OutputSlot::Static(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, OutputSlot::Stream(_))
    }
}

/// A connected input port: which upstream output feeds it and the last
/// timestamp this port observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBinding {
    pub edge: EdgeId,
    pub upstream: NodeId,
    pub output: usize,
    pub consumer: ConsumerId,
    pub cursor: u64,
}

/// Read side of an input port, handed to a compute body.
#[derive(Debug, Clone)]
pub struct InputSource {
    pub output: OutputSlot,
    pub consumer: ConsumerId,
}
