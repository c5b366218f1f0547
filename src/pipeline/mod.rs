//! Node-based dataflow pipeline.
//!
//! Data flows through typed nodes from sources (static values or live
//! streams) through compute nodes to whoever reads the results. Nothing
//! runs until a node is updated: `Pipeline::update` pulls from upstream and
//! re-executes only what changed.
//!
//! # Architecture
//!
//! ```text
//! [StaticSource] ─────────────────────┐
//!                                      ├──► [FnNode] ──► Subscription
//! [StreamSource] ══► StreamBuffer ═════┘
//!      ▲ producer thread
//! ```
//!
//! # Design
//!
//! - **Enum dispatch**: `BuiltinNode` enum for built-in nodes, `NodePlugin` for the rest.
//! - **Arena graph**: nodes live in a `Vec` and are addressed by `NodeId`.
//! - **Logical clock**: every publish is stamped by the `ExecutionContext`;
//!   an input changed when the stamp it observes changed.
//! - **Stream buffers**: one producer thread per stream, consumers read
//!   through their own cursor under the mode's backpressure rule.

pub mod bridge;
pub mod data;
pub mod executor;
pub mod id;
pub mod node;
pub mod nodes;
pub mod output;
pub mod port;
pub mod runtime;
pub mod stream;

pub use bridge::{EdgeSnapshot, NodeSnapshot, Subscription, TopologySnapshot};
pub use data::{DataObject, FrameRef, ImageFrame, MeshData, Payload, PayloadKind, Transform3};
pub use executor::{Edge, Pipeline, StopHandle};
pub use id::{ConsumerId, EdgeId, NodeId};
pub use node::{AnyNode, BuiltinNode, InputStream, NodeContext, NodePlugin};
pub use nodes::{
    FnNode, FramerateSynchronizer, ManualStreamer, PipelineSynchronizer, StaticSource,
    StreamSource,
};
pub use output::{InputBinding, OutputSlot, StaticSlot};
pub use port::{DataFlow, PortDescriptor, PortDirection};
pub use runtime::{FrameGenerator, StreamTask, TaskState};
pub use stream::{AddOutcome, Backpressure, FramePoll, StreamBuffer, StreamPhase, StreamStats, StreamingMode};
