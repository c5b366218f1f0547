//! # frameflow: pull-driven dataflow for image pipelines
//!
//! A pipeline is a graph of processing nodes. Sources either hold a static
//! value or run a producer thread that feeds a stream buffer; compute nodes
//! transform what they receive; callers pull results by updating a node or
//! reading a [`pipeline::Subscription`].
//!
//! ## Architecture
//!
//! - **Context**: [`ExecutionContext`] owns the logical clock, configuration
//!   and the stop signal shared by every buffer and thread of a pipeline
//! - **Streams**: [`pipeline::StreamBuffer`] with three retention modes
//!   (newest frame only, process all frames, store all frames)
//! - **Execution**: [`Pipeline::update`] re-runs a node only when it or one
//!   of its inputs changed
//! - **Synchronizers**: pair up streams running at different rates
//!
//! ## Configuration
//!
//! Engine defaults are read from `frameflow.toml` in the platform config
//! directory under `dev.hxyulin.frameflow`:
//!
//! - **Linux**: `~/.config/dev.hxyulin.frameflow/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.frameflow/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.frameflow\`
//!
//! ## Example
//!
//! ```no_run
//! use frameflow::pipeline::{DataObject, FnNode, ManualStreamer, PayloadKind, StreamSource};
//! use frameflow::{EngineConfig, ExecutionContext, Pipeline, StreamingMode};
//!
//! fn main() -> frameflow::Result<()> {
//!     let config = EngineConfig::load_default_location();
//!     let _guard = frameflow::logging::init(&config.logging)?;
//!
//!     let ctx = ExecutionContext::new(config);
//!     let mut pipeline = Pipeline::new(ctx.clone());
//!
//!     let frames = (0..10).map(|i| DataObject::scalar(i as f64)).collect();
//!     let source = pipeline.add_node(StreamSource::new(
//!         &ctx,
//!         StreamingMode::ProcessAllFrames,
//!         ManualStreamer::new(frames),
//!     ))?;
//!     let double = pipeline.add_node(FnNode::map("double", PayloadKind::Scalar, PayloadKind::Scalar, |f| {
//!         Ok(DataObject::scalar(f.as_scalar().unwrap_or_default() * 2.0))
//!     }))?;
//!     pipeline.connect(source, 0, double, 0)?;
//!
//!     while pipeline.update(double)? {}
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod pipeline;

// Re-export commonly used types
pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use error::{FlowError, Result, ResultExt};
pub use pipeline::{DataObject, NodeId, Pipeline, StopHandle, StreamBuffer, StreamingMode};
