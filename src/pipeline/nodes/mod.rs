//! Built-in pipeline node implementations.

pub mod compute;
pub mod framerate_sync;
pub mod manual_streamer;
pub mod pipeline_sync;
pub mod static_source;
pub mod stream_source;

pub use compute::FnNode;
pub use framerate_sync::FramerateSynchronizer;
pub use manual_streamer::ManualStreamer;
pub use pipeline_sync::PipelineSynchronizer;
pub use static_source::StaticSource;
pub use stream_source::StreamSource;
