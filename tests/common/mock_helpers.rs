//! Frame and generator helpers

use frameflow::pipeline::{DataObject, ManualStreamer};
use frameflow::{EngineConfig, ExecutionContext, StreamingMode};
use std::time::Duration;

/// Frames carrying their own sequence number as a scalar payload
pub fn scalar_frames(count: usize) -> Vec<DataObject> {
    (0..count).map(|i| DataObject::scalar(i as f64)).collect()
}

/// A finite streamer over `count` numbered frames
pub fn numbered_streamer(count: usize, interval: Duration) -> ManualStreamer {
    ManualStreamer::new(scalar_frames(count)).with_sleep_time(interval)
}

/// Context whose streams default to `mode` with the given capacity
pub fn context_with(mode: StreamingMode, capacity: usize) -> ExecutionContext {
    let mut config = EngineConfig::default();
    config.stream.default_mode = mode;
    config.stream.default_capacity = capacity;
    config.runtime.join_timeout_ms = 1000;
    ExecutionContext::new(config)
}
