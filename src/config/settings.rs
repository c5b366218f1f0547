//! Tunable settings grouped by concern
//!
//! # Main Types
//!
//! - [`StreamSettings`] - Defaults applied to newly created stream buffers
//! - [`RuntimeSettings`] - Producer task and synchronizer timing
//! - [`LoggingConfig`] - Tracing filter and optional file output

use crate::pipeline::stream::StreamingMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of frames a ProcessAllFrames buffer may hold
pub const DEFAULT_STREAM_CAPACITY: usize = 50;

/// Defaults for stream buffers created by stream sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Mode used when a stream source does not choose one
    #[serde(default)]
    pub default_mode: StreamingMode,

    /// Bound on retained frames for ProcessAllFrames
    #[serde(default = "default_capacity")]
    pub default_capacity: usize,

    /// Maximum retained frames for StoreAllFrames (0 = unbounded)
    #[serde(default)]
    pub store_all_limit: usize,
}

fn default_capacity() -> usize {
    DEFAULT_STREAM_CAPACITY
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            default_mode: StreamingMode::default(),
            default_capacity: DEFAULT_STREAM_CAPACITY,
            store_all_limit: 0,
        }
    }
}

impl StreamSettings {
    /// Capacity a buffer of `mode` gets when nothing overrides it
    pub fn capacity_for(&self, mode: StreamingMode) -> usize {
        match mode {
            StreamingMode::NewestFrameOnly => 1,
            StreamingMode::ProcessAllFrames => self.default_capacity.max(1),
            StreamingMode::StoreAllFrames => self.store_all_limit,
        }
    }
}

/// Timing for background tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// How long `stop` waits for a producer thread before detaching it, in milliseconds
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Delay between frames for generators that don't set their own, in milliseconds
    #[serde(default)]
    pub default_frame_interval_ms: u64,

    /// Slice used by synchronizer readers between checks of their stop flag, in milliseconds
    #[serde(default = "default_sync_wait_slice_ms")]
    pub sync_wait_slice_ms: u64,
}

fn default_sync_wait_slice_ms() -> u64 {
    10
}

fn default_join_timeout_ms() -> u64 {
    2000
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            join_timeout_ms: default_join_timeout_ms(),
            default_frame_interval_ms: 0,
            sync_wait_slice_ms: default_sync_wait_slice_ms(),
        }
    }
}

impl RuntimeSettings {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn default_frame_interval(&self) -> Duration {
        Duration::from_millis(self.default_frame_interval_ms)
    }

    pub fn sync_wait_slice(&self) -> Duration {
        Duration::from_millis(self.sync_wait_slice_ms.max(1))
    }
}

/// Logging configuration consumed by [`crate::logging::init`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Directory for daily rolling log files; stdout only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Prefix for rolling log file names
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_filter() -> String {
    "frameflow=info".to_string()
}

fn default_file_prefix() -> String {
    "frameflow.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}
