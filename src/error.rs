//! Error handling for frameflow
//!
//! This module defines the engine's error taxonomy and a Result alias for use
//! throughout the crate. "No new data yet" is never an error: non-blocking
//! reads report it through [`crate::pipeline::FramePoll::Pending`].

use crate::pipeline::id::NodeId;
use thiserror::Error;

/// Main error type for frameflow operations
#[derive(Error, Debug)]
pub enum FlowError {
    /// A required input port has no connection at execution time
    #[error("Node {node} is missing required input port {port}")]
    MissingInput { node: NodeId, port: usize },

    /// A node references an upstream node that has been removed
    #[error("Node {node} references removed upstream node {upstream}")]
    DanglingReference { node: NodeId, upstream: NodeId },

    /// A StoreAllFrames buffer reached its configured maximum
    #[error("Stream buffer is full (maximum of {capacity} frames)")]
    BufferFull { capacity: usize },

    /// A blocking wait was woken by a cooperative stop
    #[error("Stream stopped: {message}")]
    StreamStopped { message: String },

    /// Port kinds or flows do not match when building a connection
    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    /// Port index out of range for a node
    #[error("Node {node} has no port {port}")]
    InvalidPort { node: NodeId, port: usize },

    /// Invalid edge requested while building the graph
    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    /// The requested connection would close a cycle
    #[error("Cycle detected in pipeline graph")]
    CycleDetected,

    /// A compute body asked for input that was never produced
    #[error("No data available on port {port} of node {node}")]
    NoData { node: NodeId, port: usize },

    /// Operation not permitted in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failure reported by a node's compute hook
    #[error("Node {node} failed: {message}")]
    Execution { node: NodeId, message: String },

    /// Errors bubbled up from user compute hooks
    #[error("Compute error: {0}")]
    Compute(#[from] anyhow::Error),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn stopped(message: impl Into<String>) -> Self {
        FlowError::StreamStopped {
            message: message.into(),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &FlowError {
        match self {
            FlowError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the error is a cooperative stop rather than a failure
    pub fn is_stop(&self) -> bool {
        matches!(self.root(), FlowError::StreamStopped { .. })
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

/// Result type alias for frameflow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
