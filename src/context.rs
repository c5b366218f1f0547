//! Explicit execution context.
//!
//! Everything the engine would otherwise keep in process globals lives here:
//! the logical clock that stamps data, the consumer id generator, the engine
//! configuration and the stop signal. The context is cheap to clone and every
//! clone refers to the same state, so a clone can be moved to another thread
//! to stop a pipeline that is blocked in `update`.

use crate::config::EngineConfig;
use crate::pipeline::id::ConsumerId;
use crate::pipeline::stream::{StreamBuffer, StreamingMode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct ContextInner {
    config: EngineConfig,
    /// Last issued timestamp. Zero is reserved for "never produced".
    clock: AtomicU64,
    next_consumer: AtomicU64,
    next_stream: AtomicU64,
    stopped: AtomicBool,
    stop_message: Mutex<Option<String>>,
    streams: Mutex<Vec<Weak<StreamBuffer>>>,
}

/// Shared engine state handed to pipelines, buffers and producer tasks.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("clock", &self.inner.clock.load(Ordering::Relaxed))
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                clock: AtomicU64::new(0),
                next_consumer: AtomicU64::new(1),
                next_stream: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
                stop_message: Mutex::new(None),
                streams: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Issue a fresh, strictly increasing timestamp.
    pub fn next_timestamp(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Most recently issued timestamp (0 if none yet).
    pub fn current_timestamp(&self) -> u64 {
        self.inner.clock.load(Ordering::Acquire)
    }

    /// Allocate a consumer id that is unique within this context.
    pub fn next_consumer_id(&self) -> ConsumerId {
        ConsumerId(self.inner.next_consumer.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate a stream id. 0 is reserved for static outputs.
    pub fn next_stream_id(&self) -> u64 {
        self.inner.next_stream.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a buffer that is tracked by this context's stop signal.
    pub fn create_stream(&self, mode: StreamingMode, capacity: usize) -> Arc<StreamBuffer> {
        let buffer = Arc::new(StreamBuffer::new(self.clone(), mode, capacity));
        self.register_stream(&buffer);
        buffer
    }

    /// Create a buffer using the configured defaults for `mode`.
    pub fn create_default_stream(&self, mode: StreamingMode) -> Arc<StreamBuffer> {
        self.create_stream(mode, self.config().stream.capacity_for(mode))
    }

    /// Track an externally created buffer.
    pub fn register_stream(&self, buffer: &Arc<StreamBuffer>) {
        let mut streams = self.inner.streams.lock();
        streams.retain(|w| w.strong_count() > 0);
        streams.push(Arc::downgrade(buffer));

        if let Some(message) = self.stop_message() {
            buffer.stop(message);
        }
    }

    /// Stop the whole engine: every tracked buffer is stopped and every
    /// blocked producer or consumer wakes with `StreamStopped`.
    pub fn stop(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut slot = self.inner.stop_message.lock();
            if slot.is_none() {
                *slot = Some(message.clone());
            }
        }
        self.inner.stopped.store(true, Ordering::Release);

        let streams: Vec<Arc<StreamBuffer>> = self
            .inner
            .streams
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        tracing::info!(
            "Stopping execution context ({} live streams): {}",
            streams.len(),
            message
        );
        for stream in streams {
            stream.stop(message.clone());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn stop_message(&self) -> Option<String> {
        self.inner.stop_message.lock().clone()
    }

    /// Number of tracked buffers still alive.
    pub fn live_streams(&self) -> usize {
        self.inner
            .streams
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_strictly_increase() {
        let ctx = ExecutionContext::default();
        assert_eq!(ctx.current_timestamp(), 0);
        let a = ctx.next_timestamp();
        let b = ctx.next_timestamp();
        assert!(a > 0);
        assert!(b > a);
        assert_eq!(ctx.current_timestamp(), b);
    }

    #[test]
    fn test_clones_share_clock() {
        let ctx = ExecutionContext::default();
        let other = ctx.clone();
        let a = ctx.next_timestamp();
        let b = other.next_timestamp();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_consumer_ids_unique() {
        let ctx = ExecutionContext::default();
        let a = ctx.next_consumer_id();
        let b = ctx.next_consumer_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_stop_reaches_streams() {
        let ctx = ExecutionContext::default();
        let buffer = ctx.create_stream(StreamingMode::ProcessAllFrames, 4);
        assert_eq!(ctx.live_streams(), 1);

        ctx.stop("shutdown");
        assert!(ctx.is_stopped());
        assert!(buffer.is_stopped());
        assert_eq!(ctx.stop_message().as_deref(), Some("shutdown"));
    }

    #[test]
    fn test_streams_created_after_stop_are_stopped() {
        let ctx = ExecutionContext::default();
        ctx.stop("early");
        let buffer = ctx.create_stream(StreamingMode::NewestFrameOnly, 1);
        assert!(buffer.is_stopped());
    }

    #[test]
    fn test_dropped_streams_not_counted() {
        let ctx = ExecutionContext::default();
        let buffer = ctx.create_stream(StreamingMode::NewestFrameOnly, 1);
        drop(buffer);
        assert_eq!(ctx.live_streams(), 0);
    }
}
