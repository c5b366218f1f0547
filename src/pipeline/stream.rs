//! Stream buffers: multi-consumer frame storage between a producer task and
//! the nodes reading from it.
//!
//! The buffer is one mutex-protected state block plus two condition
//! variables: `frame_added` wakes consumers waiting for data, `slot_freed`
//! wakes a producer blocked on a full ProcessAllFrames buffer. How a full
//! buffer reacts is the mode's [`Backpressure`]:
//!
//! | Mode | Backpressure | Retained frames |
//! |---|---|---|
//! | `NewestFrameOnly` | `Replace` | 1 |
//! | `ProcessAllFrames` | `Block` | until every consumer passed them, at most `capacity` |
//! | `StoreAllFrames` | `Reject` (`BufferFull`) | all, at most `capacity` |
//!
//! A capacity of 0 means unbounded for the lossless modes.

use crate::context::ExecutionContext;
use crate::error::{FlowError, Result};
use crate::pipeline::data::{DataObject, FrameRef};
use crate::pipeline::id::ConsumerId;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retention policy of a stream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Only the most recent frame is kept; consumers may skip frames.
    NewestFrameOnly,
    /// Every consumer sees every frame; the producer blocks when full.
    #[default]
    ProcessAllFrames,
    /// Every frame is kept for the lifetime of the buffer.
    StoreAllFrames,
}

impl StreamingMode {
    pub fn backpressure(self) -> Backpressure {
        match self {
            StreamingMode::NewestFrameOnly => Backpressure::Replace,
            StreamingMode::ProcessAllFrames => Backpressure::Block,
            StreamingMode::StoreAllFrames => Backpressure::Reject,
        }
    }

    /// Whether consumers are guaranteed to see every frame.
    #[inline]
    pub fn is_lossless(self) -> bool {
        self != StreamingMode::NewestFrameOnly
    }
}

/// What `add_frame` does when the buffer cannot take another frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backpressure {
    /// Drop the previously retained frame.
    Replace,
    /// Wait until a slot is freed.
    Block,
    /// Fail with `BufferFull`.
    Reject,
}

/// Lifecycle of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamPhase {
    Empty,
    Streaming,
    Ended,
}

/// Result of a non-blocking read.
#[derive(Debug, Clone)]
pub enum FramePoll {
    Ready(FrameRef),
    /// Nothing new yet; not an error.
    Pending,
    /// The producer finished and this consumer has seen everything.
    Ended,
}

impl FramePoll {
    pub fn into_frame(self) -> Option<FrameRef> {
        match self {
            FramePoll::Ready(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Result of a non-blocking write.
#[derive(Debug)]
pub enum AddOutcome {
    Added(u64),
    /// The buffer is full; the frame is handed back.
    Full(DataObject),
}

/// Point-in-time counters for a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub mode: StreamingMode,
    pub capacity: usize,
    pub frames_added: u64,
    pub occupancy: usize,
    pub peak_occupancy: usize,
    pub consumers: usize,
    pub phase: StreamPhase,
}

#[derive(Debug, Clone, Copy)]
struct ConsumerCursor {
    /// Index of the next frame this consumer will read.
    cursor: u64,
    /// Timestamp of the last frame it read.
    last_stamp: u64,
}

struct StreamState {
    capacity: usize,
    frames: BTreeMap<u64, Arc<DataObject>>,
    latest: Option<(u64, Arc<DataObject>)>,
    next_index: u64,
    consumers: HashMap<ConsumerId, ConsumerCursor>,
    timestamp: u64,
    producer_done: bool,
    stopped: Option<String>,
    peak_occupancy: usize,
}

impl StreamState {
    fn check_stopped(&self) -> Result<()> {
        match &self.stopped {
            Some(message) => Err(FlowError::stopped(message.clone())),
            None => Ok(()),
        }
    }

    /// Smallest cursor over all consumers. Recomputed by scanning.
    fn min_cursor(&self) -> u64 {
        self.consumers
            .values()
            .map(|c| c.cursor)
            .min()
            .unwrap_or_else(|| self.first_retained())
    }

    fn first_retained(&self) -> u64 {
        self.frames
            .keys()
            .next()
            .copied()
            .unwrap_or(self.next_index)
    }

    fn initial_cursor(&self, mode: StreamingMode) -> u64 {
        match mode {
            StreamingMode::NewestFrameOnly => self.next_index.saturating_sub(1),
            StreamingMode::StoreAllFrames => 0,
            StreamingMode::ProcessAllFrames => self.min_cursor(),
        }
    }

    fn is_full(&self) -> bool {
        self.capacity > 0 && self.frames.len() >= self.capacity
    }

    fn phase(&self) -> StreamPhase {
        if self.stopped.is_some() || self.producer_done {
            StreamPhase::Ended
        } else if self.next_index == 0 {
            StreamPhase::Empty
        } else {
            StreamPhase::Streaming
        }
    }
}

/// Frame storage shared between one producer and any number of consumers.
pub struct StreamBuffer {
    id: u64,
    mode: StreamingMode,
    ctx: ExecutionContext,
    state: Mutex<StreamState>,
    frame_added: Condvar,
    slot_freed: Condvar,
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("stats", &self.stats())
            .finish()
    }
}

impl StreamBuffer {
    /// Create an untracked buffer. Prefer [`ExecutionContext::create_stream`],
    /// which also subscribes the buffer to the context's stop signal.
    pub fn new(ctx: ExecutionContext, mode: StreamingMode, capacity: usize) -> Self {
        let capacity = match mode {
            StreamingMode::NewestFrameOnly => 1,
            _ => capacity,
        };
        Self {
            id: ctx.next_stream_id(),
            mode,
            ctx,
            state: Mutex::new(StreamState {
                capacity,
                frames: BTreeMap::new(),
                latest: None,
                next_index: 0,
                consumers: HashMap::new(),
                timestamp: 0,
                producer_done: false,
                stopped: None,
                peak_occupancy: 0,
            }),
            frame_added: Condvar::new(),
            slot_freed: Condvar::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn mode(&self) -> StreamingMode {
        self.mode
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Change the frame limit. Only allowed before the first frame arrives.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        let mut st = self.state.lock();
        if st.next_index > 0 {
            return Err(FlowError::InvalidState(
                "stream capacity must be set before streaming starts".to_string(),
            ));
        }
        if self.mode != StreamingMode::NewestFrameOnly {
            st.capacity = capacity;
        }
        Ok(())
    }

    // ── Producer side ──

    /// Append a frame, applying the mode's backpressure. Returns the frame index.
    pub fn add_frame(&self, frame: DataObject) -> Result<u64> {
        let mut st = self.state.lock();
        loop {
            self.check_writable(&st)?;
            if !st.is_full() {
                break;
            }
            match self.mode.backpressure() {
                Backpressure::Replace => break,
                Backpressure::Block => {
                    tracing::trace!("Stream {} full, producer waiting", self.id);
                    self.slot_freed.wait(&mut st);
                }
                Backpressure::Reject => {
                    return Err(FlowError::BufferFull {
                        capacity: st.capacity,
                    })
                }
            }
        }
        Ok(self.insert(st, frame))
    }

    /// Append a frame without blocking. A full ProcessAllFrames buffer hands
    /// the frame back instead of waiting.
    pub fn try_add_frame(&self, frame: DataObject) -> Result<AddOutcome> {
        let st = self.state.lock();
        self.check_writable(&st)?;
        if st.is_full() {
            match self.mode.backpressure() {
                Backpressure::Replace => {}
                Backpressure::Block => return Ok(AddOutcome::Full(frame)),
                Backpressure::Reject => {
                    return Err(FlowError::BufferFull {
                        capacity: st.capacity,
                    })
                }
            }
        }
        Ok(AddOutcome::Added(self.insert(st, frame)))
    }

    fn check_writable(&self, st: &StreamState) -> Result<()> {
        st.check_stopped()?;
        if st.producer_done {
            return Err(FlowError::InvalidState(format!(
                "stream {} already ended",
                self.id
            )));
        }
        Ok(())
    }

    fn insert(&self, mut st: MutexGuard<'_, StreamState>, mut frame: DataObject) -> u64 {
        frame.version = self.ctx.next_timestamp();
        let stamp = frame.version;
        let last = frame.last_frame;
        let data = Arc::new(frame);

        let index = st.next_index;
        st.next_index += 1;
        if self.mode == StreamingMode::NewestFrameOnly {
            st.frames.clear();
        }
        st.frames.insert(index, data.clone());
        st.latest = Some((index, data));
        st.timestamp = stamp;
        st.peak_occupancy = st.peak_occupancy.max(st.frames.len());
        if last {
            st.producer_done = true;
        }
        drop(st);

        tracing::trace!("Stream {} frame {} added (ts {})", self.id, index, stamp);
        self.frame_added.notify_all();
        index
    }

    /// Signal that no more frames will be added.
    pub fn mark_end(&self) {
        let mut st = self.state.lock();
        if !st.producer_done {
            st.producer_done = true;
            tracing::debug!("Stream {} ended after {} frames", self.id, st.next_index);
        }
        drop(st);
        self.frame_added.notify_all();
    }

    /// Stop the buffer: every blocked producer and consumer wakes with
    /// `StreamStopped`, and all later blocking calls fail the same way.
    pub fn stop(&self, message: impl Into<String>) {
        let mut st = self.state.lock();
        if st.stopped.is_none() {
            st.stopped = Some(message.into());
        }
        drop(st);
        self.frame_added.notify_all();
        self.slot_freed.notify_all();
    }

    // ── Consumer side ──

    /// Register a reader. Idempotent.
    pub fn register_consumer(&self, consumer: ConsumerId) {
        let mut st = self.state.lock();
        Self::ensure_consumer(&mut st, self.mode, consumer);
    }

    fn ensure_consumer<'a>(
        st: &'a mut StreamState,
        mode: StreamingMode,
        consumer: ConsumerId,
    ) -> &'a mut ConsumerCursor {
        let initial = if st.consumers.contains_key(&consumer) {
            0
        } else {
            st.initial_cursor(mode)
        };
        st.consumers.entry(consumer).or_insert(ConsumerCursor {
            cursor: initial,
            last_stamp: 0,
        })
    }

    /// Remove a reader; frames only it was holding back are released.
    pub fn unregister_consumer(&self, consumer: ConsumerId) {
        let mut st = self.state.lock();
        if st.consumers.remove(&consumer).is_some() && self.evict(&mut st) {
            drop(st);
            self.slot_freed.notify_all();
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    /// Drop frames every consumer has passed. Returns true if anything was freed.
    fn evict(&self, st: &mut StreamState) -> bool {
        if self.mode != StreamingMode::ProcessAllFrames || st.consumers.is_empty() {
            return false;
        }
        let min = st.min_cursor();
        let keep = st.frames.split_off(&min);
        let freed = !st.frames.is_empty();
        st.frames = keep;
        freed
    }

    /// Take the next frame for `consumer` if one is available.
    fn take(&self, st: &mut StreamState, consumer: ConsumerId) -> Option<FrameRef> {
        let mode = self.mode;
        match mode {
            StreamingMode::NewestFrameOnly => {
                let (index, data) = st.latest.clone()?;
                let cursor = Self::ensure_consumer(st, mode, consumer);
                cursor.cursor = cursor.cursor.max(index + 1);
                cursor.last_stamp = data.version;
                Some(FrameRef::new(self.id, index, data))
            }
            _ => {
                let index = Self::ensure_consumer(st, mode, consumer).cursor;
                let data = st.frames.get(&index)?.clone();
                if let Some(cursor) = st.consumers.get_mut(&consumer) {
                    cursor.cursor = index + 1;
                    cursor.last_stamp = data.version;
                }
                Some(FrameRef::new(self.id, index, data))
            }
        }
    }

    fn consumer_finished(&self, st: &StreamState, consumer: ConsumerId) -> bool {
        if !st.producer_done {
            return false;
        }
        match self.mode {
            StreamingMode::NewestFrameOnly => true,
            _ => st
                .consumers
                .get(&consumer)
                .map_or(true, |c| c.cursor >= st.next_index),
        }
    }

    /// Blocking read. Returns `None` once the stream has ended and this
    /// consumer has read everything it is owed.
    ///
    /// NewestFrameOnly returns the latest frame, even if already seen, and
    /// only blocks until the very first frame exists.
    pub fn next_frame(&self, consumer: ConsumerId) -> Result<Option<FrameRef>> {
        let mut st = self.state.lock();
        Self::ensure_consumer(&mut st, self.mode, consumer);
        loop {
            st.check_stopped()?;
            if let Some(frame) = self.take(&mut st, consumer) {
                if self.evict(&mut st) {
                    drop(st);
                    self.slot_freed.notify_all();
                }
                return Ok(Some(frame));
            }
            if self.consumer_finished(&st, consumer) {
                return Ok(None);
            }
            self.frame_added.wait(&mut st);
        }
    }

    /// Non-blocking read. For NewestFrameOnly a frame is only `Ready` if it
    /// arrived after this consumer's previous read.
    pub fn try_next_frame(&self, consumer: ConsumerId) -> Result<FramePoll> {
        let mut st = self.state.lock();
        st.check_stopped()?;
        let cursor = Self::ensure_consumer(&mut st, self.mode, consumer).cursor;
        let fresh = match self.mode {
            StreamingMode::NewestFrameOnly => st
                .latest
                .as_ref()
                .is_some_and(|(index, _)| *index >= cursor),
            _ => st.frames.contains_key(&cursor),
        };
        if fresh {
            if let Some(frame) = self.take(&mut st, consumer) {
                if self.evict(&mut st) {
                    drop(st);
                    self.slot_freed.notify_all();
                }
                return Ok(FramePoll::Ready(frame));
            }
        }
        if self.consumer_finished(&st, consumer) {
            Ok(FramePoll::Ended)
        } else {
            Ok(FramePoll::Pending)
        }
    }

    /// Whether `consumer` has an unread frame waiting.
    pub fn has_pending(&self, consumer: ConsumerId) -> bool {
        let st = self.state.lock();
        if st.consumers.contains_key(&consumer) {
            self.pending_ready(&st, consumer)
        } else {
            st.latest.is_some()
        }
    }

    fn pending_ready(&self, st: &StreamState, consumer: ConsumerId) -> bool {
        let cursor = st.consumers.get(&consumer).map_or(0, |c| c.cursor);
        match self.mode {
            StreamingMode::NewestFrameOnly => st
                .latest
                .as_ref()
                .is_some_and(|(index, _)| *index >= cursor),
            _ => st.frames.contains_key(&cursor),
        }
    }

    /// Block until `consumer` has an unread frame, has reached the end, or
    /// the buffer is stopped. For NewestFrameOnly "unread" means a frame newer
    /// than the one it read last.
    pub fn wait_for_pending(&self, consumer: ConsumerId) -> Result<()> {
        let mut st = self.state.lock();
        Self::ensure_consumer(&mut st, self.mode, consumer);
        loop {
            st.check_stopped()?;
            if self.pending_ready(&st, consumer) || self.consumer_finished(&st, consumer) {
                return Ok(());
            }
            self.frame_added.wait(&mut st);
        }
    }

    /// Like [`wait_for_pending`](Self::wait_for_pending) but gives up after
    /// `timeout`. Returns false on timeout.
    pub fn wait_for_pending_timeout(&self, consumer: ConsumerId, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        Self::ensure_consumer(&mut st, self.mode, consumer);
        loop {
            st.check_stopped()?;
            if self.pending_ready(&st, consumer) || self.consumer_finished(&st, consumer) {
                return Ok(true);
            }
            if self.frame_added.wait_until(&mut st, deadline).timed_out() {
                st.check_stopped()?;
                return Ok(self.pending_ready(&st, consumer) || self.consumer_finished(&st, consumer));
            }
        }
    }

    /// Block until the first frame exists or the producer ends.
    pub fn wait_first_frame(&self) -> Result<()> {
        let mut st = self.state.lock();
        loop {
            st.check_stopped()?;
            if st.next_index > 0 || st.producer_done {
                return Ok(());
            }
            self.frame_added.wait(&mut st);
        }
    }

    /// Most recent frame without moving any cursor.
    pub fn latest_frame(&self) -> Option<FrameRef> {
        let st = self.state.lock();
        st.latest
            .as_ref()
            .map(|(index, data)| FrameRef::new(self.id, *index, data.clone()))
    }

    /// Timestamp of the newest frame (0 before the first frame).
    pub fn timestamp(&self) -> u64 {
        self.state.lock().timestamp
    }

    /// Timestamp as observed by `consumer`.
    ///
    /// For the lossless modes this is the stamp of the frame the consumer
    /// would read next, or of the frame it read last when nothing is
    /// pending. A consumer with nothing pending therefore sees no change.
    pub fn timestamp_for(&self, consumer: ConsumerId) -> u64 {
        let st = self.state.lock();
        match self.mode {
            StreamingMode::NewestFrameOnly => st.timestamp,
            _ => match st.consumers.get(&consumer) {
                Some(c) => st
                    .frames
                    .get(&c.cursor)
                    .map_or(c.last_stamp, |data| data.version),
                None => st.timestamp,
            },
        }
    }

    /// Whether the stream is over for `consumer`.
    ///
    /// ProcessAllFrames streams end for everyone at once: the producer is
    /// done and no consumer holds a frame back. The other modes end per
    /// consumer, once it has read everything it is owed.
    pub fn has_reached_end(&self, consumer: ConsumerId) -> bool {
        let st = self.state.lock();
        match self.mode {
            StreamingMode::ProcessAllFrames => st.producer_done && st.frames.is_empty(),
            _ => self.consumer_finished(&st, consumer),
        }
    }

    /// Whether `consumer` has read everything the ended stream produced,
    /// regardless of other consumers.
    pub fn has_consumed_all(&self, consumer: ConsumerId) -> bool {
        let st = self.state.lock();
        self.consumer_finished(&st, consumer)
    }

    /// A ProcessAllFrames buffer that would block its producer right now.
    pub fn is_congested(&self) -> bool {
        self.mode.backpressure() == Backpressure::Block && self.state.lock().is_full()
    }

    /// Producer ended and no frame is retained (ProcessAllFrames drain condition).
    pub fn is_drained(&self) -> bool {
        let st = self.state.lock();
        st.producer_done && st.frames.is_empty()
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().producer_done
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped.is_some()
    }

    pub fn phase(&self) -> StreamPhase {
        self.state.lock().phase()
    }

    /// Number of retained frames.
    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames ever added.
    pub fn frames_added(&self) -> u64 {
        self.state.lock().next_index
    }

    pub fn stats(&self) -> StreamStats {
        let st = self.state.lock();
        StreamStats {
            mode: self.mode,
            capacity: st.capacity,
            frames_added: st.next_index,
            occupancy: st.frames.len(),
            peak_occupancy: st.peak_occupancy,
            consumers: st.consumers.len(),
            phase: st.phase(),
        }
    }
}
