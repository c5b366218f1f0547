//! Producer tasks.
//!
//! Each live stream owns one dedicated thread that pulls frames from a
//! [`FrameGenerator`] and pushes them into its [`StreamBuffer`]. The task
//! reports how it ended over a crossbeam channel so the owning node can
//! surface producer failures (e.g. `BufferFull`) on the next `update`.
//!
//! # Shutdown
//!
//! `stop` flips the running flag, stops the buffer (which releases a
//! producer parked on a full ProcessAllFrames buffer) and closes the
//! shutdown channel, which also interrupts the inter-frame sleep. It then
//! waits for the exit report, up to the configured join timeout.

use crate::config::RuntimeSettings;
use crate::error::{FlowError, Result};
use crate::pipeline::data::DataObject;
use crate::pipeline::stream::StreamBuffer;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Source of frames for a producer task.
#[cfg_attr(test, mockall::automock)]
pub trait FrameGenerator: Send {
    /// Produce the next frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<DataObject>>;

    /// Delay between consecutive frames. Zero falls back to the configured
    /// default frame interval.
    fn frame_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Total number of frames, when known up front.
    fn total_frames(&self) -> Option<u64> {
        None
    }
}

/// How a producer task ended.
#[derive(Debug)]
pub enum TaskExit {
    /// The generator was exhausted; the stream was marked ended.
    Finished { frames: u64 },
    /// Stopped cooperatively.
    Stopped { frames: u64 },
    /// Fatal producer error.
    Failed(FlowError),
}

/// Current state of a producer task as seen by its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Finished,
    Stopped,
    Failed(String),
}

/// Handle to a running producer thread.
pub struct StreamTask {
    name: String,
    buffer: Arc<StreamBuffer>,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    shutdown_tx: Option<Sender<()>>,
    exit_rx: Receiver<TaskExit>,
    handle: Option<JoinHandle<()>>,
    state: TaskState,
    join_timeout: Duration,
}

impl StreamTask {
    /// Spawn the producer thread.
    pub fn spawn(
        name: impl Into<String>,
        buffer: Arc<StreamBuffer>,
        generator: Box<dyn FrameGenerator>,
        settings: &RuntimeSettings,
    ) -> Result<Self> {
        let name = name.into();
        let interval = match generator.frame_interval() {
            d if d.is_zero() => settings.default_frame_interval(),
            d => d,
        };
        let running = Arc::new(AtomicBool::new(true));
        let frames = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (exit_tx, exit_rx) = bounded(1);

        let worker = Producer {
            buffer: buffer.clone(),
            generator,
            running: running.clone(),
            frames: frames.clone(),
            shutdown_rx,
            interval,
        };
        let handle = std::thread::Builder::new()
            .name(format!("producer-{}", name))
            .spawn(move || {
                let exit = worker.run();
                let _ = exit_tx.send(exit);
            })?;

        tracing::info!("Producer task '{}' started on stream {}", name, buffer.id());

        Ok(Self {
            name,
            buffer,
            running,
            frames,
            shutdown_tx: Some(shutdown_tx),
            exit_rx,
            handle: Some(handle),
            state: TaskState::Running,
            join_timeout: settings.join_timeout(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buffer
    }

    /// Frames successfully pushed so far.
    pub fn frames_produced(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    /// Collect the exit report if the thread has finished. A producer failure
    /// is returned once as the underlying error; the task then stays `Failed`.
    pub fn poll(&mut self) -> Result<()> {
        if self.state != TaskState::Running {
            return Ok(());
        }
        match self.exit_rx.try_recv() {
            Ok(exit) => self.settle(exit),
            Err(TryRecvError::Empty) => Ok(()),
            Err(TryRecvError::Disconnected) => Err(self.vanished()),
        }
    }

    fn settle(&mut self, exit: TaskExit) -> Result<()> {
        match exit {
            TaskExit::Finished { frames } => {
                tracing::info!("Producer '{}' finished after {} frames", self.name, frames);
                self.state = TaskState::Finished;
                Ok(())
            }
            TaskExit::Stopped { frames } => {
                tracing::debug!("Producer '{}' stopped after {} frames", self.name, frames);
                self.state = TaskState::Stopped;
                Ok(())
            }
            TaskExit::Failed(err) => {
                tracing::error!("Producer '{}' failed: {}", self.name, err);
                self.state = TaskState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn vanished(&mut self) -> FlowError {
        self.state = TaskState::Failed("producer thread exited unexpectedly".to_string());
        FlowError::InvalidState(format!("producer '{}' exited without reporting", self.name))
    }

    /// Stop the producer and join its thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.buffer.stop(format!("producer '{}' stopped", self.name));
        // Closing the channel interrupts the inter-frame sleep.
        self.shutdown_tx.take();
        self.join();
    }

    fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // The report is the thread's last act, so once it arrives `join`
        // returns promptly.
        if self.state == TaskState::Running {
            match self.exit_rx.recv_deadline(Instant::now() + self.join_timeout) {
                Ok(exit) => {
                    let _ = self.settle(exit);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "Producer '{}' did not exit within {:?}, detaching",
                        self.name,
                        self.join_timeout
                    );
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let _ = self.vanished();
                }
            }
        }
        if handle.join().is_err() {
            tracing::error!("Producer '{}' panicked", self.name);
        }
        if self.state == TaskState::Running {
            self.state = TaskState::Stopped;
        }
    }
}

impl Drop for StreamTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

struct Producer {
    buffer: Arc<StreamBuffer>,
    generator: Box<dyn FrameGenerator>,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    shutdown_rx: Receiver<()>,
    interval: Duration,
}

impl Producer {
    fn run(mut self) -> TaskExit {
        let interval = self.interval;
        loop {
            if !self.running.load(Ordering::Acquire) {
                return self.stopped();
            }

            let frame = match self.generator.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.buffer.mark_end();
                    return TaskExit::Finished {
                        frames: self.frames.load(Ordering::Relaxed),
                    };
                }
                Err(e) if e.is_stop() => return self.stopped(),
                Err(e) => return self.fail(e),
            };

            let last = frame.last_frame;
            match self.buffer.add_frame(frame) {
                Ok(_) => {
                    self.frames.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.is_stop() => return self.stopped(),
                Err(e) => return self.fail(e),
            }
            if last {
                return TaskExit::Finished {
                    frames: self.frames.load(Ordering::Relaxed),
                };
            }

            if !interval.is_zero() {
                match self.shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return self.stopped(),
                }
            }
        }
    }

    fn stopped(&self) -> TaskExit {
        TaskExit::Stopped {
            frames: self.frames.load(Ordering::Relaxed),
        }
    }

    /// Consumers must not wait forever on a dead producer.
    fn fail(&self, err: FlowError) -> TaskExit {
        self.buffer.mark_end();
        TaskExit::Failed(err)
    }
}
