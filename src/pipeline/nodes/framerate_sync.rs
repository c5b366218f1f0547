//! FramerateSynchronizer: pairs up streams that run at different rates.
//!
//! Every input gets a reader thread that follows its stream and keeps only
//! the newest frame. One execution waits until each input has produced
//! something and fresh data arrived (on the priority input, when one is
//! set), then publishes the current frame of every input on the matching
//! output. Inputs without news repeat the frame they published last.

use crate::error::{FlowError, Result};
use crate::pipeline::data::{FrameRef, PayloadKind};
use crate::pipeline::node::{InputStream, NodeContext};
use crate::pipeline::port::{DataFlow, PortDescriptor, PortDirection};
use crate::pipeline::stream::FramePoll;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Default)]
struct Latest {
    frames: Vec<Option<FrameRef>>,
    finished: Vec<bool>,
    new_data: bool,
}

impl Latest {
    fn new(inputs: usize) -> Self {
        Self {
            frames: vec![None; inputs],
            finished: vec![false; inputs],
            new_data: false,
        }
    }

    fn ready(&self, priority: Option<usize>) -> bool {
        if !self.frames.iter().all(Option::is_some) {
            return false;
        }
        match priority {
            Some(_) => true,
            None => self.new_data,
        }
    }

    /// No future frame can make `ready` true.
    fn starved(&self, priority: Option<usize>) -> bool {
        let silent = self
            .frames
            .iter()
            .zip(&self.finished)
            .any(|(frame, finished)| *finished && frame.is_none());
        let all_done = self.finished.iter().all(|f| *f);
        silent || (all_done && !self.ready(priority))
    }
}

struct Shared {
    latest: Mutex<Latest>,
    changed: Condvar,
    running: AtomicBool,
}

pub struct FramerateSynchronizer {
    ports: Vec<PortDescriptor>,
    inputs: usize,
    priority: Option<usize>,
    shared: Arc<Shared>,
    streams: Vec<InputStream>,
    readers: Vec<JoinHandle<()>>,
    cycles: u64,
}

impl FramerateSynchronizer {
    /// Synchronizer with `inputs` stream inputs and as many static outputs.
    /// `priority` selects the input whose every new frame drives a cycle.
    pub fn new(inputs: usize, priority: Option<usize>) -> Self {
        let mut ports = Vec::with_capacity(inputs * 2);
        for i in 0..inputs {
            ports.push(
                PortDescriptor::named(format!("in{}", i), PortDirection::Input, PayloadKind::Any)
                    .with_flow(DataFlow::Stream),
            );
        }
        for i in 0..inputs {
            ports.push(PortDescriptor::named(
                format!("out{}", i),
                PortDirection::Output,
                PayloadKind::Any,
            ));
        }
        Self {
            ports,
            inputs,
            priority: priority.filter(|p| *p < inputs),
            shared: Arc::new(Shared {
                latest: Mutex::new(Latest::new(inputs)),
                changed: Condvar::new(),
                running: AtomicBool::new(true),
            }),
            streams: Vec::new(),
            readers: Vec::new(),
            cycles: 0,
        }
    }

    pub fn name(&self) -> &str {
        "FramerateSynchronizer"
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn priority(&self) -> Option<usize> {
        self.priority
    }

    /// Number of completed synchronization cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn start_readers(&mut self, ctx: &NodeContext) -> Result<()> {
        let slice = ctx.engine().config().runtime.sync_wait_slice();
        for port in 0..self.inputs {
            let stream = ctx.input_stream(port).ok_or_else(|| {
                FlowError::PortMismatch(format!(
                    "synchronizer input {} of {} is not fed by a stream",
                    port,
                    ctx.node_id()
                ))
            })?;
            self.streams.push(stream.clone());

            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sync-{}-in{}", ctx.node_id().0, port))
                .spawn(move || read_stream(port, stream, shared, slice))?;
            self.readers.push(handle);
        }
        tracing::debug!(
            "FramerateSynchronizer {} started {} readers",
            ctx.node_id(),
            self.inputs
        );
        Ok(())
    }

    pub fn execute(&mut self, ctx: &mut NodeContext) -> Result<()> {
        if self.readers.is_empty() && self.inputs > 0 {
            self.start_readers(ctx)?;
        }

        let snapshot = {
            let mut latest = self.shared.latest.lock();
            loop {
                if let Some(message) = ctx.engine().stop_message() {
                    return Err(FlowError::stopped(message));
                }
                if latest.ready(self.priority) {
                    break;
                }
                if latest.starved(self.priority) {
                    tracing::debug!("FramerateSynchronizer {}: inputs ended", ctx.node_id());
                    return Ok(());
                }
                self.shared.changed.wait(&mut latest);
            }
            let snapshot = latest.frames.clone();
            latest.new_data = false;
            if let Some(p) = self.priority {
                latest.frames[p] = None;
            }
            snapshot
        };

        for (port, frame) in snapshot.into_iter().enumerate() {
            if let Some(frame) = frame {
                ctx.publish_frame(port, frame)?;
            }
        }
        self.cycles += 1;
        tracing::trace!("FramerateSynchronizer {} cycle {}", ctx.node_id(), self.cycles);
        Ok(())
    }

    /// Stop the reader threads and release their stream cursors.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.changed.notify_all();
        for handle in self.readers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("FramerateSynchronizer reader panicked");
            }
        }
        for stream in self.streams.drain(..) {
            stream.buffer.unregister_consumer(stream.consumer);
        }
    }
}

impl Drop for FramerateSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_stream(port: usize, stream: InputStream, shared: Arc<Shared>, slice: Duration) {
    let InputStream { buffer, consumer } = stream;
    while shared.running.load(Ordering::Acquire) {
        match buffer.wait_for_pending_timeout(consumer, slice) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(_) => break,
        }
        match buffer.try_next_frame(consumer) {
            Ok(FramePoll::Ready(frame)) => {
                let last = frame.last_frame;
                {
                    let mut latest = shared.latest.lock();
                    latest.frames[port] = Some(frame);
                    latest.new_data = true;
                }
                shared.changed.notify_all();
                if last {
                    break;
                }
            }
            Ok(FramePoll::Pending) => {}
            Ok(FramePoll::Ended) | Err(_) => break,
        }
    }
    shared.latest.lock().finished[port] = true;
    shared.changed.notify_all();
}
