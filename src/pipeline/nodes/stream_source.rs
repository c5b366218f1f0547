//! StreamSource: node whose single output is a live stream.
//!
//! The first execution spawns a [`StreamTask`] that pulls frames from the
//! node's [`FrameGenerator`] on a dedicated thread, then waits until the
//! first frame (or the end of the stream) is visible so downstream nodes
//! have something to read. Later updates only poll the task for failures.

use crate::config::RuntimeSettings;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::pipeline::data::PayloadKind;
use crate::pipeline::node::NodeContext;
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::runtime::{FrameGenerator, StreamTask, TaskState};
use crate::pipeline::stream::{StreamBuffer, StreamingMode};
use std::sync::Arc;

pub struct StreamSource {
    label: String,
    ports: [PortDescriptor; 1],
    buffer: Arc<StreamBuffer>,
    generator: Option<Box<dyn FrameGenerator>>,
    task: Option<StreamTask>,
    runtime: RuntimeSettings,
}

impl StreamSource {
    /// Source using the engine's configured default streaming mode.
    pub fn from_config(ctx: &ExecutionContext, generator: impl FrameGenerator + 'static) -> Self {
        Self::new(ctx, ctx.config().stream.default_mode, generator)
    }

    /// Source whose buffer uses the configured capacity for `mode`.
    ///
    /// An unbounded StoreAllFrames buffer is sized to the generator's
    /// frame count when the generator knows it.
    pub fn new(ctx: &ExecutionContext, mode: StreamingMode, generator: impl FrameGenerator + 'static) -> Self {
        let mut capacity = ctx.config().stream.capacity_for(mode);
        if mode == StreamingMode::StoreAllFrames && capacity == 0 {
            if let Some(total) = generator.total_frames() {
                capacity = usize::try_from(total).unwrap_or(0);
            }
        }
        Self::with_capacity(ctx, mode, capacity, generator)
    }

    pub fn with_capacity(
        ctx: &ExecutionContext,
        mode: StreamingMode,
        capacity: usize,
        generator: impl FrameGenerator + 'static,
    ) -> Self {
        let buffer = ctx.create_stream(mode, capacity);
        Self {
            label: format!("stream-{}", buffer.id()),
            ports: [PortDescriptor::stream_output("frames", PayloadKind::Any)],
            buffer,
            generator: Some(Box::new(generator)),
            task: None,
            runtime: ctx.config().runtime.clone(),
        }
    }

    /// Declare the payload kind produced, so connections can be checked.
    pub fn with_kind(mut self, kind: PayloadKind) -> Self {
        self.ports = [PortDescriptor::stream_output("frames", kind)];
        self
    }

    /// Name used for the producer thread and log lines.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn name(&self) -> &str {
        "StreamSource"
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buffer
    }

    pub fn output_stream(&self, port: usize) -> Option<Arc<StreamBuffer>> {
        (port == 0).then(|| self.buffer.clone())
    }

    pub fn execute(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        if self.task.is_none() {
            let Some(generator) = self.generator.take() else {
                return Ok(());
            };
            let task = StreamTask::spawn(self.label.clone(), self.buffer.clone(), generator, &self.runtime)?;
            self.task = Some(task);
        }
        self.buffer.wait_first_frame()
    }

    /// Surface a producer failure once.
    pub fn poll(&mut self) -> Result<()> {
        match self.task.as_mut() {
            Some(task) => task.poll(),
            None => Ok(()),
        }
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.as_mut() {
            task.stop();
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.task.as_ref().is_some_and(StreamTask::is_running)
    }

    pub fn task_state(&self) -> Option<&TaskState> {
        self.task.as_ref().map(StreamTask::state)
    }

    pub fn frames_produced(&self) -> u64 {
        self.task.as_ref().map_or(0, StreamTask::frames_produced)
    }

    /// The producer is done; consumers may still be draining.
    pub fn has_reached_end(&self) -> bool {
        self.buffer.is_ended()
    }
}
