//! Node abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`NodePlugin` trait**: the compute hook, implemented by user nodes.
//! - **`BuiltinNode` enum**: all built-in nodes, dispatched by `match`.
//!
//! `AnyNode` wraps either variant so the pipeline can handle both uniformly.

use crate::context::ExecutionContext;
use crate::error::{FlowError, Result, ResultExt};
use crate::pipeline::data::{DataObject, FrameRef};
use crate::pipeline::id::{ConsumerId, NodeId};
use crate::pipeline::output::{InputSource, OutputSlot};
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::stream::{AddOutcome, FramePoll, StreamBuffer};
use std::sync::Arc;

/// Stream input as seen by a compute body that manages its own reads.
#[derive(Debug, Clone)]
pub struct InputStream {
    pub buffer: Arc<StreamBuffer>,
    pub consumer: ConsumerId,
}

/// Context passed to a node's compute body for one execution.
///
/// Port indices count inputs and outputs separately: input 0 is the first
/// declared input port, output 0 the first declared output port.
pub struct NodeContext<'a> {
    node: NodeId,
    engine: &'a ExecutionContext,
    inputs: &'a [Option<InputSource>],
    outputs: &'a [OutputSlot],
    /// Frames already read during this execution, so repeated reads agree.
    fetched: Vec<Option<FrameRef>>,
    rerun: bool,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        node: NodeId,
        engine: &'a ExecutionContext,
        inputs: &'a [Option<InputSource>],
        outputs: &'a [OutputSlot],
    ) -> Self {
        Self {
            node,
            engine,
            inputs,
            outputs,
            fetched: vec![None; inputs.len()],
            rerun: false,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn engine(&self) -> &ExecutionContext {
        self.engine
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_connected(&self, port: usize) -> bool {
        matches!(self.inputs.get(port), Some(Some(_)))
    }

    fn source(&self, port: usize) -> Result<&InputSource> {
        match self.inputs.get(port) {
            Some(Some(source)) => Ok(source),
            Some(None) => Err(FlowError::MissingInput {
                node: self.node,
                port,
            }),
            None => Err(FlowError::InvalidPort {
                node: self.node,
                port,
            }),
        }
    }

    /// Data for an input port.
    ///
    /// Static inputs return the upstream's current value. Stream inputs
    /// consume the next frame for this port (blocking until one exists);
    /// once an ended stream is drained, its final frame is returned again.
    /// Repeated calls within one execution return the same frame.
    pub fn input(&mut self, port: usize) -> Result<FrameRef> {
        if let Some(Some(frame)) = self.fetched.get(port) {
            return Ok(frame.clone());
        }
        let source = self.source(port)?;
        let frame = match &source.output {
            OutputSlot::Static(slot) => slot.current(),
            OutputSlot::Stream(buffer) => match buffer.next_frame(source.consumer)? {
                Some(frame) => Some(frame),
                None => buffer.latest_frame(),
            },
        };
        let frame = frame.ok_or(FlowError::NoData {
            node: self.node,
            port,
        })?;
        self.fetched[port] = Some(frame.clone());
        Ok(frame)
    }

    /// Non-blocking read. `Ok(None)` means nothing new is available yet.
    pub fn try_input(&mut self, port: usize) -> Result<Option<FrameRef>> {
        if let Some(Some(frame)) = self.fetched.get(port) {
            return Ok(Some(frame.clone()));
        }
        let source = self.source(port)?;
        let frame = match &source.output {
            OutputSlot::Static(slot) => slot.current(),
            OutputSlot::Stream(buffer) => buffer.try_next_frame(source.consumer)?.into_frame(),
        };
        if let Some(frame) = &frame {
            self.fetched[port] = Some(frame.clone());
        }
        Ok(frame)
    }

    /// Poll a stream input without caching the result.
    pub fn poll_input(&self, port: usize) -> Result<FramePoll> {
        let source = self.source(port)?;
        match &source.output {
            OutputSlot::Static(slot) => Ok(slot.current().map_or(FramePoll::Pending, FramePoll::Ready)),
            OutputSlot::Stream(buffer) => buffer.try_next_frame(source.consumer),
        }
    }

    /// Newest upstream value without moving this port's cursor.
    pub fn latest_input(&self, port: usize) -> Option<FrameRef> {
        self.source(port).ok().and_then(|s| s.output.latest())
    }

    /// The stream behind an input port, for nodes that read on their own threads.
    pub fn input_stream(&self, port: usize) -> Option<InputStream> {
        let source = self.source(port).ok()?;
        source.output.as_stream().map(|buffer| InputStream {
            buffer: buffer.clone(),
            consumer: source.consumer,
        })
    }

    fn output(&self, port: usize) -> Result<&OutputSlot> {
        self.outputs.get(port).ok_or(FlowError::InvalidPort {
            node: self.node,
            port,
        })
    }

    /// Publish a new data object on an output port.
    ///
    /// Static outputs stamp and store it; stream outputs append it as a frame.
    /// A compute body runs on the thread that drains its streams, so a full
    /// ProcessAllFrames output fails with `BufferFull` instead of blocking.
    pub fn publish(&mut self, port: usize, mut data: DataObject) -> Result<()> {
        match self.output(port)? {
            OutputSlot::Static(slot) => {
                data.version = self.engine.next_timestamp();
                let index = slot.publishes();
                slot.set(FrameRef::new(0, index, Arc::new(data)));
                Ok(())
            }
            OutputSlot::Stream(buffer) => Self::append(buffer, data)
                .with_context(|| format!("output {} of node {}", port, self.node)),
        }
    }

    /// Forward an already published frame without copying it.
    pub fn publish_frame(&mut self, port: usize, frame: FrameRef) -> Result<()> {
        match self.output(port)? {
            OutputSlot::Static(slot) => {
                slot.set(frame);
                Ok(())
            }
            OutputSlot::Stream(buffer) => Self::append(buffer, DataObject::clone(frame.data()))
                .with_context(|| format!("output {} of node {}", port, self.node)),
        }
    }

    fn append(buffer: &StreamBuffer, data: DataObject) -> Result<()> {
        match buffer.try_add_frame(data)? {
            AddOutcome::Added(_) => Ok(()),
            AddOutcome::Full(_) => Err(FlowError::BufferFull {
                capacity: buffer.capacity(),
            }),
        }
    }

    /// Current value of one of this node's own outputs.
    pub fn current_output(&self, port: usize) -> Option<FrameRef> {
        self.outputs.get(port).and_then(OutputSlot::latest)
    }

    /// Keep the node marked modified after this execution.
    pub fn request_rerun(&mut self) {
        self.rerun = true;
    }

    pub fn rerun_requested(&self) -> bool {
        self.rerun
    }
}

/// Trait for pluggable/user-defined nodes.
pub trait NodePlugin: Send {
    /// Human-readable name of this node.
    fn name(&self) -> &str;

    /// Port descriptors for this node.
    fn ports(&self) -> &[PortDescriptor];

    /// Compute body, run by `Pipeline::update` when the node or one of its
    /// inputs changed.
    fn execute(&mut self, ctx: &mut NodeContext) -> Result<()>;

    /// Buffer backing a stream output port (output index).
    fn output_stream(&self, _port: usize) -> Option<Arc<StreamBuffer>> {
        None
    }

    /// Called on every `update`, before deciding whether to execute.
    fn poll(&mut self) -> Result<()> {
        Ok(())
    }

    /// Nodes that must run on every `update`.
    fn always_modified(&self) -> bool {
        false
    }

    /// Called when the pipeline stops; background work must end here.
    fn stop(&mut self) {}
}

// Forward-declare built-in node types (defined in nodes/ submodule).
use crate::pipeline::nodes::{
    FnNode, FramerateSynchronizer, PipelineSynchronizer, StaticSource, StreamSource,
};

/// Enum dispatch for built-in nodes.
pub enum BuiltinNode {
    StaticSource(StaticSource),
    StreamSource(StreamSource),
    Compute(FnNode),
    FramerateSync(FramerateSynchronizer),
    PipelineSync(PipelineSynchronizer),
}

impl BuiltinNode {
    pub fn name(&self) -> &str {
        match self {
            BuiltinNode::StaticSource(n) => n.name(),
            BuiltinNode::StreamSource(n) => n.name(),
            BuiltinNode::Compute(n) => n.name(),
            BuiltinNode::FramerateSync(n) => n.name(),
            BuiltinNode::PipelineSync(n) => n.name(),
        }
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        match self {
            BuiltinNode::StaticSource(n) => n.ports(),
            BuiltinNode::StreamSource(n) => n.ports(),
            BuiltinNode::Compute(n) => n.ports(),
            BuiltinNode::FramerateSync(n) => n.ports(),
            BuiltinNode::PipelineSync(n) => n.ports(),
        }
    }

    pub fn execute(&mut self, ctx: &mut NodeContext) -> Result<()> {
        match self {
            BuiltinNode::StaticSource(n) => n.execute(ctx),
            BuiltinNode::StreamSource(n) => n.execute(ctx),
            BuiltinNode::Compute(n) => n.execute(ctx),
            BuiltinNode::FramerateSync(n) => n.execute(ctx),
            BuiltinNode::PipelineSync(n) => n.execute(ctx),
        }
    }

    pub fn output_stream(&self, port: usize) -> Option<Arc<StreamBuffer>> {
        match self {
            BuiltinNode::StreamSource(n) => n.output_stream(port),
            _ => None,
        }
    }

    pub fn poll(&mut self) -> Result<()> {
        match self {
            BuiltinNode::StreamSource(n) => n.poll(),
            _ => Ok(()),
        }
    }

    pub fn always_modified(&self) -> bool {
        matches!(
            self,
            BuiltinNode::FramerateSync(_) | BuiltinNode::PipelineSync(_)
        )
    }

    pub fn stop(&mut self) {
        match self {
            BuiltinNode::StreamSource(n) => n.stop(),
            BuiltinNode::FramerateSync(n) => n.stop(),
            _ => {}
        }
    }
}

/// Wrapper that holds either a built-in node (enum dispatch) or a plugin (trait object).
pub enum AnyNode {
    Builtin(BuiltinNode),
    Plugin(Box<dyn NodePlugin>),
}

impl AnyNode {
    pub fn plugin(node: impl NodePlugin + 'static) -> Self {
        AnyNode::Plugin(Box::new(node))
    }

    pub fn name(&self) -> &str {
        match self {
            AnyNode::Builtin(n) => n.name(),
            AnyNode::Plugin(n) => n.name(),
        }
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        match self {
            AnyNode::Builtin(n) => n.ports(),
            AnyNode::Plugin(n) => n.ports(),
        }
    }

    pub fn execute(&mut self, ctx: &mut NodeContext) -> Result<()> {
        match self {
            AnyNode::Builtin(n) => n.execute(ctx),
            AnyNode::Plugin(n) => n.execute(ctx),
        }
    }

    pub fn output_stream(&self, port: usize) -> Option<Arc<StreamBuffer>> {
        match self {
            AnyNode::Builtin(n) => n.output_stream(port),
            AnyNode::Plugin(n) => n.output_stream(port),
        }
    }

    pub fn poll(&mut self) -> Result<()> {
        match self {
            AnyNode::Builtin(n) => n.poll(),
            AnyNode::Plugin(n) => n.poll(),
        }
    }

    pub fn always_modified(&self) -> bool {
        match self {
            AnyNode::Builtin(n) => n.always_modified(),
            AnyNode::Plugin(n) => n.always_modified(),
        }
    }

    pub fn stop(&mut self) {
        match self {
            AnyNode::Builtin(n) => n.stop(),
            AnyNode::Plugin(n) => n.stop(),
        }
    }
}

impl From<StaticSource> for AnyNode {
    fn from(node: StaticSource) -> Self {
        AnyNode::Builtin(BuiltinNode::StaticSource(node))
    }
}

impl From<StreamSource> for AnyNode {
    fn from(node: StreamSource) -> Self {
        AnyNode::Builtin(BuiltinNode::StreamSource(node))
    }
}

impl From<FnNode> for AnyNode {
    fn from(node: FnNode) -> Self {
        AnyNode::Builtin(BuiltinNode::Compute(node))
    }
}

impl From<FramerateSynchronizer> for AnyNode {
    fn from(node: FramerateSynchronizer) -> Self {
        AnyNode::Builtin(BuiltinNode::FramerateSync(node))
    }
}

impl From<PipelineSynchronizer> for AnyNode {
    fn from(node: PipelineSynchronizer) -> Self {
        AnyNode::Builtin(BuiltinNode::PipelineSync(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::data::PayloadKind;
    use crate::pipeline::output::StaticSlot;
    use crate::pipeline::stream::StreamingMode;

    #[test]
    fn test_context_static_input_and_publish() {
        let engine = ExecutionContext::default();
        let upstream = Arc::new(StaticSlot::new());
        upstream.set(FrameRef::new(0, 0, Arc::new(DataObject::scalar(4.0))));

        let inputs = vec![
            Some(InputSource {
                output: OutputSlot::Static(upstream),
                consumer: ConsumerId(1),
            }),
            None,
        ];
        let outputs = vec![OutputSlot::new_static()];
        let mut ctx = NodeContext::new(NodeId(2), &engine, &inputs, &outputs);

        assert_eq!(ctx.input(0).unwrap().as_scalar(), Some(4.0));
        assert!(matches!(
            ctx.input(1),
            Err(FlowError::MissingInput { port: 1, .. })
        ));
        assert!(matches!(ctx.input(5), Err(FlowError::InvalidPort { port: 5, .. })));

        ctx.publish(0, DataObject::scalar(8.0)).unwrap();
        let out = ctx.current_output(0).unwrap();
        assert_eq!(out.as_scalar(), Some(8.0));
        assert!(out.version > 0);
        assert!(matches!(
            ctx.publish(3, DataObject::scalar(0.0)),
            Err(FlowError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_context_stream_input_cached_per_execution() {
        let engine = ExecutionContext::default();
        let buffer = engine.create_stream(StreamingMode::ProcessAllFrames, 4);
        let consumer = ConsumerId(9);
        buffer.register_consumer(consumer);
        buffer.add_frame(DataObject::scalar(1.0)).unwrap();
        buffer.add_frame(DataObject::scalar(2.0)).unwrap();

        let inputs = vec![Some(InputSource {
            output: OutputSlot::Stream(buffer.clone()),
            consumer,
        })];
        let outputs: Vec<OutputSlot> = Vec::new();
        let mut ctx = NodeContext::new(NodeId(0), &engine, &inputs, &outputs);
        let a = ctx.input(0).unwrap();
        let b = ctx.input(0).unwrap();
        assert!(a.same_object(&b));
        assert_eq!(a.index, 0);
        // Only one frame was consumed.
        assert_eq!(buffer.timestamp_for(consumer), buffer.latest_frame().unwrap().version);
        assert!(ctx.input_stream(0).is_some());
    }

    #[test]
    fn test_publish_to_full_stream_does_not_block() {
        let engine = ExecutionContext::default();
        let buffer = engine.create_stream(StreamingMode::ProcessAllFrames, 1);
        buffer.register_consumer(ConsumerId(4));
        let outputs = vec![OutputSlot::Stream(buffer.clone())];
        let mut ctx = NodeContext::new(NodeId(3), &engine, &[], &outputs);

        ctx.publish(0, DataObject::scalar(1.0)).unwrap();
        let err = ctx.publish(0, DataObject::scalar(2.0)).unwrap_err();
        assert!(matches!(err.root(), FlowError::BufferFull { capacity: 1 }));
        assert!(err.to_string().contains("output 0"));
        assert_eq!(buffer.frames_added(), 1);
    }

    #[test]
    fn test_context_no_data() {
        let engine = ExecutionContext::default();
        let inputs = vec![Some(InputSource {
            output: OutputSlot::new_static(),
            consumer: ConsumerId(1),
        })];
        let outputs: Vec<OutputSlot> = Vec::new();
        let mut ctx = NodeContext::new(NodeId(1), &engine, &inputs, &outputs);
        assert!(matches!(ctx.input(0), Err(FlowError::NoData { port: 0, .. })));
        assert!(ctx.try_input(0).unwrap().is_none());
    }

    struct Doubler {
        ports: Vec<PortDescriptor>,
    }

    impl NodePlugin for Doubler {
        fn name(&self) -> &str {
            "Doubler"
        }

        fn ports(&self) -> &[PortDescriptor] {
            &self.ports
        }

        fn execute(&mut self, ctx: &mut NodeContext) -> Result<()> {
            let value = ctx.input(0)?.as_scalar().unwrap_or_default();
            ctx.publish(0, DataObject::scalar(value * 2.0))
        }
    }

    #[test]
    fn test_plugin_dispatch() {
        let mut node = AnyNode::plugin(Doubler {
            ports: vec![
                PortDescriptor::input("value", PayloadKind::Scalar),
                PortDescriptor::output("doubled", PayloadKind::Scalar),
            ],
        });
        assert_eq!(node.name(), "Doubler");
        assert_eq!(node.ports().len(), 2);
        assert!(!node.always_modified());
        assert!(node.output_stream(0).is_none());

        let engine = ExecutionContext::default();
        let upstream = Arc::new(StaticSlot::new());
        upstream.set(FrameRef::new(0, 0, Arc::new(DataObject::scalar(21.0))));
        let inputs = vec![Some(InputSource {
            output: OutputSlot::Static(upstream),
            consumer: ConsumerId(1),
        })];
        let outputs = vec![OutputSlot::new_static()];
        let mut ctx = NodeContext::new(NodeId(0), &engine, &inputs, &outputs);
        node.execute(&mut ctx).unwrap();
        assert_eq!(ctx.current_output(0).and_then(|f| f.as_scalar()), Some(42.0));
    }
}
