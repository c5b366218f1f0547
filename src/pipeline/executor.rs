//! Pipeline executor: graph building and the pull-based update.
//!
//! Nodes live in an arena (`Vec<NodeSlot>`) indexed by [`NodeId`]. Updating
//! a node first updates everything upstream of it, then compares the
//! timestamp each input observes with the one it saw last time. The compute
//! body only runs when the node itself or one of its inputs changed:
//!
//! ```text
//! update(n):
//!   for each input i of n:
//!     update(upstream(i))
//!     wait for a pending frame on lossless streams
//!     parent_modified |= timestamp(i) != cursor(i)
//!   if n.modified || parent_modified: execute(n), stamp outputs
//! ```
//!
//! Updates run on the caller's thread. Stream sources and synchronizers
//! spawn their own threads; [`StopHandle`] stops all of them from anywhere.

use crate::context::ExecutionContext;
use crate::error::{FlowError, Result};
use crate::pipeline::bridge::{EdgeSnapshot, NodeSnapshot, Subscription, TopologySnapshot};
use crate::pipeline::data::DataObject;
use crate::pipeline::id::{EdgeId, NodeId};
use crate::pipeline::node::{AnyNode, BuiltinNode, NodeContext};
use crate::pipeline::output::{InputBinding, InputSource, OutputSlot};
use crate::pipeline::port::{check_connection, DataFlow, PortDescriptor};
use crate::pipeline::stream::StreamBuffer;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An edge connecting an output port of one node to an input port of another.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub from_node: NodeId,
    pub from_port: usize,
    pub to_node: NodeId,
    pub to_port: usize,
}

/// Wall-clock time spent in a node's compute body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionTiming {
    pub runs: u64,
    pub last: Duration,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl ExecutionTiming {
    fn record(&mut self, elapsed: Duration) {
        self.min = if self.runs == 0 { elapsed } else { self.min.min(elapsed) };
        self.max = self.max.max(elapsed);
        self.runs += 1;
        self.last = elapsed;
        self.total += elapsed;
    }

    pub fn average(&self) -> Duration {
        match u32::try_from(self.runs) {
            Ok(0) => Duration::ZERO,
            Ok(runs) => self.total / runs,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.runs as f64),
        }
    }
}

/// A slot holding a node, its port bindings and its output storage.
pub struct NodeSlot {
    pub node: AnyNode,
    /// Descriptor index of each input port, in input order.
    input_ports: Vec<usize>,
    /// Descriptor index of each output port, in output order.
    output_ports: Vec<usize>,
    inputs: Vec<Option<InputBinding>>,
    outputs: Vec<OutputSlot>,
    /// Per output: a stream the pipeline allocated, fed by `execute` on the
    /// updating thread rather than by a producer task.
    local_streams: Vec<bool>,
    modified: bool,
    timing: ExecutionTiming,
    /// Whether this node has been removed (slot is empty).
    pub deleted: bool,
}

impl NodeSlot {
    fn new(id: NodeId, node: AnyNode, ctx: &ExecutionContext) -> Result<Self> {
        let mut input_ports = Vec::new();
        let mut output_ports = Vec::new();
        for (i, port) in node.ports().iter().enumerate() {
            if port.is_input() {
                input_ports.push(i);
            } else {
                output_ports.push(i);
            }
        }

        let mut outputs = Vec::with_capacity(output_ports.len());
        let mut local_streams = Vec::with_capacity(output_ports.len());
        for (out, &desc) in output_ports.iter().enumerate() {
            let port = &node.ports()[desc];
            if port.flow != DataFlow::Stream {
                outputs.push(OutputSlot::new_static());
                local_streams.push(false);
                continue;
            }
            match node.output_stream(out) {
                Some(buffer) => {
                    outputs.push(OutputSlot::Stream(buffer));
                    local_streams.push(false);
                }
                None => {
                    let mode = port.mode.unwrap_or(ctx.config().stream.default_mode);
                    let buffer = ctx.create_default_stream(mode);
                    tracing::debug!(
                        "Node {} output {} gets stream {} ({:?})",
                        id,
                        out,
                        buffer.id(),
                        mode
                    );
                    outputs.push(OutputSlot::Stream(buffer));
                    local_streams.push(true);
                }
            }
        }

        Ok(Self {
            node,
            inputs: vec![None; input_ports.len()],
            input_ports,
            output_ports,
            outputs,
            local_streams,
            modified: true,
            timing: ExecutionTiming::default(),
            deleted: false,
        })
    }

    fn input_descriptor(&self, port: usize) -> Option<&PortDescriptor> {
        self.input_ports.get(port).map(|&i| &self.node.ports()[i])
    }

    fn output_descriptor(&self, port: usize) -> Option<&PortDescriptor> {
        self.output_ports.get(port).map(|&i| &self.node.ports()[i])
    }

    /// Self-modified: explicitly marked, or a node that runs on every update.
    fn self_modified(&self) -> bool {
        self.modified || self.node.always_modified()
    }

    fn local_outputs(&self) -> impl Iterator<Item = &Arc<StreamBuffer>> {
        self.outputs
            .iter()
            .zip(&self.local_streams)
            .filter(|(_, local)| **local)
            .filter_map(|(output, _)| output.as_stream())
    }

    /// A local stream output is full and a consumer still has to catch up.
    fn is_held_back(&self) -> bool {
        self.local_outputs().any(|buffer| buffer.is_congested())
    }
}

/// Cloneable handle that stops a pipeline from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    ctx: ExecutionContext,
}

impl StopHandle {
    /// Stop every stream of the pipeline; blocked calls fail with `StreamStopped`.
    pub fn stop(&self, message: impl Into<String>) {
        self.ctx.stop(message);
    }

    pub fn is_stopped(&self) -> bool {
        self.ctx.is_stopped()
    }
}

/// The pipeline graph and its executor.
pub struct Pipeline {
    ctx: ExecutionContext,
    nodes: Vec<NodeSlot>,
    /// Indexed by `EdgeId`; removed edges leave `None`.
    edges: Vec<Option<Edge>>,
    /// Topological order (indices into `nodes`). Recomputed on graph change.
    execution_order: Vec<usize>,
    /// True when execution_order needs recomputing (deferred topo sort).
    execution_order_dirty: bool,
}

impl Pipeline {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self {
            ctx,
            nodes: Vec::new(),
            edges: Vec::new(),
            execution_order: Vec::new(),
            execution_order_dirty: false,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            ctx: self.ctx.clone(),
        }
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|s| !s.deleted).count()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    // ── Graph building ──

    pub fn add_node(&mut self, node: impl Into<AnyNode>) -> Result<NodeId> {
        let id = NodeId(self.nodes.len() as u32);
        let slot = NodeSlot::new(id, node.into(), &self.ctx)?;
        tracing::info!("Added node {} ({})", id, slot.node.name());
        self.nodes.push(slot);
        self.execution_order_dirty = true;
        Ok(id)
    }

    fn live(&self, id: NodeId) -> Result<&NodeSlot> {
        match self.nodes.get(id.index()) {
            Some(slot) if !slot.deleted => Ok(slot),
            _ => Err(FlowError::InvalidEdge(format!("node {} does not exist", id))),
        }
    }

    fn live_mut(&mut self, id: NodeId) -> Result<&mut NodeSlot> {
        match self.nodes.get_mut(id.index()) {
            Some(slot) if !slot.deleted => Ok(slot),
            _ => Err(FlowError::InvalidEdge(format!("node {} does not exist", id))),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&AnyNode> {
        self.live(id).ok().map(|slot| &slot.node)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut AnyNode> {
        self.live_mut(id).ok().map(|slot| &mut slot.node)
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(AnyNode::name)
    }

    /// Connect output `from_port` of `from` to input `to_port` of `to`.
    ///
    /// Kinds and flows must match and the edge may not close a cycle. An
    /// input that is already bound is rebound.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: usize,
        to: NodeId,
        to_port: usize,
    ) -> Result<EdgeId> {
        if from == to {
            return Err(FlowError::InvalidEdge(
                "cannot connect node to itself".to_string(),
            ));
        }
        let output = self
            .live(from)?
            .output_descriptor(from_port)
            .ok_or(FlowError::InvalidPort {
                node: from,
                port: from_port,
            })?;
        let input = self
            .live(to)?
            .input_descriptor(to_port)
            .ok_or(FlowError::InvalidPort {
                node: to,
                port: to_port,
            })?;
        check_connection(output, input)?;

        if self.would_create_cycle(from, to) {
            return Err(FlowError::CycleDetected);
        }

        if let Some(previous) = self.nodes[to.index()].inputs[to_port] {
            self.disconnect(previous.edge)?;
        }

        let consumer = self.ctx.next_consumer_id();
        if let OutputSlot::Stream(buffer) = &self.nodes[from.index()].outputs[from_port] {
            buffer.register_consumer(consumer);
        }

        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Some(Edge {
            id,
            from_node: from,
            from_port,
            to_node: to,
            to_port,
        }));
        let target = &mut self.nodes[to.index()];
        target.inputs[to_port] = Some(InputBinding {
            edge: id,
            upstream: from,
            output: from_port,
            consumer,
            cursor: 0,
        });
        target.modified = true;
        self.execution_order_dirty = true;

        tracing::info!(
            "Added edge {:?}: {}:{} -> {}:{}",
            id,
            from,
            from_port,
            to,
            to_port
        );
        Ok(id)
    }

    /// Remove an edge. The target input becomes unbound.
    pub fn disconnect(&mut self, edge: EdgeId) -> Result<()> {
        let removed = self
            .edges
            .get_mut(edge.index())
            .and_then(Option::take)
            .ok_or_else(|| FlowError::InvalidEdge(format!("edge {:?} does not exist", edge)))?;

        if let Some(source) = self.nodes.get(removed.from_node.index()) {
            if let (Some(OutputSlot::Stream(buffer)), Some(Some(binding))) = (
                source.outputs.get(removed.from_port),
                self.nodes
                    .get(removed.to_node.index())
                    .and_then(|t| t.inputs.get(removed.to_port)),
            ) {
                buffer.unregister_consumer(binding.consumer);
            }
        }
        if let Some(target) = self.nodes.get_mut(removed.to_node.index()) {
            target.inputs[removed.to_port] = None;
            target.modified = true;
        }
        self.execution_order_dirty = true;
        tracing::info!("Removed edge {:?}", edge);
        Ok(())
    }

    /// Remove a node. Its background work is stopped and its streams end;
    /// nodes still reading from it fail with `DanglingReference` on update.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let incoming: Vec<EdgeId> = self
            .edges
            .iter()
            .flatten()
            .filter(|e| e.to_node == id)
            .map(|e| e.id)
            .collect();
        self.live(id)?;
        for edge in incoming {
            self.disconnect(edge)?;
        }

        let slot = &mut self.nodes[id.index()];
        slot.node.stop();
        for output in &slot.outputs {
            if let OutputSlot::Stream(buffer) = output {
                buffer.stop(format!("node {} was removed", id));
            }
        }
        slot.deleted = true;
        self.execution_order_dirty = true;
        tracing::info!("Removed node {}", id);
        Ok(())
    }

    /// Check if adding an edge from `from` to `to` would create a cycle.
    fn would_create_cycle(&self, from: NodeId, to: NodeId) -> bool {
        // If `to` can reach `from` through existing edges, adding from->to creates a cycle.
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![to];

        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            let idx = current.index();
            if idx >= self.nodes.len() || visited[idx] {
                continue;
            }
            visited[idx] = true;

            for edge in self.edges.iter().flatten() {
                if edge.from_node == current && !self.nodes[edge.to_node.index()].deleted {
                    stack.push(edge.to_node);
                }
            }
        }
        false
    }

    // ── Topological sort (Kahn's algorithm) ──

    pub fn flush_execution_order(&mut self) {
        if self.execution_order_dirty {
            self.recompute_execution_order();
            self.execution_order_dirty = false;
        }
    }

    fn recompute_execution_order(&mut self) {
        let n = self.nodes.len();
        let mut in_degree = vec![0u32; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

        for edge in self.edges.iter().flatten() {
            let from = edge.from_node.index();
            let to = edge.to_node.index();
            if from < n && to < n && !self.nodes[from].deleted && !self.nodes[to].deleted {
                adj[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut queue: Vec<usize> = (0..n)
            .filter(|&i| in_degree[i] == 0 && !self.nodes[i].deleted)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop() {
            order.push(node);
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(next);
                }
            }
        }

        let live = self.node_count();
        if order.len() != live {
            tracing::warn!(
                "Pipeline graph has a cycle! Only {} of {} nodes scheduled.",
                order.len(),
                live
            );
        }

        self.execution_order = order;
    }

    /// Live nodes in topological order.
    pub fn execution_order(&mut self) -> Vec<NodeId> {
        self.flush_execution_order();
        self.execution_order
            .iter()
            .map(|&i| NodeId(i as u32))
            .collect()
    }

    // ── Update ──

    /// Mark a node as modified so it runs on its next update.
    pub fn mark_modified(&mut self, id: NodeId) -> Result<()> {
        self.live_mut(id)?.modified = true;
        Ok(())
    }

    pub fn is_modified(&self, id: NodeId) -> Option<bool> {
        self.live(id).ok().map(|slot| slot.modified)
    }

    /// How many times the node's compute body has run.
    pub fn execution_count(&self, id: NodeId) -> Option<u64> {
        self.live(id).ok().map(|slot| slot.timing.runs)
    }

    /// Time spent in the node's compute body, over all successful runs.
    pub fn execution_timing(&self, id: NodeId) -> Option<ExecutionTiming> {
        self.live(id).ok().map(|slot| slot.timing)
    }

    /// Replace the value held by a `StaticSource` and mark it modified.
    pub fn set_static_data(&mut self, id: NodeId, data: DataObject) -> Result<()> {
        let slot = self.live_mut(id)?;
        match &mut slot.node {
            AnyNode::Builtin(BuiltinNode::StaticSource(source)) => source.set_data(data)?,
            other => {
                return Err(FlowError::InvalidState(format!(
                    "node {} ({}) is not a static source",
                    id,
                    other.name()
                )))
            }
        }
        slot.modified = true;
        Ok(())
    }

    /// Bring `id` and everything upstream of it up to date.
    ///
    /// Returns `Ok(true)` when the node's compute body ran and `Ok(false)`
    /// when nothing it depends on changed.
    pub fn update(&mut self, id: NodeId) -> Result<bool> {
        if let Some(message) = self.ctx.stop_message() {
            return Err(FlowError::stopped(message));
        }
        let idx = id.index();
        match self.nodes.get(idx) {
            Some(slot) if !slot.deleted => {}
            _ => {
                return Err(FlowError::DanglingReference {
                    node: id,
                    upstream: id,
                })
            }
        }

        if self.nodes[idx].is_held_back() {
            tracing::trace!("Node {} waits for its consumers", id);
            return Ok(false);
        }

        let mut parent_modified = false;
        for port in 0..self.nodes[idx].inputs.len() {
            let Some(binding) = self.nodes[idx].inputs[port] else {
                let required = self.nodes[idx]
                    .input_descriptor(port)
                    .is_some_and(|p| p.required);
                if required {
                    return Err(FlowError::MissingInput { node: id, port });
                }
                continue;
            };

            let upstream = binding.upstream;
            match self.nodes.get(upstream.index()) {
                Some(slot) if !slot.deleted => {}
                _ => {
                    return Err(FlowError::DanglingReference { node: id, upstream });
                }
            }
            let output = self.nodes[upstream.index()].outputs[binding.output].clone();
            let local = self.nodes[upstream.index()].local_streams[binding.output];
            // Frames already queued for this input are read before pulling more.
            let queued = output
                .as_stream()
                .is_some_and(|buffer| buffer.has_pending(binding.consumer));
            if !queued {
                self.update(upstream)?;
            }

            if let OutputSlot::Stream(buffer) = &output {
                // Local streams are filled by the update above; waiting on them
                // from this thread could never succeed.
                if buffer.mode().is_lossless() && !local && !self.nodes[idx].self_modified() {
                    buffer.wait_for_pending(binding.consumer)?;
                }
            }

            let stamp = output.timestamp_for(binding.consumer);
            if stamp != binding.cursor {
                parent_modified = true;
                if let Some(b) = self.nodes[idx].inputs[port].as_mut() {
                    b.cursor = stamp;
                }
            }
        }

        let slot = &mut self.nodes[idx];
        if let Err(err) = slot.node.poll() {
            return Err(Self::wrap(err, id, slot.node.name()));
        }

        let executed = if slot.self_modified() || parent_modified {
            self.execute(idx)?;
            true
        } else {
            tracing::trace!("Node {} ({}) is up to date", id, slot.node.name());
            false
        };
        self.propagate_end(idx);
        Ok(executed)
    }

    /// End the local streams of a node once every stream it reads is over.
    fn propagate_end(&self, idx: usize) {
        let slot = &self.nodes[idx];
        if slot.local_outputs().all(|buffer| buffer.is_ended()) {
            return;
        }
        let mut stream_inputs = 0;
        for binding in slot.inputs.iter().flatten() {
            let Some(upstream) = self.nodes.get(binding.upstream.index()) else {
                return;
            };
            if let Some(buffer) = upstream.outputs[binding.output].as_stream() {
                if !buffer.has_consumed_all(binding.consumer) {
                    return;
                }
                stream_inputs += 1;
            }
        }
        if stream_inputs == 0 {
            return;
        }
        for buffer in slot.local_outputs() {
            buffer.mark_end();
        }
        tracing::debug!("Node {} ({}) reached the end of its inputs", idx, slot.node.name());
    }

    fn wrap(err: FlowError, id: NodeId, name: &str) -> FlowError {
        if err.is_stop() {
            err
        } else {
            err.with_context(format!("node {} ({})", id, name))
        }
    }

    fn execute(&mut self, idx: usize) -> Result<()> {
        let id = NodeId(idx as u32);
        let sources: Vec<Option<InputSource>> = self.nodes[idx]
            .inputs
            .iter()
            .map(|binding| {
                binding.map(|b| InputSource {
                    output: self.nodes[b.upstream.index()].outputs[b.output].clone(),
                    consumer: b.consumer,
                })
            })
            .collect();

        let engine = self.ctx.clone();
        let NodeSlot {
            node,
            outputs,
            modified,
            timing,
            ..
        } = &mut self.nodes[idx];

        *modified = false;
        let mut ctx = NodeContext::new(id, &engine, &sources, outputs);
        let started = Instant::now();
        let result = node.execute(&mut ctx);
        let elapsed = started.elapsed();
        let rerun = ctx.rerun_requested();

        if let Err(err) = result {
            if !err.is_stop() {
                // Retry on the next update.
                *modified = true;
                tracing::warn!("Node {} ({}) failed: {}", id, node.name(), err);
            }
            return Err(Self::wrap(err, id, node.name()));
        }

        let stamp = engine.next_timestamp();
        for output in outputs.iter() {
            if let OutputSlot::Static(slot) = output {
                slot.touch(stamp);
            }
        }
        timing.record(elapsed);
        *modified = rerun;
        tracing::debug!(
            "Executed node {} ({}), run {} in {:?}",
            id,
            node.name(),
            timing.runs,
            elapsed
        );
        Ok(())
    }

    /// Update every sink (node without outgoing edges) in topological order.
    /// Returns how many sinks executed.
    pub fn update_all(&mut self) -> Result<usize> {
        self.flush_execution_order();
        let sinks: Vec<NodeId> = self
            .execution_order
            .iter()
            .map(|&i| NodeId(i as u32))
            .filter(|id| {
                !self
                    .edges
                    .iter()
                    .flatten()
                    .any(|e| e.from_node == *id && !self.nodes[e.to_node.index()].deleted)
            })
            .collect();

        let mut executed = 0;
        for sink in sinks {
            if self.update(sink)? {
                executed += 1;
            }
        }
        Ok(executed)
    }

    // ── Consumers ──

    /// Stream buffer behind an output port, if the port is a stream.
    pub fn stream(&self, id: NodeId, port: usize) -> Option<Arc<StreamBuffer>> {
        self.live(id)
            .ok()?
            .outputs
            .get(port)?
            .as_stream()
            .cloned()
    }

    /// Register an external reader on an output port.
    pub fn subscribe(&mut self, id: NodeId, port: usize) -> Result<Subscription> {
        let output = self
            .live(id)?
            .outputs
            .get(port)
            .cloned()
            .ok_or(FlowError::InvalidPort { node: id, port })?;
        let consumer = self.ctx.next_consumer_id();
        Ok(Subscription::new(id, port, output, consumer))
    }

    /// Stop every stream and every node with background work.
    pub fn stop(&mut self, message: impl Into<String>) {
        self.ctx.stop(message);
        self.stop_nodes();
    }

    fn stop_nodes(&mut self) {
        for slot in self.nodes.iter_mut().filter(|s| !s.deleted) {
            slot.node.stop();
        }
    }

    pub fn topology(&self) -> TopologySnapshot {
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.deleted)
            .map(|(i, slot)| NodeSnapshot {
                id: NodeId(i as u32),
                name: slot.node.name().to_string(),
                ports: slot.node.ports().to_vec(),
                modified: slot.modified,
                execution_count: slot.timing.runs,
                timing: slot.timing,
                streams: slot
                    .outputs
                    .iter()
                    .filter_map(OutputSlot::as_stream)
                    .map(|buffer| buffer.stats())
                    .collect(),
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .flatten()
            .map(|e| EdgeSnapshot {
                id: e.id,
                from_node: e.from_node,
                from_port: e.from_port,
                to_node: e.to_node,
                to_port: e.to_port,
            })
            .collect();
        TopologySnapshot { nodes, edges }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop_nodes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pipeline::data::PayloadKind;
    use crate::pipeline::nodes::{FnNode, StaticSource};
    use crate::pipeline::stream::StreamingMode;

    fn passthrough() -> FnNode {
        FnNode::map("pass", PayloadKind::Any, PayloadKind::Any, |f| {
            Ok(DataObject::clone(f.data()))
        })
    }

    #[test]
    fn test_topological_sort_linear() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());

        // A → B → C
        let a = pipeline.add_node(StaticSource::new(DataObject::scalar(1.0))).unwrap();
        let b = pipeline.add_node(passthrough()).unwrap();
        let c = pipeline.add_node(passthrough()).unwrap();
        pipeline.connect(a, 0, b, 0).unwrap();
        pipeline.connect(b, 0, c, 0).unwrap();

        let order = pipeline.execution_order();
        assert_eq!(order.len(), 3);
        let pos = |nid: NodeId| order.iter().position(|&x| x == nid).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn test_topological_sort_diamond() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());

        // Diamond: A → B, A → C, B → D, C → D
        let a = pipeline.add_node(StaticSource::new(DataObject::scalar(1.0))).unwrap();
        let b = pipeline.add_node(passthrough()).unwrap();
        let c = pipeline.add_node(passthrough()).unwrap();
        let d = pipeline
            .add_node(FnNode::new(
                "join",
                vec![
                    PortDescriptor::input("left", PayloadKind::Any),
                    PortDescriptor::input("right", PayloadKind::Any),
                ],
                |_| Ok(()),
            ))
            .unwrap();
        pipeline.connect(a, 0, b, 0).unwrap();
        pipeline.connect(a, 0, c, 0).unwrap();
        pipeline.connect(b, 0, d, 0).unwrap();
        pipeline.connect(c, 0, d, 1).unwrap();

        let order = pipeline.execution_order();
        assert_eq!(order.len(), 4);
        let pos = |nid: NodeId| order.iter().position(|&x| x == nid).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
    }

    #[test]
    fn test_cycle_and_self_loop_rejected() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());
        let a = pipeline.add_node(passthrough()).unwrap();
        let b = pipeline.add_node(passthrough()).unwrap();
        pipeline.connect(a, 0, b, 0).unwrap();
        assert!(matches!(pipeline.connect(b, 0, a, 0), Err(FlowError::CycleDetected)));
        assert!(matches!(pipeline.connect(a, 0, a, 0), Err(FlowError::InvalidEdge(_))));
        assert!(matches!(
            pipeline.connect(a, 3, b, 0),
            Err(FlowError::InvalidPort { port: 3, .. })
        ));
    }

    #[test]
    fn test_rebinding_replaces_edge() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());
        let a = pipeline.add_node(StaticSource::new(DataObject::scalar(1.0))).unwrap();
        let b = pipeline.add_node(StaticSource::new(DataObject::scalar(2.0))).unwrap();
        let c = pipeline.add_node(passthrough()).unwrap();
        pipeline.connect(a, 0, c, 0).unwrap();
        pipeline.connect(b, 0, c, 0).unwrap();
        assert_eq!(pipeline.edge_count(), 1);

        assert!(pipeline.update(c).unwrap());
        let sub = pipeline.subscribe(c, 0).unwrap();
        assert_eq!(sub.latest().and_then(|f| f.as_scalar()), Some(2.0));
    }

    #[test]
    fn test_set_static_data_requires_static_source() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());
        let a = pipeline.add_node(StaticSource::new(DataObject::scalar(1.0))).unwrap();
        let b = pipeline.add_node(passthrough()).unwrap();
        pipeline.connect(a, 0, b, 0).unwrap();
        pipeline.update(b).unwrap();
        assert_eq!(pipeline.is_modified(a), Some(false));

        pipeline.set_static_data(a, DataObject::scalar(9.0)).unwrap();
        assert_eq!(pipeline.is_modified(a), Some(true));
        assert!(matches!(
            pipeline.set_static_data(b, DataObject::scalar(0.0)),
            Err(FlowError::InvalidState(_))
        ));
    }

    #[test]
    fn test_failed_node_retries() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());
        let mut attempts = 0;
        let flaky = pipeline
            .add_node(FnNode::new("flaky", Vec::new(), move |_| {
                attempts += 1;
                if attempts == 1 {
                    Err(anyhow::anyhow!("first attempt fails").into())
                } else {
                    Ok(())
                }
            }))
            .unwrap();

        let err = pipeline.update(flaky).unwrap_err();
        assert!(err.to_string().contains("flaky"));
        assert!(pipeline.update(flaky).unwrap());
        assert!(!pipeline.update(flaky).unwrap());
        assert_eq!(pipeline.execution_count(flaky), Some(1));
    }

    #[test]
    fn test_requested_rerun_executes_again() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());
        let mut runs = 0;
        let settling = pipeline
            .add_node(FnNode::new("settling", Vec::new(), move |ctx| {
                runs += 1;
                if runs < 3 {
                    ctx.request_rerun();
                }
                Ok(())
            }))
            .unwrap();

        assert!(pipeline.update(settling).unwrap());
        assert_eq!(pipeline.is_modified(settling), Some(true));
        assert!(pipeline.update(settling).unwrap());
        assert!(pipeline.update(settling).unwrap());
        assert!(!pipeline.update(settling).unwrap());
        assert_eq!(pipeline.execution_count(settling), Some(3));
    }

    #[test]
    fn test_execution_timing_recorded() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());
        let a = pipeline.add_node(StaticSource::new(DataObject::scalar(1.0))).unwrap();
        let slow = pipeline
            .add_node(FnNode::map("slow", PayloadKind::Any, PayloadKind::Any, |f| {
                std::thread::sleep(Duration::from_millis(5));
                Ok(DataObject::clone(f.data()))
            }))
            .unwrap();
        pipeline.connect(a, 0, slow, 0).unwrap();
        assert_eq!(pipeline.execution_timing(slow), Some(ExecutionTiming::default()));

        pipeline.update(slow).unwrap();
        pipeline.set_static_data(a, DataObject::scalar(2.0)).unwrap();
        pipeline.update(slow).unwrap();

        let timing = pipeline.execution_timing(slow).unwrap();
        assert_eq!(timing.runs, 2);
        assert!(timing.last >= Duration::from_millis(5));
        assert!(timing.total >= Duration::from_millis(10));
        assert!(timing.min <= timing.max);
        assert!(timing.average() >= timing.min && timing.average() <= timing.max);

        // Skipped updates are not timed.
        assert!(!pipeline.update(slow).unwrap());
        assert_eq!(pipeline.execution_timing(slow).map(|t| t.runs), Some(2));
    }

    #[test]
    fn test_failed_run_not_timed() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());
        let broken = pipeline
            .add_node(FnNode::new("broken", Vec::new(), |_| Err(anyhow::anyhow!("nope").into())))
            .unwrap();
        assert!(pipeline.update(broken).is_err());
        assert_eq!(pipeline.execution_timing(broken).map(|t| t.runs), Some(0));
    }

    #[test]
    fn test_stream_output_uses_configured_mode() {
        let mut config = EngineConfig::default();
        config.stream.default_mode = StreamingMode::NewestFrameOnly;
        let mut pipeline = Pipeline::new(ExecutionContext::new(config));

        let plain = pipeline
            .add_node(FnNode::new(
                "plain",
                vec![PortDescriptor::stream_output("out", PayloadKind::Any)],
                |_| Ok(()),
            ))
            .unwrap();
        let explicit = pipeline
            .add_node(passthrough().streaming(StreamingMode::ProcessAllFrames))
            .unwrap();

        let mode = |id| pipeline.stream(id, 0).map(|b| b.mode());
        assert_eq!(mode(plain), Some(StreamingMode::NewestFrameOnly));
        assert_eq!(mode(explicit), Some(StreamingMode::ProcessAllFrames));
    }

    #[test]
    fn test_topology_snapshot() {
        let mut pipeline = Pipeline::new(ExecutionContext::default());
        let a = pipeline.add_node(StaticSource::new(DataObject::scalar(1.0))).unwrap();
        let b = pipeline.add_node(passthrough()).unwrap();
        pipeline.connect(a, 0, b, 0).unwrap();
        pipeline.remove_node(b).unwrap();

        let topology = pipeline.topology();
        assert_eq!(topology.nodes.len(), 1);
        assert!(topology.edges.is_empty());
        assert_eq!(topology.nodes[0].name, "StaticSource");
    }
}
