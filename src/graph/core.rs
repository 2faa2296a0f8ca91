// Core graph implementation module

use std::collections::{BTreeSet, HashMap};

use log::{debug, trace};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::error::{Error, Result};
use crate::model::{self, DataType, Dimension, Tensor};

use super::node::{Node, NodeIndex};
use super::node_arg::{NodeArg, NodeArgRole};

/// Derived connection from a producer's output slot to a consumer's input slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src_node: NodeIndex,
    pub src_arg_index: usize,
    pub dst_node: NodeIndex,
    pub dst_arg_index: usize,
    pub arg_name: String,
}

/// Mutable computation graph
///
/// Nodes live in an arena addressed by [`NodeIndex`]. Removing a node leaves
/// a tombstone, so indices of surviving nodes never change and a removed
/// index is never handed out again. Producer and consumer maps are kept in
/// sync by every mutation method; edges are computed from them on demand.
///
/// The graph has no interior locking: whoever holds `&mut Graph` during an
/// optimization pass is its only reader and writer.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,
    nodes: Vec<Option<Node>>,
    num_live_nodes: usize,
    node_args: HashMap<String, NodeArg>,
    initializers: HashMap<String, Tensor>,
    graph_inputs: Vec<String>,
    graph_outputs: Vec<String>,
    /// NodeArg name -> (producing node, output slot)
    producers: HashMap<String, (NodeIndex, usize)>,
    /// NodeArg name -> consuming nodes
    consumers: HashMap<String, BTreeSet<NodeIndex>>,
}

impl Graph {
    /// Create an empty graph
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ---------------------------------------------------------------------
    // Graph inputs and outputs
    // ---------------------------------------------------------------------

    /// Declare a graph input
    pub fn add_input(&mut self, name: &str, data_type: DataType, shape: Option<Vec<Dimension>>) -> Result<()> {
        if self.graph_inputs.iter().any(|n| n == name) {
            return Err(Error::InvalidGraph(format!("Duplicate graph input '{}'", name)));
        }

        let arg = self.get_or_create_node_arg(name, data_type);
        arg.set_data_type(data_type);
        if let Some(shape) = shape {
            arg.set_shape(shape);
        }
        // An initializer may double as an overridable graph input
        if arg.role() != NodeArgRole::Initializer {
            arg.set_role(NodeArgRole::GraphInput);
        }

        self.graph_inputs.push(name.to_string());
        Ok(())
    }

    /// Declare a graph output
    pub fn add_output(&mut self, name: &str) -> Result<()> {
        if self.graph_outputs.iter().any(|n| n == name) {
            return Err(Error::InvalidGraph(format!("Duplicate graph output '{}'", name)));
        }

        let arg = self.get_or_create_node_arg(name, DataType::Undefined);
        // Inputs and constants may be exposed as outputs without changing origin
        if arg.role() == NodeArgRole::Intermediate {
            arg.set_role(NodeArgRole::GraphOutput);
        }
        self.graph_outputs.push(name.to_string());
        Ok(())
    }

    pub fn graph_inputs(&self) -> &[String] {
        &self.graph_inputs
    }

    pub fn graph_outputs(&self) -> &[String] {
        &self.graph_outputs
    }

    pub fn is_graph_input(&self, name: &str) -> bool {
        self.graph_inputs.iter().any(|n| n == name)
    }

    pub fn is_graph_output(&self, name: &str) -> bool {
        self.graph_outputs.iter().any(|n| n == name)
    }

    /// Whether any output of the node is a declared graph output
    pub fn is_node_outputs_in_graph_outputs(&self, node: &Node) -> bool {
        node.output_defs.iter().any(|o| self.is_graph_output(o))
    }

    // ---------------------------------------------------------------------
    // NodeArgs
    // ---------------------------------------------------------------------

    /// Fetch a NodeArg by name, creating an intermediate one if absent
    pub fn get_or_create_node_arg(&mut self, name: &str, data_type: DataType) -> &mut NodeArg {
        let arg = self
            .node_args
            .entry(name.to_string())
            .or_insert_with(|| NodeArg::new(name, data_type, NodeArgRole::Intermediate));

        if arg.data_type() == DataType::Undefined && data_type != DataType::Undefined {
            arg.set_data_type(data_type);
        }
        arg
    }

    pub fn node_arg(&self, name: &str) -> Option<&NodeArg> {
        self.node_args.get(name)
    }

    pub fn node_arg_mut(&mut self, name: &str) -> Option<&mut NodeArg> {
        self.node_args.get_mut(name)
    }

    /// Overwrite the shape of an existing NodeArg
    pub fn set_node_arg_shape(&mut self, name: &str, shape: Vec<Dimension>) -> bool {
        match self.node_args.get_mut(name) {
            Some(arg) => {
                arg.set_shape(shape);
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------------

    /// Insert a loader node, returning its freshly assigned index
    pub fn add_node(&mut self, node: &model::Node, since_version: i64) -> Result<NodeIndex> {
        for output in node.outputs.iter().filter(|o| !o.is_empty()) {
            if let Some(&(producer, _)) = self.producers.get(output) {
                return Err(Error::InvalidGraph(format!(
                    "Output '{}' of node '{}' is already produced by node {}",
                    output, node.name, producer
                )));
            }
            if self.initializers.contains_key(output) || self.is_graph_input(output) {
                return Err(Error::InvalidGraph(format!(
                    "Node '{}' writes to '{}', which is a graph input or initializer",
                    node.name, output
                )));
            }
        }

        let index = self.nodes.len();

        for name in node.inputs.iter().chain(node.outputs.iter()).filter(|n| !n.is_empty()) {
            self.get_or_create_node_arg(name, DataType::Undefined);
        }
        for name in node.inputs.iter().filter(|n| !n.is_empty()) {
            self.consumers.entry(name.clone()).or_default().insert(index);
        }
        for (slot, name) in node.outputs.iter().enumerate().filter(|(_, n)| !n.is_empty()) {
            self.producers.insert(name.clone(), (index, slot));
        }

        self.nodes.push(Some(Node {
            index,
            name: node.name.clone(),
            op_type: node.op_type.clone(),
            domain: node.domain.clone(),
            since_version,
            input_defs: node.inputs.clone(),
            output_defs: node.outputs.clone(),
            input_args_count: vec![1; node.inputs.len()],
            execution_provider: String::new(),
            attributes: node.attributes.clone(),
        }));
        self.num_live_nodes += 1;

        Ok(index)
    }

    /// Resolve a live node; `None` for removed or out-of-range indices
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index).and_then(Option::as_ref)
    }

    /// Mutable access to a live node's attributes and provider tag
    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        self.nodes.get_mut(index).and_then(Option::as_mut)
    }

    pub fn is_live(&self, index: NodeIndex) -> bool {
        self.node(index).is_some()
    }

    /// Snapshot of live node indices in ascending order
    pub fn node_indices(&self) -> Vec<NodeIndex> {
        self.nodes.iter().flatten().map(|n| n.index).collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    /// Number of live nodes
    pub fn num_nodes(&self) -> usize {
        self.num_live_nodes
    }

    /// Tombstone a node and drop its wiring
    ///
    /// Consumers that still name one of its outputs keep the name but lose
    /// the edge; callers rewire them first (see
    /// [`utils::remove_single_input_node`](super::utils::remove_single_input_node)).
    pub fn remove_node(&mut self, index: NodeIndex) -> bool {
        let node = match self.nodes.get_mut(index).and_then(Option::take) {
            Some(node) => node,
            None => return false,
        };
        self.num_live_nodes -= 1;

        for input in node.input_defs.iter().filter(|n| !n.is_empty()) {
            self.unregister_consumer(input, index);
        }

        for output in node.output_defs.iter().filter(|n| !n.is_empty()) {
            if self.producers.get(output).map(|&(p, _)| p) == Some(index) {
                self.producers.remove(output);
            }
            let orphaned = !self.consumers.contains_key(output)
                && !self.is_graph_output(output)
                && !self.initializers.contains_key(output);
            if orphaned {
                self.node_args.remove(output);
            }
        }

        debug!("Removed node {} ('{}', {})", index, node.name, node.op_type);
        true
    }

    /// Append a NodeArg to a node's inputs together with its arity count
    pub fn add_node_input(&mut self, index: NodeIndex, name: &str, arg_count: usize) -> Result<()> {
        let node = self.live_node_mut(index)?;
        node.input_defs.push(name.to_string());
        node.input_args_count.push(arg_count);

        self.get_or_create_node_arg(name, DataType::Undefined);
        self.consumers.entry(name.to_string()).or_default().insert(index);
        Ok(())
    }

    /// Point one input slot of a node at a different NodeArg
    pub fn replace_node_input(&mut self, index: NodeIndex, slot: usize, name: &str) -> Result<()> {
        let node = self.live_node_mut(index)?;
        let old = node
            .input_defs
            .get_mut(slot)
            .map(|def| std::mem::replace(def, name.to_string()))
            .ok_or_else(|| Error::InvalidNode(format!("Node {} has no input slot {}", index, slot)))?;
        let still_referenced = node.input_defs.iter().any(|d| *d == old);

        if !still_referenced && !old.is_empty() {
            self.unregister_consumer(&old, index);
        }
        self.get_or_create_node_arg(name, DataType::Undefined);
        self.consumers.entry(name.to_string()).or_default().insert(index);

        trace!("Node {} input {} rewired from '{}' to '{}'", index, slot, old, name);
        Ok(())
    }

    fn live_node_mut(&mut self, index: NodeIndex) -> Result<&mut Node> {
        self.node_mut(index)
            .ok_or_else(|| Error::InvalidNode(format!("Node {} does not exist", index)))
    }

    fn unregister_consumer(&mut self, name: &str, index: NodeIndex) {
        if let Some(set) = self.consumers.get_mut(name) {
            set.remove(&index);
            if set.is_empty() {
                self.consumers.remove(name);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Initializers
    // ---------------------------------------------------------------------

    /// Look up an initializer by NodeArg name
    pub fn initializer(&self, name: &str) -> Option<&Tensor> {
        self.initializers.get(name)
    }

    pub fn is_initializer(&self, name: &str) -> bool {
        self.initializers.contains_key(name)
    }

    pub fn initializers(&self) -> impl Iterator<Item = &Tensor> {
        self.initializers.values()
    }

    /// Register a named constant tensor
    ///
    /// The backing NodeArg takes the tensor's element type; its shape is only
    /// filled in when not already declared.
    pub fn add_initializer(&mut self, tensor: Tensor) -> Result<()> {
        if tensor.name.is_empty() {
            return Err(Error::MissingField("Initializer is missing a name".to_string()));
        }
        if self.producers.contains_key(&tensor.name) {
            return Err(Error::InvalidGraph(format!(
                "Initializer '{}' collides with a node output",
                tensor.name
            )));
        }

        let arg = self.get_or_create_node_arg(&tensor.name, tensor.data_type);
        arg.set_data_type(tensor.data_type);
        arg.set_role(NodeArgRole::Initializer);
        if arg.shape().is_none() {
            arg.set_shape(model::static_shape(&tensor.dims));
        }

        self.initializers.insert(tensor.name.clone(), tensor);
        Ok(())
    }

    /// Swap an existing initializer for a new tensor of the same name and type
    pub fn replace_initializer(&mut self, tensor: Tensor) -> Result<Tensor> {
        let old_type = match self.initializers.get(&tensor.name) {
            Some(old) => old.data_type,
            None => {
                return Err(Error::InvalidGraph(format!(
                    "Cannot replace unknown initializer '{}'",
                    tensor.name
                )))
            }
        };
        if old_type != tensor.data_type {
            return Err(Error::InvalidGraph(format!(
                "Replacement for initializer '{}' changes its type from {:?} to {:?}",
                tensor.name, old_type, tensor.data_type
            )));
        }

        let name = tensor.name.clone();
        let old = self.initializers.insert(name, tensor);
        old.ok_or_else(|| Error::InvalidGraph("initializer vanished during replacement".to_string()))
    }

    /// Drop an initializer
    ///
    /// A NodeArg nobody references any more goes with it; one that is still
    /// read becomes plain data.
    pub fn remove_initializer(&mut self, name: &str) -> Option<Tensor> {
        let removed = self.initializers.remove(name)?;

        let role = if self.is_graph_input(name) {
            Some(NodeArgRole::GraphInput)
        } else if self.consumers.contains_key(name) || self.is_graph_output(name) {
            Some(NodeArgRole::Intermediate)
        } else {
            None
        };
        match role {
            Some(role) => {
                if let Some(arg) = self.node_args.get_mut(name) {
                    arg.set_role(role);
                }
            }
            None => {
                self.node_args.remove(name);
            }
        }

        Some(removed)
    }

    // ---------------------------------------------------------------------
    // Topology
    // ---------------------------------------------------------------------

    /// Node that produces the named NodeArg
    pub fn producer_of(&self, name: &str) -> Option<NodeIndex> {
        self.producers.get(name).map(|&(index, _)| index)
    }

    /// Nodes reading the named NodeArg, in index order
    pub fn consumers_of(&self, name: &str) -> Vec<NodeIndex> {
        self.consumers
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Edges arriving at a node, ordered by input slot
    pub fn input_edges(&self, index: NodeIndex) -> Vec<Edge> {
        let node = match self.node(index) {
            Some(node) => node,
            None => return Vec::new(),
        };

        node.input_defs
            .iter()
            .enumerate()
            .filter_map(|(slot, name)| {
                self.producers.get(name).map(|&(src, src_slot)| Edge {
                    src_node: src,
                    src_arg_index: src_slot,
                    dst_node: index,
                    dst_arg_index: slot,
                    arg_name: name.clone(),
                })
            })
            .collect()
    }

    /// Edges leaving a node, one per consumer input slot
    pub fn output_edges(&self, index: NodeIndex) -> Vec<Edge> {
        let node = match self.node(index) {
            Some(node) => node,
            None => return Vec::new(),
        };

        let mut edges = Vec::new();
        for (src_slot, name) in node.output_defs.iter().enumerate() {
            for dst in self.consumers_of(name) {
                let consumer = match self.node(dst) {
                    Some(consumer) => consumer,
                    None => continue,
                };
                for (dst_slot, input) in consumer.input_defs.iter().enumerate() {
                    if input == name {
                        edges.push(Edge {
                            src_node: index,
                            src_arg_index: src_slot,
                            dst_node: dst,
                            dst_arg_index: dst_slot,
                            arg_name: name.clone(),
                        });
                    }
                }
            }
        }
        edges
    }

    pub fn input_edges_count(&self, index: NodeIndex) -> usize {
        self.input_edges(index).len()
    }

    pub fn output_edges_count(&self, index: NodeIndex) -> usize {
        self.output_edges(index).len()
    }

    /// Distinct producers feeding a node
    pub fn input_nodes(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let set: BTreeSet<NodeIndex> = self.input_edges(index).iter().map(|e| e.src_node).collect();
        set.into_iter().collect()
    }

    /// Distinct consumers fed by a node
    pub fn output_nodes(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let set: BTreeSet<NodeIndex> = self.output_edges(index).iter().map(|e| e.dst_node).collect();
        set.into_iter().collect()
    }

    /// Live node indices ordered so every producer precedes its consumers
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>> {
        let mut dag = DiGraph::<NodeIndex, ()>::new();
        let mut handles = HashMap::new();

        for node in self.nodes() {
            handles.insert(node.index, dag.add_node(node.index));
        }
        for node in self.nodes() {
            for edge in self.output_edges(node.index) {
                dag.add_edge(handles[&edge.src_node], handles[&edge.dst_node], ());
            }
        }

        toposort(&dag, None)
            .map(|order| order.into_iter().map(|h| dag[h]).collect())
            .map_err(|cycle| {
                Error::InvalidGraph(format!("Graph contains a cycle through node {}", dag[cycle.node_id()]))
            })
    }

    /// Check the structural invariants downstream stages rely on
    pub fn validate(&self) -> Result<()> {
        for (name, &(index, slot)) in &self.producers {
            let produces = self
                .node(index)
                .map_or(false, |n| n.output_defs.get(slot).map_or(false, |o| o == name));
            if !produces {
                return Err(Error::InvalidGraph(format!(
                    "Stale producer entry for '{}' pointing at node {}",
                    name, index
                )));
            }
        }

        for (name, set) in &self.consumers {
            for &index in set {
                let consumes = self
                    .node(index)
                    .map_or(false, |n| n.input_defs.iter().any(|i| i == name));
                if !consumes {
                    return Err(Error::InvalidGraph(format!(
                        "Stale consumer entry for '{}' pointing at node {}",
                        name, index
                    )));
                }
            }
        }

        for node in self.nodes() {
            if node.input_defs.len() != node.input_args_count.len() {
                return Err(Error::InvalidGraph(format!(
                    "Node {} has {} inputs but {} arity counts",
                    node.index,
                    node.input_defs.len(),
                    node.input_args_count.len()
                )));
            }
        }

        for tensor in self.initializers.values() {
            let declared = self.node_args.get(&tensor.name).map(NodeArg::data_type);
            if declared != Some(tensor.data_type) {
                return Err(Error::InvalidGraph(format!(
                    "Initializer '{}' is {:?} but its NodeArg declares {:?}",
                    tensor.name, tensor.data_type, declared
                )));
            }
        }

        for output in &self.graph_outputs {
            let resolvable = self.producers.contains_key(output)
                || self.is_graph_input(output)
                || self.initializers.contains_key(output);
            if !resolvable {
                return Err(Error::InvalidGraph(format!(
                    "Graph output '{}' is not produced by any node",
                    output
                )));
            }
        }

        Ok(())
    }
}
