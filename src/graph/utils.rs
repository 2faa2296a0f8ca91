//! Helpers shared by rewrite rules: operator matching, provider gating and
//! the single-input splice-out primitive.

use std::collections::HashSet;

use log::debug;

use super::{Graph, Node, NodeIndex};

/// Domain string of the default ONNX operator set
pub const ONNX_DOMAIN: &str = "";

/// Check op type, domain and that the node's since-version is one of `versions`
pub fn is_supported_optype_version_and_domain(node: &Node, op_type: &str, versions: &[i64], domain: &str) -> bool {
    node.op_type() == op_type && node.domain() == domain && versions.contains(&node.since_version())
}

/// An empty provider set accepts every node
pub fn is_supported_provider(node: &Node, compatible_providers: &HashSet<String>) -> bool {
    compatible_providers.is_empty() || compatible_providers.contains(node.execution_provider())
}

/// The NodeArg that replaces a spliced node's output, if the node can be spliced
///
/// A node qualifies when it has one output, does not feed a graph output and
/// has at most one input edge. With one edge the producer's output takes over;
/// with none the node's first input (a graph input or initializer) does.
fn splice_replacement(graph: &Graph, index: NodeIndex) -> Option<String> {
    let node = graph.node(index)?;
    if node.output_defs().len() != 1 || graph.is_node_outputs_in_graph_outputs(node) {
        return None;
    }

    let input_edges = graph.input_edges(index);
    match input_edges.len() {
        0 => node.input_defs().first().filter(|name| !name.is_empty()).cloned(),
        1 => Some(input_edges[0].arg_name.clone()),
        _ => None,
    }
}

/// Whether [`remove_single_input_node`] would succeed on this node
pub fn can_remove_single_input_node(graph: &Graph, index: NodeIndex) -> bool {
    splice_replacement(graph, index).is_some()
}

/// Remove a single-input node and reconnect its consumers to its input
///
/// Returns `false` and leaves the graph untouched when the node does not
/// satisfy the preconditions of [`can_remove_single_input_node`].
pub fn remove_single_input_node(graph: &mut Graph, index: NodeIndex) -> bool {
    let replacement = match splice_replacement(graph, index) {
        Some(name) => name,
        None => return false,
    };
    let output = match graph.node(index) {
        Some(node) => node.output_defs()[0].clone(),
        None => return false,
    };

    for edge in graph.output_edges(index) {
        // Slots were just read from a live consumer, so the rewire cannot fail
        if graph.replace_node_input(edge.dst_node, edge.dst_arg_index, &replacement).is_err() {
            return false;
        }
    }

    debug!("Spliced out node {}: '{}' now reads '{}'", index, output, replacement);
    graph.remove_node(index)
}
