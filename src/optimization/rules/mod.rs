// Concrete rewrite rules
//
// Fusions fold a constant consumer into its producer's initializers;
// eliminations splice out nodes that provably copy their input.

pub mod conv_add_fusion;
pub mod conv_mul_fusion;
pub mod identity_elimination;
pub mod slice_elimination;
pub mod unsqueeze_elimination;

pub use conv_add_fusion::ConvAddFusion;
pub use conv_mul_fusion::ConvMulFusion;
pub use identity_elimination::EliminateIdentity;
pub use slice_elimination::EliminateSlice;
pub use unsqueeze_elimination::EliminateUnsqueeze;

use crate::graph::utils::{is_supported_optype_version_and_domain, ONNX_DOMAIN};
use crate::graph::{Graph, Node, NodeIndex};
use crate::optimization::rewrite_rule::RewriteRule;

/// Conv schema versions the fusions understand
pub(crate) const CONV_VERSIONS: &[i64] = &[1, 11];

/// Rules that only remove nodes
pub fn elimination_rules() -> Vec<Box<dyn RewriteRule>> {
    vec![
        Box::new(EliminateIdentity::new()),
        Box::new(EliminateSlice::new()),
        Box::new(EliminateUnsqueeze::new()),
    ]
}

/// Rules that merge a constant consumer into its producer
pub fn fusion_rules() -> Vec<Box<dyn RewriteRule>> {
    vec![Box::new(ConvAddFusion::new()), Box::new(ConvMulFusion::new())]
}

/// Shared condition of the Conv fusions: the Conv feeds exactly one
/// `op_type` node on the same provider, and neither exposes a graph output
pub(crate) fn conv_with_single_consumer<'g>(
    graph: &'g Graph,
    conv: &Node,
    op_type: &str,
    versions: &[i64],
) -> Option<&'g Node> {
    if !is_supported_optype_version_and_domain(conv, "Conv", CONV_VERSIONS, ONNX_DOMAIN)
        || graph.output_edges_count(conv.index()) != 1
        || graph.is_node_outputs_in_graph_outputs(conv)
    {
        return None;
    }

    let next = graph.output_nodes(conv.index()).first().and_then(|&i| graph.node(i))?;
    if !is_supported_optype_version_and_domain(next, op_type, versions, ONNX_DOMAIN)
        || next.execution_provider() != conv.execution_provider()
        || graph.input_edges_count(next.index()) != 1
        || graph.is_node_outputs_in_graph_outputs(next)
    {
        return None;
    }

    Some(next)
}

/// A per-channel constant for a Conv weight of dims `[C, ...]`: same rank
/// minus one, leading dim `C`, every other dim 1
///
/// Only weights with at least two spatial dims qualify.
pub(crate) fn is_channel_constant(weight_dims: &[i64], constant_dims: &[i64]) -> bool {
    weight_dims.len() >= 4
        && constant_dims.len() == weight_dims.len() - 1
        && constant_dims[0] == weight_dims[0]
        && constant_dims[1..].iter().all(|&d| d == 1)
}

/// Whether an initializer is read by `index` alone and cannot be overridden
/// by the caller, so rewriting it in place is invisible to everybody else
pub(crate) fn is_private_initializer(graph: &Graph, name: &str, index: NodeIndex) -> bool {
    graph.is_initializer(name)
        && !graph.is_graph_input(name)
        && !graph.is_graph_output(name)
        && graph.consumers_of(name) == [index]
}

/// Drop initializers nothing reads any more
pub(crate) fn remove_unused_initializers(graph: &mut Graph, names: &[String]) {
    for name in names {
        let unused = graph.is_initializer(name)
            && graph.consumers_of(name).is_empty()
            && !graph.is_graph_input(name)
            && !graph.is_graph_output(name);
        if unused {
            graph.remove_initializer(name);
        }
    }
}
