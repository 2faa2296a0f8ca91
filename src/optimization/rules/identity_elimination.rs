use log::{debug, warn};

use crate::error::Result;
use crate::graph::utils::remove_single_input_node;
use crate::graph::{Graph, Node, NodeIndex};
use crate::optimization::rewrite_rule::{RewriteRule, RuleDescriptor, RuleEffect};

/// Rewrite rule that eliminates the identity node.
///
/// It is attempted to be triggered only on nodes with op type "Identity".
pub struct EliminateIdentity {
    descriptor: RuleDescriptor,
}

impl EliminateIdentity {
    pub fn new() -> Self {
        Self {
            descriptor: RuleDescriptor::new("EliminateIdentity", "Eliminate identity node")
                .with_target_op_types(["Identity"]),
        }
    }
}

impl Default for EliminateIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteRule for EliminateIdentity {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn satisfy_condition(&self, graph: &Graph, node: &Node) -> bool {
        node.op_type() == "Identity"
            && node.input_defs().len() == 1
            && node.output_defs().len() == 1
            && !graph.is_node_outputs_in_graph_outputs(node)
    }

    fn apply(&self, graph: &mut Graph, index: NodeIndex) -> Result<RuleEffect> {
        if remove_single_input_node(graph, index) {
            debug!("EliminateIdentity: removed node {}", index);
            Ok(RuleEffect::removed())
        } else {
            warn!("EliminateIdentity: node {} matched but could not be spliced out", index);
            Ok(RuleEffect::unchanged())
        }
    }
}
