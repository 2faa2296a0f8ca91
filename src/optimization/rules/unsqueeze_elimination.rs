use std::collections::BTreeSet;

use log::debug;

use crate::error::Result;
use crate::graph::utils::{can_remove_single_input_node, remove_single_input_node};
use crate::graph::{Graph, Node, NodeIndex};
use crate::model::static_shape;
use crate::optimization::rewrite_rule::{RewriteRule, RuleDescriptor, RuleEffect};

use super::{is_private_initializer, remove_unused_initializers};

/// Rewrite rule that folds an `Unsqueeze` of a constant into the constant
/// itself: the initializer gets the unsqueezed dims and the node goes away.
pub struct EliminateUnsqueeze {
    descriptor: RuleDescriptor,
}

impl EliminateUnsqueeze {
    pub fn new() -> Self {
        Self {
            descriptor: RuleDescriptor::new("EliminateUnsqueeze", "Fold unsqueeze into its initializer input")
                .with_target_op_types(["Unsqueeze"]),
        }
    }
}

impl Default for EliminateUnsqueeze {
    fn default() -> Self {
        Self::new()
    }
}

fn unsqueeze_axes(graph: &Graph, node: &Node) -> Option<Vec<i64>> {
    if node.since_version() < 13 {
        return node.ints_attribute("axes").map(<[i64]>::to_vec);
    }
    let name = node.input_defs().get(1)?;
    if graph.is_graph_input(name) {
        return None;
    }
    graph.initializer(name)?.int64_values().ok()
}

/// Dims after inserting a 1 at every axis; `None` for out-of-range or repeated axes
fn unsqueezed_dims(dims: &[i64], axes: &[i64]) -> Option<Vec<i64>> {
    let new_rank = (dims.len() + axes.len()) as i64;
    let mut inserted = BTreeSet::new();
    for &axis in axes {
        let axis = if axis < 0 { axis + new_rank } else { axis };
        if axis < 0 || axis >= new_rank || !inserted.insert(axis) {
            return None;
        }
    }

    let mut remaining = dims.iter();
    (0..new_rank)
        .map(|i| {
            if inserted.contains(&i) {
                Some(1)
            } else {
                remaining.next().copied()
            }
        })
        .collect()
}

impl RewriteRule for EliminateUnsqueeze {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn satisfy_condition(&self, graph: &Graph, node: &Node) -> bool {
        if node.op_type() != "Unsqueeze"
            || node.output_defs().len() != 1
            || graph.is_node_outputs_in_graph_outputs(node)
        {
            return false;
        }

        match node.input_defs().first() {
            Some(data) => is_private_initializer(graph, data, node.index()),
            None => false,
        }
    }

    fn apply(&self, graph: &mut Graph, index: NodeIndex) -> Result<RuleEffect> {
        let node = match graph.node(index) {
            Some(node) => node,
            None => return Ok(RuleEffect::unchanged()),
        };
        let axes = match unsqueeze_axes(graph, node) {
            Some(axes) => axes,
            None => return Ok(RuleEffect::unchanged()),
        };
        let extra_inputs: Vec<String> = node.input_defs().iter().skip(1).cloned().collect();
        let mut tensor = match node.input_defs().first().and_then(|name| graph.initializer(name)) {
            Some(tensor) => tensor.clone(),
            None => return Ok(RuleEffect::unchanged()),
        };

        let dims = match unsqueezed_dims(&tensor.dims, &axes) {
            Some(dims) => dims,
            None => return Ok(RuleEffect::unchanged()),
        };
        if !can_remove_single_input_node(graph, index) {
            return Ok(RuleEffect::unchanged());
        }
        tensor.validate_payload()?;

        let name = tensor.name.clone();
        tensor.dims = dims;
        graph.set_node_arg_shape(&name, static_shape(&tensor.dims));
        graph.replace_initializer(tensor)?;

        if !remove_single_input_node(graph, index) {
            return Ok(RuleEffect::unchanged());
        }
        remove_unused_initializers(graph, &extra_inputs);

        debug!("EliminateUnsqueeze: folded node {} into initializer '{}'", index, name);
        Ok(RuleEffect::removed())
    }
}
