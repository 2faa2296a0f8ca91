use log::debug;

use crate::error::Result;
use crate::graph::utils::remove_single_input_node;
use crate::graph::{Graph, Node, NodeIndex};
use crate::optimization::rewrite_rule::{RewriteRule, RuleDescriptor, RuleEffect};

use super::remove_unused_initializers;

/// Rewrite rule that eliminates a slice operator if it is redundant (does
/// not lead to data reduction).
///
/// It is attempted to be triggered only on nodes with op type "Slice".
pub struct EliminateSlice {
    descriptor: RuleDescriptor,
}

/// Slice configuration resolved from attributes (opset < 10) or constant inputs
#[derive(Debug, Clone, PartialEq, Eq)]
struct SliceParams {
    starts: Vec<i64>,
    ends: Vec<i64>,
    axes: Option<Vec<i64>>,
    steps: Option<Vec<i64>>,
}

impl EliminateSlice {
    pub fn new() -> Self {
        Self {
            descriptor: RuleDescriptor::new("EliminateSlice", "Eliminate slice node that selects its whole input")
                .with_target_op_types(["Slice"]),
        }
    }
}

impl Default for EliminateSlice {
    fn default() -> Self {
        Self::new()
    }
}

fn constant_ints(graph: &Graph, node: &Node, slot: usize) -> Option<Option<Vec<i64>>> {
    match node.input_defs().get(slot) {
        None => Some(None),
        Some(name) if name.is_empty() => Some(None),
        // A constant the caller may override is not known until run time
        Some(name) if graph.is_graph_input(name) => None,
        Some(name) => graph.initializer(name)?.int64_values().ok().map(Some),
    }
}

fn slice_params(graph: &Graph, node: &Node) -> Option<SliceParams> {
    if node.since_version() < 10 {
        return Some(SliceParams {
            starts: node.ints_attribute("starts")?.to_vec(),
            ends: node.ints_attribute("ends")?.to_vec(),
            axes: node.ints_attribute("axes").map(<[i64]>::to_vec),
            steps: None,
        });
    }

    // Non-constant starts or ends make the selected range unknowable here
    Some(SliceParams {
        starts: constant_ints(graph, node, 1)??,
        ends: constant_ints(graph, node, 2)??,
        axes: constant_ints(graph, node, 3)?,
        steps: constant_ints(graph, node, 4)?,
    })
}

/// Whether the slice keeps every element of an input with extents `dims`
fn selects_full_range(dims: &[i64], params: &SliceParams) -> bool {
    let count = params.starts.len();
    if params.ends.len() != count {
        return false;
    }
    let axes: Vec<i64> = match &params.axes {
        Some(axes) if axes.len() == count => axes.clone(),
        Some(_) => return false,
        None => (0..count as i64).collect(),
    };
    if let Some(steps) = &params.steps {
        if steps.len() != count || steps.iter().any(|&s| s != 1) {
            return false;
        }
    }

    let rank = dims.len() as i64;
    for ((&axis, &start), &end) in axes.iter().zip(&params.starts).zip(&params.ends) {
        let axis = if axis < 0 { axis + rank } else { axis };
        if axis < 0 || axis >= rank {
            return false;
        }
        let dim = dims[axis as usize];

        let clamp = |v: i64| {
            let v = if v < 0 { v.saturating_add(dim) } else { v };
            v.clamp(0, dim)
        };
        if clamp(start) != 0 || clamp(end) != dim {
            return false;
        }
    }

    true
}

impl RewriteRule for EliminateSlice {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn satisfy_condition(&self, graph: &Graph, node: &Node) -> bool {
        if node.op_type() != "Slice"
            || node.output_defs().len() != 1
            || graph.is_node_outputs_in_graph_outputs(node)
            || graph.input_edges_count(node.index()) > 1
        {
            return false;
        }

        let data = match node.input_defs().first() {
            Some(name) => name,
            None => return false,
        };
        let dims = match graph.node_arg(data).and_then(|arg| arg.static_dims()) {
            Some(dims) => dims,
            None => return false,
        };

        match slice_params(graph, node) {
            Some(params) => selects_full_range(&dims, &params),
            None => false,
        }
    }

    fn apply(&self, graph: &mut Graph, index: NodeIndex) -> Result<RuleEffect> {
        let constants = match graph.node(index) {
            Some(node) => node.input_defs().iter().skip(1).cloned().collect::<Vec<_>>(),
            None => return Ok(RuleEffect::unchanged()),
        };

        if !remove_single_input_node(graph, index) {
            return Ok(RuleEffect::unchanged());
        }
        remove_unused_initializers(graph, &constants);

        debug!("EliminateSlice: removed full-range slice node {}", index);
        Ok(RuleEffect::removed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{static_shape, Attribute, DataType, Node as ModelNode, Tensor};

    fn params(starts: &[i64], ends: &[i64], axes: Option<&[i64]>) -> SliceParams {
        SliceParams {
            starts: starts.to_vec(),
            ends: ends.to_vec(),
            axes: axes.map(<[i64]>::to_vec),
            steps: None,
        }
    }

    #[test]
    fn test_full_range_detection() {
        let dims = [4, 6];
        assert!(selects_full_range(&dims, &params(&[0, 0], &[4, 6], None)));
        assert!(selects_full_range(&dims, &params(&[0], &[i64::MAX], Some(&[1]))));
        assert!(selects_full_range(&dims, &params(&[-4], &[100], Some(&[-2]))));
        assert!(selects_full_range(&dims, &params(&[i64::MIN], &[i64::MAX], Some(&[0]))));

        assert!(!selects_full_range(&dims, &params(&[0, 0], &[4, 5], None)));
        assert!(!selects_full_range(&dims, &params(&[1], &[4], None)));
        assert!(!selects_full_range(&dims, &params(&[0], &[-1], Some(&[1]))));
        assert!(!selects_full_range(&dims, &params(&[0], &[4], Some(&[2]))));

        let mut strided = params(&[0], &[4], None);
        strided.steps = Some(vec![2]);
        assert!(!selects_full_range(&dims, &strided));
    }

    fn opset10_slice(end: i64) -> Graph {
        let mut graph = Graph::new("slice");
        graph.add_input("X", DataType::Float, Some(static_shape(&[8]))).unwrap();
        graph.add_initializer(Tensor::from_i64("starts", &[1], &[0])).unwrap();
        graph.add_initializer(Tensor::from_i64("ends", &[1], &[end])).unwrap();
        graph.add_node(&ModelNode::new("r", "Relu", &["X"], &["a"]), 14).unwrap();
        graph.add_node(&ModelNode::new("s", "Slice", &["a", "starts", "ends"], &["b"]), 13).unwrap();
        graph.add_node(&ModelNode::new("n", "Neg", &["b"], &["Y"]), 13).unwrap();
        graph.add_output("Y").unwrap();
        graph.set_node_arg_shape("a", static_shape(&[8]));
        graph
    }

    #[test]
    fn test_full_slice_is_removed_with_its_constants() {
        let mut graph = opset10_slice(8);

        let effect = EliminateSlice::new().check_condition_and_apply(&mut graph, 1).unwrap();

        assert_eq!(effect, RuleEffect::removed());
        assert_eq!(graph.node(2).unwrap().input_defs(), &["a".to_string()]);
        assert!(!graph.is_initializer("starts"));
        assert!(!graph.is_initializer("ends"));
    }

    #[test]
    fn test_partial_slice_is_kept() {
        let mut graph = opset10_slice(7);

        let effect = EliminateSlice::new().check_condition_and_apply(&mut graph, 1).unwrap();

        assert_eq!(effect, RuleEffect::unchanged());
        assert_eq!(graph.num_nodes(), 3);
    }

    #[test]
    fn test_overridable_bounds_keep_the_slice() {
        let mut graph = opset10_slice(8);
        graph.add_input("starts", DataType::Int64, Some(static_shape(&[1]))).unwrap();

        let effect = EliminateSlice::new().check_condition_and_apply(&mut graph, 1).unwrap();

        assert_eq!(effect, RuleEffect::unchanged());
        assert_eq!(graph.num_nodes(), 3);
        assert!(graph.is_initializer("starts"));
    }

    #[test]
    fn test_unknown_input_shape_is_kept() {
        let mut graph = opset10_slice(8);
        graph.node_arg_mut("a").unwrap().clear_shape();

        assert!(!EliminateSlice::new().satisfy_condition(&graph, graph.node(1).unwrap()));
    }

    #[test]
    fn test_attribute_form_before_opset_10() {
        let mut graph = Graph::new("slice_v1");
        graph.add_input("X", DataType::Float, Some(static_shape(&[2, 3]))).unwrap();
        let slice = ModelNode::new("s", "Slice", &["X"], &["b"])
            .with_attribute("starts", Attribute::Ints(vec![0, 0]))
            .with_attribute("ends", Attribute::Ints(vec![2, 3]));
        graph.add_node(&slice, 1).unwrap();
        graph.add_node(&ModelNode::new("n", "Neg", &["b"], &["Y"]), 13).unwrap();
        graph.add_output("Y").unwrap();

        let effect = EliminateSlice::new().check_condition_and_apply(&mut graph, 0).unwrap();

        assert_eq!(effect, RuleEffect::removed());
        assert_eq!(graph.node(1).unwrap().input_defs(), &["X".to_string()]);
    }
}
