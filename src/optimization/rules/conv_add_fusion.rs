use log::{debug, warn};

use crate::error::Result;
use crate::graph::utils::{can_remove_single_input_node, remove_single_input_node};
use crate::graph::{Graph, Node, NodeIndex};
use crate::model::static_shape;
use crate::optimization::initializer::Initializer;
use crate::optimization::rewrite_rule::{RewriteRule, RuleDescriptor, RuleEffect};

use super::{conv_with_single_consumer, is_channel_constant, is_private_initializer, remove_unused_initializers};

const ADD_VERSIONS: &[i64] = &[7, 13, 14];

/// Fold a per-channel constant `Add` that follows a `Conv` into the Conv bias
///
/// `Conv(X, W[, b]) + B` with `B` of shape `[C, 1, ...]` becomes
/// `Conv(X, W, b + B)`; when the Conv has no bias, `B` flattened to `[C]`
/// becomes its bias. The Add is spliced out and its consumers read the Conv
/// output directly.
pub struct ConvAddFusion {
    descriptor: RuleDescriptor,
}

impl ConvAddFusion {
    /// Create a new Conv+Add fusion rule
    pub fn new() -> Self {
        Self {
            descriptor: RuleDescriptor::new("ConvAddFusion", "Fusing Add into Conv").with_target_op_types(["Conv"]),
        }
    }
}

impl Default for ConvAddFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteRule for ConvAddFusion {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn satisfy_condition(&self, graph: &Graph, node: &Node) -> bool {
        conv_with_single_consumer(graph, node, "Add", ADD_VERSIONS).is_some()
    }

    fn apply(&self, graph: &mut Graph, index: NodeIndex) -> Result<RuleEffect> {
        let conv = match graph.node(index) {
            Some(node) => node,
            None => return Ok(RuleEffect::unchanged()),
        };
        let add = match conv_with_single_consumer(graph, conv, "Add", ADD_VERSIONS) {
            Some(add) => add,
            None => return Ok(RuleEffect::unchanged()),
        };
        let add_index = add.index();
        let conv_inputs = conv.input_defs().to_vec();
        let add_inputs = add.input_defs().to_vec();

        // The Conv output must be the first operand, the constant the second
        if conv_inputs.len() < 2 || add_inputs.len() != 2 || add_inputs[0] != conv.output_defs()[0] {
            return Ok(RuleEffect::unchanged());
        }

        let (weight, addend) = match (graph.initializer(&conv_inputs[1]), graph.initializer(&add_inputs[1])) {
            (Some(w), Some(b)) => (w, b.clone()),
            _ => return Ok(RuleEffect::unchanged()),
        };

        // Currently, fusion is only supported for float or double data type
        if !Initializer::is_supported_data_type(&addend)
            || !is_channel_constant(&weight.dims, &addend.dims)
            || !is_private_initializer(graph, &add_inputs[1], add_index)
        {
            return Ok(RuleEffect::unchanged());
        }
        let channels = weight.dims[0];

        if !can_remove_single_input_node(graph, add_index) {
            warn!("ConvAddFusion: Add node {} matched but cannot be spliced out", add_index);
            return Ok(RuleEffect::unchanged());
        }

        match conv_inputs.len() {
            3 => {
                let bias_name = &conv_inputs[2];
                let bias = match graph.initializer(bias_name) {
                    Some(bias) => bias,
                    None => return Ok(RuleEffect::unchanged()),
                };
                if !Initializer::is_supported_data_type(bias)
                    || bias.data_type != addend.data_type
                    || bias.dims.len() != 1
                    || bias.dims[0] != addend.dims[0]
                    || !is_private_initializer(graph, bias_name, index)
                {
                    return Ok(RuleEffect::unchanged());
                }

                let mut conv_bias = Initializer::new(bias)?;
                let add_bias = Initializer::new(&addend)?;
                if conv_bias.size() != add_bias.size() {
                    return Ok(RuleEffect::unchanged());
                }

                // Calculate the new bias, then replace the old one under the same name
                conv_bias.add(&add_bias)?;
                graph.replace_initializer(conv_bias.to_tensor())?;
            }
            2 => {
                let bias_name = &add_inputs[1];
                if graph.node_arg(bias_name).is_none() {
                    return Ok(RuleEffect::unchanged());
                }

                // Promote the Add constant to a flat [C] bias
                let mut bias = Initializer::new(&addend)?;
                bias.reshape(vec![channels])?;
                graph.replace_initializer(bias.to_tensor())?;
                graph.set_node_arg_shape(bias_name, static_shape(&[channels]));
                graph.add_node_input(index, bias_name, 1)?;
            }
            _ => return Ok(RuleEffect::unchanged()),
        }

        if remove_single_input_node(graph, add_index) {
            remove_unused_initializers(graph, &add_inputs[1..]);
            debug!("ConvAddFusion: fused Add node {} into Conv node {}", add_index, index);
            Ok(RuleEffect::modified())
        } else {
            Ok(RuleEffect::unchanged())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, Node as ModelNode, Tensor};

    fn conv_add_graph(with_bias: bool) -> Graph {
        let mut graph = Graph::new("conv_add");
        graph.add_input("X", DataType::Float, Some(static_shape(&[1, 3, 5, 5]))).unwrap();
        graph.add_initializer(Tensor::from_f32("W", &[2, 3, 3, 3], &[0.1; 54])).unwrap();
        graph.add_initializer(Tensor::from_f32("B", &[2, 1, 1], &[0.5, -0.5])).unwrap();

        let mut conv_inputs = vec!["X", "W"];
        if with_bias {
            graph.add_initializer(Tensor::from_f32("bias", &[2], &[1.0, 2.0])).unwrap();
            conv_inputs.push("bias");
        }
        graph.add_node(&ModelNode::new("conv", "Conv", &conv_inputs, &["c"]), 11).unwrap();
        graph.add_node(&ModelNode::new("add", "Add", &["c", "B"], &["a"]), 14).unwrap();
        graph.add_node(&ModelNode::new("relu", "Relu", &["a"], &["Y"]), 14).unwrap();
        graph.add_output("Y").unwrap();
        graph
    }

    #[test]
    fn test_promotes_add_constant_to_bias() {
        let mut graph = conv_add_graph(false);
        let rule = ConvAddFusion::new();

        let effect = rule.check_condition_and_apply(&mut graph, 0).unwrap();

        assert_eq!(effect, RuleEffect::modified());
        let conv = graph.node(0).unwrap();
        assert_eq!(conv.input_defs(), &["X".to_string(), "W".to_string(), "B".to_string()]);
        assert_eq!(conv.input_args_count(), &[1, 1, 1]);
        assert_eq!(graph.initializer("B").unwrap().dims, vec![2]);
        assert_eq!(graph.node_arg("B").unwrap().static_dims(), Some(vec![2]));
        assert!(graph.node(1).is_none());
        assert_eq!(graph.node(2).unwrap().input_defs(), &["c".to_string()]);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_accumulates_into_existing_bias() {
        let mut graph = conv_add_graph(true);
        let effect = ConvAddFusion::new().check_condition_and_apply(&mut graph, 0).unwrap();

        assert_eq!(effect, RuleEffect::modified());
        assert_eq!(graph.initializer("bias").unwrap(), &Tensor::from_f32("bias", &[2], &[1.5, 1.5]));
        assert_eq!(graph.num_nodes(), 2);
    }

    #[test]
    fn test_refuses_when_add_feeds_graph_output() {
        let mut graph = Graph::new("exposed");
        graph.add_input("X", DataType::Float, None).unwrap();
        graph.add_initializer(Tensor::from_f32("W", &[2, 3, 3, 3], &[0.1; 54])).unwrap();
        graph.add_initializer(Tensor::from_f32("B", &[2, 1, 1], &[0.5, -0.5])).unwrap();
        graph.add_node(&ModelNode::new("conv", "Conv", &["X", "W"], &["c"]), 11).unwrap();
        graph.add_node(&ModelNode::new("add", "Add", &["c", "B"], &["Y"]), 14).unwrap();
        graph.add_output("Y").unwrap();

        let rule = ConvAddFusion::new();
        assert!(!rule.satisfy_condition(&graph, graph.node(0).unwrap()));
    }

    #[test]
    fn test_mismatched_constant_is_a_silent_no_op() {
        let mut graph = conv_add_graph(false);
        graph.replace_initializer(Tensor::from_f32("B", &[2, 1, 2], &[0.0; 4])).unwrap();

        let effect = ConvAddFusion::new().check_condition_and_apply(&mut graph, 0).unwrap();

        assert_eq!(effect, RuleEffect::unchanged());
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.node(0).unwrap().input_defs().len(), 2);
    }

    #[test]
    fn test_shared_constant_is_left_alone() {
        let mut graph = conv_add_graph(false);
        graph.add_node(&ModelNode::new("other", "Add", &["Y", "B"], &["Z"]), 14).unwrap();

        let effect = ConvAddFusion::new().check_condition_and_apply(&mut graph, 0).unwrap();
        assert_eq!(effect, RuleEffect::unchanged());
        assert_eq!(graph.initializer("B").unwrap().dims, vec![2, 1, 1]);
    }

    #[test]
    fn test_overridable_constant_is_left_alone() {
        for with_bias in [true, false] {
            let mut graph = conv_add_graph(with_bias);
            graph.add_input("B", DataType::Float, Some(static_shape(&[2, 1, 1]))).unwrap();

            let effect = ConvAddFusion::new().check_condition_and_apply(&mut graph, 0).unwrap();

            assert_eq!(effect, RuleEffect::unchanged());
            assert_eq!(graph.num_nodes(), 3);
            assert_eq!(graph.consumers_of("B"), vec![1]);
            if with_bias {
                assert_eq!(graph.initializer("bias").unwrap(), &Tensor::from_f32("bias", &[2], &[1.0, 2.0]));
            }
        }
    }

    #[test]
    fn test_provider_mismatch_blocks_fusion() {
        let mut graph = conv_add_graph(false);
        graph.node_mut(1).unwrap().set_execution_provider("CUDAExecutionProvider");

        assert!(!ConvAddFusion::new().satisfy_condition(&graph, graph.node(0).unwrap()));
    }

    #[test]
    fn test_corrupt_bias_is_an_error_without_mutation() {
        let mut graph = conv_add_graph(true);
        let mut corrupt = Tensor::from_f32("bias", &[2], &[1.0, 2.0]);
        corrupt.data.truncate(4);
        graph.replace_initializer(corrupt).unwrap();

        assert!(ConvAddFusion::new().check_condition_and_apply(&mut graph, 0).is_err());
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.initializer("B").unwrap().dims, vec![2, 1, 1]);
    }
}
