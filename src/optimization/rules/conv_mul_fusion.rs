use log::debug;

use crate::error::Result;
use crate::graph::utils::{can_remove_single_input_node, remove_single_input_node};
use crate::graph::{Graph, Node, NodeIndex};
use crate::optimization::initializer::Initializer;
use crate::optimization::rewrite_rule::{RewriteRule, RuleDescriptor, RuleEffect};

use super::{conv_with_single_consumer, is_channel_constant, is_private_initializer, remove_unused_initializers};

const MUL_VERSIONS: &[i64] = &[7, 13, 14];

/// Fold a per-channel constant `Mul` that follows a `Conv` into the Conv
/// weights and bias
///
/// `Conv(X, W[, b]) * S` with `S` of shape `[C, 1, ...]` becomes
/// `Conv(X, W * S[c], b * S)`. Unlike the Add fusion this reorders floating
/// point operations, so results match up to rounding.
pub struct ConvMulFusion {
    descriptor: RuleDescriptor,
}

impl ConvMulFusion {
    /// Create a new Conv+Mul fusion rule
    pub fn new() -> Self {
        Self {
            descriptor: RuleDescriptor::new("ConvMulFusion", "Fusing Mul into Conv").with_target_op_types(["Conv"]),
        }
    }
}

impl Default for ConvMulFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteRule for ConvMulFusion {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn satisfy_condition(&self, graph: &Graph, node: &Node) -> bool {
        conv_with_single_consumer(graph, node, "Mul", MUL_VERSIONS).is_some()
    }

    fn apply(&self, graph: &mut Graph, index: NodeIndex) -> Result<RuleEffect> {
        let conv = match graph.node(index) {
            Some(node) => node,
            None => return Ok(RuleEffect::unchanged()),
        };
        let mul = match conv_with_single_consumer(graph, conv, "Mul", MUL_VERSIONS) {
            Some(mul) => mul,
            None => return Ok(RuleEffect::unchanged()),
        };
        let mul_index = mul.index();
        let conv_inputs = conv.input_defs().to_vec();
        let mul_inputs = mul.input_defs().to_vec();

        if conv_inputs.len() < 2 || mul_inputs.len() != 2 || mul_inputs[0] != conv.output_defs()[0] {
            return Ok(RuleEffect::unchanged());
        }

        let (weight, scale) = match (graph.initializer(&conv_inputs[1]), graph.initializer(&mul_inputs[1])) {
            (Some(w), Some(s)) => (w, s),
            _ => return Ok(RuleEffect::unchanged()),
        };
        if !Initializer::is_supported_data_type(weight)
            || weight.data_type != scale.data_type
            || !is_channel_constant(&weight.dims, &scale.dims)
            || !is_private_initializer(graph, &conv_inputs[1], index)
            || !is_private_initializer(graph, &mul_inputs[1], mul_index)
            || !can_remove_single_input_node(graph, mul_index)
        {
            return Ok(RuleEffect::unchanged());
        }

        let scale = Initializer::new(scale)?;
        let mut new_weight = Initializer::new(weight)?;
        new_weight.scale_by_axis(&scale, 1)?;

        let new_bias = match conv_inputs.get(2) {
            Some(bias_name) => {
                let bias = match graph.initializer(bias_name) {
                    Some(bias) => bias,
                    None => return Ok(RuleEffect::unchanged()),
                };
                if bias.data_type != scale.data_type()
                    || bias.dims.len() != 1
                    || bias.dims[0] != weight.dims[0]
                    || !is_private_initializer(graph, bias_name, index)
                {
                    return Ok(RuleEffect::unchanged());
                }
                let mut bias = Initializer::new(bias)?;
                bias.mul(&scale)?;
                Some(bias)
            }
            None => None,
        };

        graph.replace_initializer(new_weight.to_tensor())?;
        if let Some(bias) = new_bias {
            graph.replace_initializer(bias.to_tensor())?;
        }

        if remove_single_input_node(graph, mul_index) {
            remove_unused_initializers(graph, &mul_inputs[1..]);
            debug!("ConvMulFusion: fused Mul node {} into Conv node {}", mul_index, index);
            Ok(RuleEffect::modified())
        } else {
            Ok(RuleEffect::unchanged())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{static_shape, DataType, Node as ModelNode, Tensor};

    fn conv_mul_graph() -> Graph {
        let mut graph = Graph::new("conv_mul");
        graph.add_input("X", DataType::Float, Some(static_shape(&[1, 1, 3, 3]))).unwrap();
        graph.add_initializer(Tensor::from_f32("W", &[2, 1, 1, 2], &[1.0, 2.0, 3.0, 4.0])).unwrap();
        graph.add_initializer(Tensor::from_f32("b", &[2], &[1.0, -1.0])).unwrap();
        graph.add_initializer(Tensor::from_f32("S", &[2, 1, 1], &[2.0, 0.5])).unwrap();
        graph.add_node(&ModelNode::new("conv", "Conv", &["X", "W", "b"], &["c"]), 11).unwrap();
        graph.add_node(&ModelNode::new("mul", "Mul", &["c", "S"], &["m"]), 14).unwrap();
        graph.add_node(&ModelNode::new("relu", "Relu", &["m"], &["Y"]), 14).unwrap();
        graph.add_output("Y").unwrap();
        graph
    }

    #[test]
    fn test_scales_weights_and_bias() {
        let mut graph = conv_mul_graph();

        let effect = ConvMulFusion::new().check_condition_and_apply(&mut graph, 0).unwrap();

        assert_eq!(effect, RuleEffect::modified());
        assert_eq!(
            graph.initializer("W").unwrap(),
            &Tensor::from_f32("W", &[2, 1, 1, 2], &[2.0, 4.0, 1.5, 2.0])
        );
        assert_eq!(graph.initializer("b").unwrap(), &Tensor::from_f32("b", &[2], &[2.0, -0.5]));
        assert!(graph.node(1).is_none());
        assert_eq!(graph.node(2).unwrap().input_defs(), &["c".to_string()]);
        assert!(!graph.is_initializer("S"));
    }

    #[test]
    fn test_shared_weights_are_not_rescaled() {
        let mut graph = conv_mul_graph();
        graph.add_node(&ModelNode::new("conv2", "Conv", &["X", "W"], &["c2"]), 11).unwrap();

        let effect = ConvMulFusion::new().check_condition_and_apply(&mut graph, 0).unwrap();

        assert_eq!(effect, RuleEffect::unchanged());
        assert_eq!(graph.num_nodes(), 4);
    }

    #[test]
    fn test_overridable_scale_is_not_folded() {
        let mut graph = conv_mul_graph();
        graph.add_input("S", DataType::Float, Some(static_shape(&[2, 1, 1]))).unwrap();

        let effect = ConvMulFusion::new().check_condition_and_apply(&mut graph, 0).unwrap();

        assert_eq!(effect, RuleEffect::unchanged());
        assert_eq!(
            graph.initializer("W").unwrap(),
            &Tensor::from_f32("W", &[2, 1, 1, 2], &[1.0, 2.0, 3.0, 4.0])
        );
        assert_eq!(graph.consumers_of("S"), vec![1]);
    }

    #[test]
    fn test_add_consumer_does_not_match() {
        let mut graph = conv_mul_graph();
        graph.add_node(&ModelNode::new("conv2", "Conv", &["Y", "W"], &["c2"]), 1).unwrap();
        graph.add_initializer(Tensor::from_f32("B2", &[2, 1, 1], &[1.0, 1.0])).unwrap();
        graph.add_node(&ModelNode::new("add", "Add", &["c2", "B2"], &["Z"]), 14).unwrap();

        assert!(!ConvMulFusion::new().satisfy_condition(&graph, graph.node(3).unwrap()));
    }
}
