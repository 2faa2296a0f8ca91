use std::collections::HashSet;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model;

/// Domain aliases of the default operator set
const DEFAULT_DOMAINS: &[&str] = &["", "ai.onnx"];

/// Schema versions of the operators the rewrite rules inspect
///
/// A node's since-version is the newest entry not above the model's opset.
const SCHEMA_VERSIONS: &[(&str, &[i64])] = &[
    ("Add", &[1, 6, 7, 13, 14]),
    ("Conv", &[1, 11]),
    ("Identity", &[1, 13, 14, 16, 19]),
    ("Mul", &[1, 6, 7, 13, 14]),
    ("Slice", &[1, 10, 11, 13]),
    ("Unsqueeze", &[1, 11, 13]),
];

/// Graph builder responsible for turning a loader graph into the rewritable IR
pub struct GraphBuilder;

impl GraphBuilder {
    /// Build the IR from a loader graph
    ///
    /// Initializers are registered before inputs, so an initializer that is
    /// also listed as an input stays a constant that callers may override.
    pub fn build(source: &model::Graph) -> Result<Graph> {
        let opset = Self::default_opset(source)?;
        let mut graph = Graph::new(&source.name);

        for tensor in &source.initializers {
            tensor.validate_payload()?;
            graph.add_initializer(tensor.clone())?;
        }

        for input in &source.inputs {
            graph.add_input(&input.name, input.data_type, input.shape.clone())?;
        }

        let mut seen_names = HashSet::new();
        for (i, node) in source.nodes.iter().enumerate() {
            let mut node = node.clone();
            if node.name.is_empty() {
                node.name = format!("node_{}", i);
            }
            if !seen_names.insert(node.name.clone()) {
                warn!("Duplicate node name '{}' in graph '{}'", node.name, source.name);
            }

            let since_version = Self::since_version(&node, opset);
            graph.add_node(&node, since_version)?;
        }

        for info in &source.value_info {
            Self::apply_tensor_info(&mut graph, info);
        }

        for output in &source.outputs {
            graph.add_output(&output.name)?;
            Self::apply_tensor_info(&mut graph, output);
        }

        graph.validate()?;
        graph.topological_order()?;

        debug!(
            "Built graph '{}' with {} nodes at opset {}",
            graph.name(),
            graph.num_nodes(),
            opset
        );
        Ok(graph)
    }

    fn default_opset(source: &model::Graph) -> Result<i64> {
        DEFAULT_DOMAINS
            .iter()
            .find_map(|domain| source.opset_imports.get(*domain).copied())
            .ok_or_else(|| Error::MissingField("opset import for the default ONNX domain".to_string()))
    }

    /// Resolve the schema version a node was written against
    pub fn since_version(node: &model::Node, opset: i64) -> i64 {
        if !DEFAULT_DOMAINS.contains(&node.domain.as_str()) {
            return opset;
        }

        SCHEMA_VERSIONS
            .iter()
            .find(|(op_type, _)| *op_type == node.op_type)
            .and_then(|(_, versions)| versions.iter().rev().find(|&&v| v <= opset).copied())
            .unwrap_or(opset)
    }

    fn apply_tensor_info(graph: &mut Graph, info: &model::TensorInfo) {
        if let Some(arg) = graph.node_arg_mut(&info.name) {
            if arg.data_type() == model::DataType::Undefined {
                arg.set_data_type(info.data_type);
            }
            // Initializer shapes come from the tensor itself
            if arg.shape().is_none() {
                if let Some(shape) = &info.shape {
                    arg.set_shape(shape.clone());
                }
            }
        }
    }
}
