// Shared helpers for integration tests: loader-graph builders and a small
// ndarray reference evaluator for the operators the rewrite rules touch.
#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{Array4, ArrayD, Axis, Ix4, IxDyn, Slice};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

use onnx_rewriter::graph::{Graph, Node};
use onnx_rewriter::model::{self, DataType, Tensor, TensorInfo};
use onnx_rewriter::optimization::{Initializer, InitializerData};
use onnx_rewriter::GraphBuilder;

/// Empty loader graph importing the default domain at `opset`
pub fn loader_graph(name: &str, opset: i64) -> model::Graph {
    let mut graph = model::Graph {
        name: name.to_string(),
        ..Default::default()
    };
    graph.opset_imports.insert(String::new(), opset);
    graph
}

pub fn node(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> model::Node {
    model::Node::new(name, op_type, inputs, outputs)
}

/// X[1,C,H,W] -> Conv(W[, bias]) -> Add(B[C,1,1]) -> Relu -> Y
pub fn conv_add_model(channels: i64, in_channels: i64, with_bias: bool, rng: &mut StdRng) -> model::Graph {
    let mut source = loader_graph("conv_add", 14);
    source
        .inputs
        .push(TensorInfo::new("X", DataType::Float, &[1, in_channels, 6, 6]));
    source
        .outputs
        .push(TensorInfo::new("Y", DataType::Float, &[1, channels, 4, 4]));

    let weight_dims = [channels, in_channels, 3, 3];
    source.initializers.push(random_tensor("W", &weight_dims, rng));
    source.initializers.push(random_tensor("B", &[channels, 1, 1], rng));

    let mut conv_inputs = vec!["X", "W"];
    if with_bias {
        source.initializers.push(random_tensor("bias", &[channels], rng));
        conv_inputs.push("bias");
    }
    source.nodes.push(node("conv", "Conv", &conv_inputs, &["c"]));
    source.nodes.push(node("add", "Add", &["c", "B"], &["a"]));
    source.nodes.push(node("relu", "Relu", &["a"], &["Y"]));
    source
}

pub fn build(source: &model::Graph) -> Graph {
    GraphBuilder::build(source).expect("test graph should build")
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_values(count: usize, rng: &mut StdRng) -> Vec<f32> {
    let dist = Uniform::new(-1.0f32, 1.0);
    (0..count).map(|_| dist.sample(rng)).collect()
}

pub fn random_tensor(name: &str, dims: &[i64], rng: &mut StdRng) -> Tensor {
    let count = dims.iter().product::<i64>() as usize;
    Tensor::from_f32(name, dims, &random_values(count, rng))
}

pub fn random_array(dims: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
    let count = dims.iter().product();
    ArrayD::from_shape_vec(IxDyn(dims), random_values(count, rng)).expect("shape matches value count")
}

/// Run the graph on float feeds and return every graph output
pub fn evaluate(graph: &Graph, feeds: &HashMap<String, ArrayD<f32>>) -> Result<HashMap<String, ArrayD<f32>>> {
    let mut values = feeds.clone();
    for tensor in graph.initializers() {
        if tensor.data_type != DataType::Float || values.contains_key(&tensor.name) {
            continue;
        }
        if let InitializerData::Float(array) = Initializer::new(tensor)?.data() {
            values.insert(tensor.name.clone(), array.clone());
        }
    }

    for index in graph.topological_order()? {
        let node = graph.node(index).ok_or_else(|| anyhow!("node {} vanished", index))?;
        let output = evaluate_node(graph, node, &values)
            .with_context(|| format!("evaluating node {} ({})", node.name(), node.op_type()))?;
        values.insert(node.output_defs()[0].clone(), output);
    }

    graph
        .graph_outputs()
        .iter()
        .map(|name| {
            values
                .get(name)
                .cloned()
                .map(|v| (name.clone(), v))
                .ok_or_else(|| anyhow!("output '{}' was not computed", name))
        })
        .collect()
}

fn evaluate_node(graph: &Graph, node: &Node, values: &HashMap<String, ArrayD<f32>>) -> Result<ArrayD<f32>> {
    let input = |slot: usize| -> Result<&ArrayD<f32>> {
        let name = node
            .input_defs()
            .get(slot)
            .ok_or_else(|| anyhow!("missing input slot {}", slot))?;
        values.get(name).ok_or_else(|| anyhow!("value '{}' not available", name))
    };

    Ok(match node.op_type() {
        "Conv" => {
            let bias = if node.input_defs().len() > 2 { Some(input(2)?) } else { None };
            conv2d(input(0)?, input(1)?, bias)?
        }
        "Add" => input(0)? + input(1)?,
        "Mul" => input(0)? * input(1)?,
        "Relu" => input(0)?.mapv(|v| v.max(0.0)),
        "Neg" => input(0)?.mapv(|v| -v),
        "Identity" => input(0)?.clone(),
        "Slice" => slice(graph, node, input(0)?)?,
        "Unsqueeze" => unsqueeze(graph, node, input(0)?)?,
        other => bail!("reference evaluator does not implement {}", other),
    })
}

/// Direct 2-D convolution, no padding, unit strides; the bias is added after
/// the full accumulation, the way a fused kernel does it
pub fn conv2d(x: &ArrayD<f32>, w: &ArrayD<f32>, bias: Option<&ArrayD<f32>>) -> Result<ArrayD<f32>> {
    let x = x.view().into_dimensionality::<Ix4>()?;
    let w = w.view().into_dimensionality::<Ix4>()?;
    let (n, c, h, width) = x.dim();
    let (m, wc, kh, kw) = w.dim();
    if c != wc || kh > h || kw > width {
        bail!("conv shapes {:?} and {:?} are incompatible", x.shape(), w.shape());
    }
    let bias: Option<Vec<f32>> = bias.map(|b| b.iter().copied().collect());

    let mut out = Array4::<f32>::zeros((n, m, h - kh + 1, width - kw + 1));
    for ((b, oc, i, j), v) in out.indexed_iter_mut() {
        let mut acc = 0.0f32;
        for ic in 0..c {
            for p in 0..kh {
                for q in 0..kw {
                    acc += x[[b, ic, i + p, j + q]] * w[[oc, ic, p, q]];
                }
            }
        }
        if let Some(bias) = &bias {
            acc += bias[oc];
        }
        *v = acc;
    }
    Ok(out.into_dyn())
}

fn int_input(graph: &Graph, node: &Node, slot: usize) -> Result<Option<Vec<i64>>> {
    match node.input_defs().get(slot).filter(|n| !n.is_empty()) {
        Some(name) => {
            let tensor = graph
                .initializer(name)
                .ok_or_else(|| anyhow!("'{}' must be constant", name))?;
            Ok(Some(tensor.int64_values()?))
        }
        None => Ok(None),
    }
}

fn slice(graph: &Graph, node: &Node, data: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    let (starts, ends, axes) = if node.since_version() < 10 {
        (
            node.ints_attribute("starts").context("starts")?.to_vec(),
            node.ints_attribute("ends").context("ends")?.to_vec(),
            node.ints_attribute("axes").map(<[i64]>::to_vec),
        )
    } else {
        if let Some(steps) = int_input(graph, node, 4)? {
            if steps.iter().any(|&s| s != 1) {
                bail!("strided slices are not supported");
            }
        }
        (
            int_input(graph, node, 1)?.context("starts")?,
            int_input(graph, node, 2)?.context("ends")?,
            int_input(graph, node, 3)?,
        )
    };

    let rank = data.ndim() as i64;
    let axes = axes.unwrap_or_else(|| (0..starts.len() as i64).collect());
    let mut result = data.view();
    for ((&axis, &start), &end) in axes.iter().zip(&starts).zip(&ends) {
        let axis = (if axis < 0 { axis + rank } else { axis }) as usize;
        let dim = result.len_of(Axis(axis)) as i64;
        let clamp = |v: i64| (if v < 0 { v.saturating_add(dim) } else { v }).clamp(0, dim);
        let (start, end) = (clamp(start), clamp(end).max(clamp(start)));
        result.slice_axis_inplace(Axis(axis), Slice::from(start as isize..end as isize));
    }
    Ok(result.to_owned())
}

fn unsqueeze(graph: &Graph, node: &Node, data: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    let axes = if node.since_version() < 13 {
        node.ints_attribute("axes").context("axes")?.to_vec()
    } else {
        int_input(graph, node, 1)?.context("axes")?
    };

    let new_rank = (data.ndim() + axes.len()) as i64;
    let mut axes: Vec<usize> = axes
        .iter()
        .map(|&a| (if a < 0 { a + new_rank } else { a }) as usize)
        .collect();
    axes.sort_unstable();

    let mut result = data.clone();
    for axis in axes {
        result = result.insert_axis(Axis(axis));
    }
    Ok(result)
}

/// Bitwise equality of two float arrays
pub fn bit_identical(a: &ArrayD<f32>, b: &ArrayD<f32>) -> bool {
    a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

pub fn max_abs_diff(a: &ArrayD<f32>, b: &ArrayD<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}
