use std::collections::HashMap;

use crate::model::Attribute;

/// Stable index of a node in the graph arena; never reused once assigned
pub type NodeIndex = usize;

/// One operator instance in the graph
///
/// Inputs and outputs are NodeArg names. Edges are derived from them by the
/// owning [`Graph`](super::Graph), so the wiring fields can only be changed
/// through the graph's mutation methods.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) index: NodeIndex,
    pub(crate) name: String,
    pub(crate) op_type: String,
    pub(crate) domain: String,
    pub(crate) since_version: i64,
    pub(crate) input_defs: Vec<String>,
    pub(crate) output_defs: Vec<String>,
    pub(crate) input_args_count: Vec<usize>,
    pub(crate) execution_provider: String,
    pub(crate) attributes: HashMap<String, Attribute>,
}

impl Node {
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Operator set version the node's schema was introduced in
    pub fn since_version(&self) -> i64 {
        self.since_version
    }

    pub fn input_defs(&self) -> &[String] {
        &self.input_defs
    }

    pub fn output_defs(&self) -> &[String] {
        &self.output_defs
    }

    /// Number of NodeArgs bound to each formal input; only differs from one
    /// for variadic inputs
    pub fn input_args_count(&self) -> &[usize] {
        &self.input_args_count
    }

    /// Execution provider tag, compared for equality only
    pub fn execution_provider(&self) -> &str {
        &self.execution_provider
    }

    pub fn set_execution_provider(&mut self, provider: &str) {
        self.execution_provider = provider.to_string();
    }

    pub fn attributes(&self) -> &HashMap<String, Attribute> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: &str, value: Attribute) {
        self.attributes.insert(name.to_string(), value);
    }

    /// Integer list attribute, if present with that type
    pub fn ints_attribute(&self, name: &str) -> Option<&[i64]> {
        match self.attributes.get(name) {
            Some(Attribute::Ints(values)) => Some(values),
            _ => None,
        }
    }
}
