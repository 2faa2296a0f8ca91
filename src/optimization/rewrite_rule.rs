use std::collections::HashSet;

use crate::error::Result;
use crate::graph::{Graph, Node, NodeIndex};

/// What a rule application did to the graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleEffect {
    /// The graph was changed
    pub modified: bool,
    /// The node the rule was triggered on no longer exists
    pub deleted: bool,
}

impl RuleEffect {
    /// Nothing changed
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// The graph changed but the triggering node survived
    pub fn modified() -> Self {
        Self {
            modified: true,
            deleted: false,
        }
    }

    /// The triggering node was removed
    pub fn removed() -> Self {
        Self {
            modified: true,
            deleted: true,
        }
    }
}

/// Fixed configuration of a rewrite rule, set once at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDescriptor {
    name: String,
    description: String,
    target_op_types: HashSet<String>,
    compatible_execution_providers: HashSet<String>,
}

impl RuleDescriptor {
    /// Create a descriptor that targets every op type and provider
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            target_op_types: HashSet::new(),
            compatible_execution_providers: HashSet::new(),
        }
    }

    /// Restrict the rule to nodes of the given op types
    pub fn with_target_op_types<I, S>(mut self, op_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_op_types = op_types.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the rule to nodes assigned to the given execution providers
    pub fn with_compatible_execution_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compatible_execution_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Empty means every op type
    pub fn target_op_types(&self) -> &HashSet<String> {
        &self.target_op_types
    }

    /// Empty means every provider
    pub fn compatible_execution_providers(&self) -> &HashSet<String> {
        &self.compatible_execution_providers
    }

    pub fn applies_to_op_type(&self, op_type: &str) -> bool {
        self.target_op_types.is_empty() || self.target_op_types.contains(op_type)
    }
}

/// A local, semantics-preserving graph transformation triggered on one node
///
/// A rule is a cheap, side-effect free condition plus a body that rewrites
/// the graph in place. Checks that are expensive, or whose results the body
/// needs anyway, belong in [`apply`](RewriteRule::apply); the body must then
/// treat a failed check as "no change" rather than as an error. Errors are
/// reserved for inputs that violate the graph's own invariants, and must be
/// raised before the first mutation.
///
/// Rules must not hold on to node indices or NodeArg names between calls:
/// any splice or initializer replacement may invalidate them.
pub trait RewriteRule: Send + Sync {
    /// Name, description and filters of this rule
    fn descriptor(&self) -> &RuleDescriptor;

    /// Whether the node and its neighborhood match the rule's pattern
    fn satisfy_condition(&self, graph: &Graph, node: &Node) -> bool;

    /// Rewrite the graph around the node at `index`
    fn apply(&self, graph: &mut Graph, index: NodeIndex) -> Result<RuleEffect>;

    fn name(&self) -> &str {
        self.descriptor().name()
    }

    fn description(&self) -> &str {
        self.descriptor().description()
    }

    fn target_op_types(&self) -> &HashSet<String> {
        self.descriptor().target_op_types()
    }

    /// Run the body only when the condition holds
    fn check_condition_and_apply(&self, graph: &mut Graph, index: NodeIndex) -> Result<RuleEffect> {
        let satisfied = match graph.node(index) {
            Some(node) => self.satisfy_condition(graph, node),
            None => false,
        };

        if satisfied {
            self.apply(graph, index)
        } else {
            Ok(RuleEffect::unchanged())
        }
    }
}
