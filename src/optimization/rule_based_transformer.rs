use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, info, trace, warn};
use serde::Serialize;

use crate::config::{RewriteOptions, TraversalOrder};
use crate::error::{Error, Result};
use crate::graph::utils::is_supported_provider;
use crate::graph::{Graph, NodeIndex};
use crate::optimization::graph_optimizer::{OptimizationPass, PassResult};
use crate::optimization::rewrite_rule::RewriteRule;

/// Observable phase of the rewrite driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    /// Walking the snapshot of live nodes
    ScanningPass,
    /// Running the rules registered for one node
    RuleEvaluating,
    /// A full pass changed nothing
    Converged,
    /// A rule failed or the pass limit was hit
    Aborted,
}

/// Outcome of driving a graph to a fixpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixpointReport {
    /// Full passes made, including the final one that changed nothing
    pub passes: usize,
    /// Rule applications that modified the graph
    pub applications: usize,
}

/// Graph transformer that applies a set of rewrite rules node by node until
/// a full pass over the graph makes no change
///
/// Rules are looked up by the op type of the node being visited; rules with
/// an empty target set run on every node after the op-type specific ones.
/// Within each group rules run in registration order.
pub struct RuleBasedGraphTransformer {
    name: String,
    description: String,
    compatible_execution_providers: HashSet<String>,
    dependencies: Vec<String>,
    max_passes: usize,
    traversal_order: TraversalOrder,
    rules: Vec<Box<dyn RewriteRule>>,
    op_type_to_rules: HashMap<String, Vec<usize>>,
    any_op_type_rules: Vec<usize>,
    state: Mutex<DriverState>,
}

impl RuleBasedGraphTransformer {
    pub fn new(name: &str, description: &str) -> Self {
        let defaults = RewriteOptions::default();
        Self {
            name: name.to_string(),
            description: description.to_string(),
            compatible_execution_providers: HashSet::new(),
            dependencies: Vec::new(),
            max_passes: defaults.max_passes,
            traversal_order: defaults.traversal_order,
            rules: Vec::new(),
            op_type_to_rules: HashMap::new(),
            any_op_type_rules: Vec::new(),
            state: Mutex::new(DriverState::Converged),
        }
    }

    /// Take pass limit, traversal order and provider filter from options
    pub fn with_options(self, options: &RewriteOptions) -> Self {
        self.with_max_passes(options.max_passes)
            .with_traversal_order(options.traversal_order)
            .with_compatible_execution_providers(options.compatible_execution_providers.iter().cloned())
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn with_traversal_order(mut self, order: TraversalOrder) -> Self {
        self.traversal_order = order;
        self
    }

    /// Only visit nodes assigned to one of these providers (empty = all)
    pub fn with_compatible_execution_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compatible_execution_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    /// Transformers that must run before this one in a pipeline
    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    /// Add a rule; names must be unique within a transformer
    pub fn register(&mut self, rule: Box<dyn RewriteRule>) -> Result<()> {
        if self.rules.iter().any(|r| r.name() == rule.name()) {
            return Err(Error::InvalidConfig(format!(
                "Rule '{}' is already registered with transformer '{}'",
                rule.name(),
                self.name
            )));
        }

        let id = self.rules.len();
        if rule.target_op_types().is_empty() {
            self.any_op_type_rules.push(id);
        } else {
            let mut op_types: Vec<&String> = rule.target_op_types().iter().collect();
            op_types.sort();
            for op_type in op_types {
                self.op_type_to_rules.entry(op_type.clone()).or_default().push(id);
            }
        }

        debug!("Transformer '{}': registered rule '{}'", self.name, rule.name());
        self.rules.push(rule);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    /// Names of the rules tried on a node of `op_type`, in evaluation order
    pub fn rules_for_op_type(&self, op_type: &str) -> Vec<&str> {
        self.rule_ids_for(op_type)
            .into_iter()
            .map(|id| self.rules[id].name())
            .collect()
    }

    /// State the driver was in when it last stopped
    pub fn last_state(&self) -> DriverState {
        self.state.lock().map(|s| *s).unwrap_or(DriverState::Aborted)
    }

    fn transition(&self, to: DriverState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != to {
                trace!("Transformer '{}': {:?} -> {:?}", self.name, *state, to);
                *state = to;
            }
        }
    }

    fn rule_ids_for(&self, op_type: &str) -> Vec<usize> {
        self.op_type_to_rules
            .get(op_type)
            .into_iter()
            .flatten()
            .chain(self.any_op_type_rules.iter())
            .copied()
            .collect()
    }

    fn visit_order(&self, graph: &Graph) -> Result<Vec<NodeIndex>> {
        match self.traversal_order {
            TraversalOrder::Index => Ok(graph.node_indices()),
            TraversalOrder::Topological => graph.topological_order(),
        }
    }

    /// Rewrite the graph until a full pass changes nothing
    pub fn apply(&self, graph: &mut Graph) -> Result<FixpointReport> {
        let mut report = FixpointReport {
            passes: 0,
            applications: 0,
        };

        loop {
            if report.passes == self.max_passes {
                self.transition(DriverState::Aborted);
                warn!(
                    "Transformer '{}' still changing the graph after {} passes",
                    self.name, self.max_passes
                );
                return Err(Error::PassLimitExceeded {
                    transformer: self.name.clone(),
                    max_passes: self.max_passes,
                });
            }

            self.transition(DriverState::ScanningPass);
            report.passes += 1;
            let order = match self.visit_order(graph) {
                Ok(order) => order,
                Err(e) => {
                    self.transition(DriverState::Aborted);
                    return Err(e);
                }
            };

            let mut modified = false;
            for index in order {
                let applied = match self.apply_rules_to_node(graph, index) {
                    Ok(applied) => applied,
                    Err(e) => {
                        self.transition(DriverState::Aborted);
                        return Err(e);
                    }
                };
                if applied > 0 {
                    modified = true;
                    report.applications += applied;
                }
                self.transition(DriverState::ScanningPass);
            }

            debug!(
                "Transformer '{}': pass {} {}",
                self.name,
                report.passes,
                if modified { "modified the graph" } else { "made no change" }
            );
            if !modified {
                break;
            }
        }

        self.transition(DriverState::Converged);
        info!(
            "Transformer '{}' converged after {} passes with {} rewrites",
            self.name, report.passes, report.applications
        );
        Ok(report)
    }

    fn apply_rules_to_node(&self, graph: &mut Graph, index: NodeIndex) -> Result<usize> {
        let rule_ids = match graph.node(index) {
            Some(node) if is_supported_provider(node, &self.compatible_execution_providers) => {
                self.rule_ids_for(node.op_type())
            }
            _ => return Ok(0),
        };
        if rule_ids.is_empty() {
            return Ok(0);
        }

        self.transition(DriverState::RuleEvaluating);
        let mut applied = 0;
        for id in rule_ids {
            let rule = &self.rules[id];
            let compatible = match graph.node(index) {
                Some(node) => is_supported_provider(node, rule.descriptor().compatible_execution_providers()),
                None => break,
            };
            if !compatible {
                continue;
            }

            let effect = rule
                .check_condition_and_apply(graph, index)
                .map_err(|source| Error::RuleFailed {
                    rule: rule.name().to_string(),
                    node: index,
                    source: Box::new(source),
                })?;

            // A deletion is a change even when the rule forgot to say so
            if effect.modified || effect.deleted {
                trace!("Rule '{}' rewrote around node {}", rule.name(), index);
                applied += 1;
            }
            if effect.deleted {
                break;
            }
        }
        Ok(applied)
    }
}

impl OptimizationPass for RuleBasedGraphTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let start = Instant::now();
        let report = self.apply(graph)?;

        Ok(PassResult {
            name: self.name.clone(),
            optimizations_applied: report.applications,
            iterations: report.passes,
            duration: start.elapsed(),
            changed: report.applications > 0,
        })
    }

    fn dependencies(&self) -> Vec<&str> {
        self.dependencies.iter().map(String::as_str).collect()
    }
}
