use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

use crate::config::{OptimizationLevel, RewriteOptions};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::optimization::rewrite_rule::RewriteRule;
use crate::optimization::rule_based_transformer::RuleBasedGraphTransformer;
use crate::optimization::rules::{elimination_rules, fusion_rules};

/// Name of the transformer holding the node eliminations
pub const ELIMINATION_TRANSFORMER: &str = "EliminationTransformer";
/// Name of the transformer holding the Conv fusions
pub const FUSION_TRANSFORMER: &str = "FusionTransformer";

/// Result of running an optimization pass
#[derive(Debug, Clone, Serialize)]
pub struct PassResult {
    /// Name of the pass
    pub name: String,
    /// Number of optimizations applied
    pub optimizations_applied: usize,
    /// Full sweeps over the graph, including the final unchanged one
    pub iterations: usize,
    /// Duration of the pass
    pub duration: Duration,
    /// Whether the pass made any changes
    pub changed: bool,
}

/// Statistics from running optimization passes
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationStats {
    /// Results from each pass
    pub pass_results: Vec<PassResult>,
    /// Total number of optimizations applied
    pub total_optimizations: usize,
    /// Total time spent optimizing
    pub total_duration: Duration,
}

impl OptimizationStats {
    /// Create a new optimization stats object
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass result
    pub fn add_pass_result(&mut self, result: PassResult) {
        self.total_optimizations += result.optimizations_applied;
        self.total_duration += result.duration;
        self.pass_results.push(result);
    }

    /// Serialize for reporting
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Trait for graph optimization passes
pub trait OptimizationPass: Send + Sync {
    /// Name of the pass
    fn name(&self) -> &str;

    /// Run the pass on the graph
    fn run(&self, graph: &mut Graph) -> Result<PassResult>;

    /// Dependencies of this pass (names of passes that must run before this one)
    fn dependencies(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// Graph optimizer that applies optimization passes
pub struct GraphOptimizer {
    options: RewriteOptions,
    /// Passes registered on top of the level defaults
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl GraphOptimizer {
    /// Create a new graph optimizer
    pub fn new(options: RewriteOptions) -> Self {
        Self {
            options,
            passes: Vec::new(),
        }
    }

    pub fn options(&self) -> &RewriteOptions {
        &self.options
    }

    /// Register an additional optimization pass
    pub fn register_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Create default passes for the configured optimization level
    pub fn create_default_passes(options: &RewriteOptions) -> Result<Vec<Box<dyn OptimizationPass>>> {
        let (eliminations, fusions) = match options.optimization_level {
            OptimizationLevel::None => return Ok(Vec::new()),
            OptimizationLevel::Basic => (true, false),
            OptimizationLevel::Standard | OptimizationLevel::Aggressive => (true, true),
        };

        let mut passes: Vec<Box<dyn OptimizationPass>> = Vec::new();
        if eliminations {
            let transformer = Self::build_transformer(
                RuleBasedGraphTransformer::new(ELIMINATION_TRANSFORMER, "Remove nodes that copy their input"),
                elimination_rules(),
                options,
            )?;
            passes.push(Box::new(transformer));
        }
        if fusions {
            let transformer = Self::build_transformer(
                RuleBasedGraphTransformer::new(FUSION_TRANSFORMER, "Fold constant consumers into Conv")
                    .with_dependencies([ELIMINATION_TRANSFORMER]),
                fusion_rules(),
                options,
            )?;
            passes.push(Box::new(transformer));
        }

        Ok(passes)
    }

    fn build_transformer(
        mut transformer: RuleBasedGraphTransformer,
        rules: Vec<Box<dyn RewriteRule>>,
        options: &RewriteOptions,
    ) -> Result<RuleBasedGraphTransformer> {
        transformer = transformer.with_options(options);
        for rule in rules {
            if options.is_rule_enabled(rule.name()) {
                transformer.register(rule)?;
            } else {
                debug!("Rule '{}' disabled by configuration", rule.name());
            }
        }
        Ok(transformer)
    }

    /// Optimize the graph with the level defaults plus registered passes
    pub fn optimize(&self, graph: &mut Graph) -> Result<OptimizationStats> {
        self.options.validate()?;

        let defaults = Self::create_default_passes(&self.options)?;
        let passes: Vec<&Box<dyn OptimizationPass>> = defaults.iter().chain(self.passes.iter()).collect();
        let stats = self.run_passes(graph, &passes)?;

        info!(
            "Optimized graph '{}' at level {}: {} rewrites in {:?}",
            graph.name(),
            self.options.optimization_level,
            stats.total_optimizations,
            stats.total_duration
        );
        Ok(stats)
    }

    /// Run multiple passes in dependency order
    pub fn run_passes(&self, graph: &mut Graph, passes: &[&Box<dyn OptimizationPass>]) -> Result<OptimizationStats> {
        let mut stats = OptimizationStats::new();

        let sorted_passes = self.sort_passes_by_dependencies(passes)?;

        for pass in sorted_passes {
            debug!("Running pass '{}'", pass.name());
            let result = pass.run(graph)?;
            stats.add_pass_result(result);
        }

        Ok(stats)
    }

    /// Sort passes by dependencies
    fn sort_passes_by_dependencies<'a>(
        &self,
        passes: &[&'a Box<dyn OptimizationPass>],
    ) -> Result<Vec<&'a Box<dyn OptimizationPass>>> {
        let mut sorted_passes = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        let mut dep_graph: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut pass_map: HashMap<&str, &'a Box<dyn OptimizationPass>> = HashMap::new();

        for &pass in passes {
            let name = pass.name();
            if pass_map.insert(name, pass).is_some() {
                return Err(Error::InvalidConfig(format!("Optimization pass '{}' registered twice", name)));
            }
            dep_graph.insert(name, pass.dependencies());
        }

        for &pass in passes {
            let name = pass.name();
            if !visited.contains(name) {
                Self::dfs_sort(name, &dep_graph, &pass_map, &mut visited, &mut visiting, &mut sorted_passes)?;
            }
        }

        Ok(sorted_passes)
    }

    /// DFS helper for topological sort
    fn dfs_sort<'a, 'n>(
        pass_name: &'n str,
        dep_graph: &HashMap<&'n str, Vec<&'n str>>,
        pass_map: &HashMap<&'n str, &'a Box<dyn OptimizationPass>>,
        visited: &mut HashSet<&'n str>,
        visiting: &mut HashSet<&'n str>,
        sorted_passes: &mut Vec<&'a Box<dyn OptimizationPass>>,
    ) -> Result<()> {
        if visited.contains(pass_name) {
            return Ok(());
        }

        if visiting.contains(pass_name) {
            return Err(Error::InvalidConfig(format!(
                "Cycle detected in optimization pass dependencies: {}",
                pass_name
            )));
        }

        visiting.insert(pass_name);

        if let Some(deps) = dep_graph.get(pass_name) {
            for &dep in deps {
                if !pass_map.contains_key(dep) {
                    return Err(Error::InvalidConfig(format!(
                        "Optimization pass '{}' depends on '{}', which is not registered",
                        pass_name, dep
                    )));
                }

                Self::dfs_sort(dep, dep_graph, pass_map, visited, visiting, sorted_passes)?;
            }
        }

        visiting.remove(pass_name);
        visited.insert(pass_name);

        if let Some(&pass) = pass_map.get(pass_name) {
            sorted_passes.push(pass);
        }

        Ok(())
    }
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new(RewriteOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedPass {
        name: &'static str,
        deps: Vec<&'static str>,
    }

    impl OptimizationPass for NamedPass {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&self, _graph: &mut Graph) -> Result<PassResult> {
            Ok(PassResult {
                name: self.name.to_string(),
                optimizations_applied: 0,
                iterations: 1,
                duration: Duration::default(),
                changed: false,
            })
        }

        fn dependencies(&self) -> Vec<&str> {
            self.deps.clone()
        }
    }

    fn boxed(name: &'static str, deps: &[&'static str]) -> Box<dyn OptimizationPass> {
        Box::new(NamedPass {
            name,
            deps: deps.to_vec(),
        })
    }

    #[test]
    fn test_default_passes_per_level() {
        let names = |level| {
            let options = RewriteOptions::new().set_optimization_level(level);
            GraphOptimizer::create_default_passes(&options)
                .unwrap()
                .iter()
                .map(|p| p.name().to_string())
                .collect::<Vec<_>>()
        };

        assert!(names(OptimizationLevel::None).is_empty());
        assert_eq!(names(OptimizationLevel::Basic), vec![ELIMINATION_TRANSFORMER]);
        assert_eq!(
            names(OptimizationLevel::Standard),
            vec![ELIMINATION_TRANSFORMER, FUSION_TRANSFORMER]
        );
        assert_eq!(names(OptimizationLevel::Aggressive), names(OptimizationLevel::Standard));
    }

    #[test]
    fn test_passes_run_after_their_dependencies() {
        let optimizer = GraphOptimizer::default();
        let b = boxed("b", &["a"]);
        let a = boxed("a", &[]);
        let c = boxed("c", &["b", "a"]);

        let stats = optimizer.run_passes(&mut Graph::new("g"), &[&c, &b, &a]).unwrap();
        let order: Vec<&str> = stats.pass_results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dependency_errors() {
        let optimizer = GraphOptimizer::default();
        let missing = boxed("x", &["nowhere"]);
        assert!(matches!(
            optimizer.run_passes(&mut Graph::new("g"), &[&missing]),
            Err(Error::InvalidConfig(_))
        ));

        let a = boxed("a", &["b"]);
        let b = boxed("b", &["a"]);
        assert!(optimizer.run_passes(&mut Graph::new("g"), &[&a, &b]).is_err());
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = OptimizationStats::new();
        stats.add_pass_result(PassResult {
            name: "p".to_string(),
            optimizations_applied: 3,
            iterations: 2,
            duration: Duration::from_millis(5),
            changed: true,
        });

        assert_eq!(stats.total_optimizations, 3);
        let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(json["pass_results"][0]["optimizations_applied"], 3);
    }
}
