use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};

/// Optimization level for the graph optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum OptimizationLevel {
    /// No rewrites
    None,
    /// Node eliminations only
    Basic,
    /// Eliminations followed by fusions (default)
    Standard,
    /// Same rule set as `Standard`; reserved for rewrites that trade precision
    Aggressive,
}

impl OptimizationLevel {
    /// Parse a level name, case-insensitively
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|e: strum::ParseError| Error::InvalidConfig(format!("unknown optimization level '{}': {}", name, e)))
    }
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        OptimizationLevel::Standard
    }
}

/// Order in which a pass visits the live nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TraversalOrder {
    /// Ascending node index
    Index,
    /// Producers before consumers
    Topological,
}

impl Default for TraversalOrder {
    fn default() -> Self {
        TraversalOrder::Index
    }
}

/// Options for the rewrite pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteOptions {
    /// Upper bound on full passes a transformer may make before giving up
    pub max_passes: usize,
    /// Node visiting order within a pass
    pub traversal_order: TraversalOrder,
    /// Which rule families run
    pub optimization_level: OptimizationLevel,
    /// Providers whose nodes may be rewritten (empty = all)
    pub compatible_execution_providers: HashSet<String>,
    /// Rule names to leave out of the default pipeline
    pub disabled_rules: HashSet<String>,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            max_passes: 10,
            traversal_order: TraversalOrder::Index,
            optimization_level: OptimizationLevel::Standard,
            compatible_execution_providers: HashSet::new(),
            disabled_rules: HashSet::new(),
        }
    }
}

impl RewriteOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pass limit
    pub fn set_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Set the traversal order
    pub fn set_traversal_order(mut self, order: TraversalOrder) -> Self {
        self.traversal_order = order;
        self
    }

    /// Set the optimization level
    pub fn set_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    /// Restrict rewriting to nodes on the given providers
    pub fn set_compatible_execution_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compatible_execution_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    /// Exclude a rule by name
    pub fn disable_rule(mut self, name: &str) -> Self {
        self.disabled_rules.insert(name.to_string());
        self
    }

    pub fn is_rule_enabled(&self, name: &str) -> bool {
        !self.disabled_rules.contains(name)
    }

    /// Parse and validate options from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Read, parse and validate options from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|e| Error::ConfigLoadError(path.to_path_buf(), e.to_string()))?;
        let options: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigLoadError(path.to_path_buf(), e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_passes == 0 {
            return Err(Error::InvalidConfig("max_passes must be at least 1".to_string()));
        }
        Ok(())
    }
}
