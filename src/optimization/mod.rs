pub mod graph_optimizer;
pub mod initializer;
pub mod rewrite_rule;
pub mod rule_based_transformer;
pub mod rules;

pub use graph_optimizer::{GraphOptimizer, OptimizationPass, OptimizationStats, PassResult};
pub use initializer::{Initializer, InitializerData};
pub use rewrite_rule::{RewriteRule, RuleDescriptor, RuleEffect};
pub use rule_based_transformer::{DriverState, FixpointReport, RuleBasedGraphTransformer};
