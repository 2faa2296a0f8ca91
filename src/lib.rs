pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod optimization;
pub mod parser;
pub mod proto;

// Re-export commonly used types
pub use config::{OptimizationLevel, RewriteOptions, TraversalOrder};
pub use error::{Error, Result};
pub use graph::{Edge, Graph, NodeArg, NodeArgRole, NodeIndex};
pub use model::{DataType, Dimension, Tensor, TensorInfo};
pub use optimization::graph_optimizer::{GraphOptimizer, OptimizationPass, OptimizationStats, PassResult};
pub use optimization::rewrite_rule::{RewriteRule, RuleDescriptor, RuleEffect};
pub use optimization::rule_based_transformer::{DriverState, FixpointReport, RuleBasedGraphTransformer};
pub use parser::GraphBuilder;
