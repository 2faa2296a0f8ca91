// Graph IR module
//
// Index-addressed node arena, the NodeArg and initializer registries, and
// the topology queries and splice primitives shared by every rewrite rule.

mod core;
mod node;
mod node_arg;
pub mod utils;

pub use self::core::{Edge, Graph};
pub use node::{Node, NodeIndex};
pub use node_arg::{NodeArg, NodeArgRole};
