#![deny(missing_docs)]
#![doc = include_str!("../docs/model-api.md")]

mod builder;
pub mod distributions;
pub mod functions;
mod graph;
mod node;
mod value;

pub use builder::ModelBuilder;
pub use distributions::Distribution;
pub use functions::DeterministicFunction;
pub use graph::Model;
pub use node::{Node, NodeKind};
pub use value::Value;
