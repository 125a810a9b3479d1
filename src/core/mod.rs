//! Core DSL pipeline: types, parsing, resolution, execution, generation.

pub mod codegen;
pub mod condition;
pub mod executor;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod parser;
pub mod resolver;
pub mod state;
pub mod types;
