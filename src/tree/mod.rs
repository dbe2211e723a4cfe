//! Decision tree storage and prediction.

#[allow(clippy::module_inception)]
pub mod tree;

pub use tree::Tree;
