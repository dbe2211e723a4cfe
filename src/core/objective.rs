//! Objective-function contract consumed by the tree learner.

use crate::core::types::DataSize;

/// The slice of the objective-function interface the learner depends on:
/// some objectives (for example quantile-style losses) recompute leaf
/// outputs from the raw residuals after the tree structure is fixed.
pub trait ObjectiveFunction: Send + Sync {
    /// Whether leaf outputs should be renewed after training a tree.
    fn is_renew_tree_output(&self) -> bool {
        false
    }

    /// Compute a renewed output for one leaf.
    ///
    /// # Arguments
    /// * `old_output` - Current output of the leaf
    /// * `residual_getter` - Residual of the example with the given index
    /// * `indices` - Example indices assigned to the leaf
    /// * `bag_mapper` - Maps bagged positions back to full-dataset indices,
    ///   when training ran on a bagged subset
    fn renew_tree_output(
        &self,
        old_output: f64,
        residual_getter: &dyn Fn(DataSize) -> f64,
        indices: &[DataSize],
        bag_mapper: Option<&[DataSize]>,
    ) -> f64;
}
