//! Network abstraction for distributed aggregation.
//!
//! The learner only needs machine count and a global element-wise sum. The
//! single-node implementation is the identity; a distributed runtime can
//! plug in its own reduction without the learner changing.

/// Aggregation interface consumed by the tree learner.
pub trait Network: Send + Sync {
    /// Number of machines participating in training.
    fn num_machines(&self) -> usize;

    /// Element-wise sum of `values` across all machines.
    fn global_sum(&self, values: &[f64]) -> Vec<f64>;

    /// Element-wise sum of integer counters across all machines.
    fn global_sum_counts(&self, values: &[i32]) -> Vec<i32>;
}

/// Single-machine network: every reduction is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleMachine;

impl Network for SingleMachine {
    fn num_machines(&self) -> usize {
        1
    }

    fn global_sum(&self, values: &[f64]) -> Vec<f64> {
        values.to_vec()
    }

    fn global_sum_counts(&self, values: &[i32]) -> Vec<i32> {
        values.to_vec()
    }
}
