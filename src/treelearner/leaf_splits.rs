//! Per-leaf aggregate statistics used while searching for splits.

use crate::core::types::{DataSize, Score};
use rayon::prelude::*;

/// Chunk length of the deterministic parallel reduction.
const SUM_CHUNK: usize = 2048;

/// Aggregate statistics of the leaf currently under consideration.
///
/// `leaf_index == -1` means the slot is inactive (for example the larger
/// side while only the root exists).
#[derive(Debug, Clone)]
pub struct LeafSplits {
    leaf_index: i32,
    num_data_in_leaf: DataSize,
    num_data: DataSize,
    sum_gradients: f64,
    sum_hessians: f64,
}

impl LeafSplits {
    /// Create statistics for a dataset of `num_data` examples.
    pub fn new(num_data: DataSize) -> Self {
        LeafSplits {
            leaf_index: -1,
            num_data_in_leaf: num_data,
            num_data,
            sum_gradients: 0.0,
            sum_hessians: 0.0,
        }
    }

    /// Change the dataset size between trees.
    pub fn reset_num_data(&mut self, num_data: DataSize) {
        self.num_data = num_data;
        self.num_data_in_leaf = num_data;
    }

    /// Initialize as the root leaf over the full dataset.
    ///
    /// Sums are computed with a fixed chunk partition and a sequential fold
    /// over chunk results, so the totals do not depend on scheduling.
    pub fn init_from_gradients(&mut self, gradients: &[Score], hessians: &[Score]) {
        self.leaf_index = 0;
        self.num_data_in_leaf = self.num_data;
        let n = self.num_data as usize;
        let chunk_sums: Vec<(f64, f64)> = gradients[..n]
            .par_chunks(SUM_CHUNK)
            .zip(hessians[..n].par_chunks(SUM_CHUNK))
            .map(|(gs, hs)| {
                let mut sum_g = 0.0;
                let mut sum_h = 0.0;
                for (&g, &h) in gs.iter().zip(hs) {
                    sum_g += g as f64;
                    sum_h += h as f64;
                }
                (sum_g, sum_h)
            })
            .collect();
        let mut sum_g = 0.0;
        let mut sum_h = 0.0;
        for (g, h) in chunk_sums {
            sum_g += g;
            sum_h += h;
        }
        self.sum_gradients = sum_g;
        self.sum_hessians = sum_h;
    }

    /// Initialize for a known leaf with precomputed sums.
    pub fn init_with_sums(
        &mut self,
        leaf: i32,
        num_data_in_leaf: DataSize,
        sum_gradients: f64,
        sum_hessians: f64,
    ) {
        self.leaf_index = leaf;
        self.num_data_in_leaf = num_data_in_leaf;
        self.sum_gradients = sum_gradients;
        self.sum_hessians = sum_hessians;
    }

    /// Deactivate the slot.
    pub fn init_empty(&mut self) {
        self.leaf_index = -1;
        self.num_data_in_leaf = 0;
        self.sum_gradients = 0.0;
        self.sum_hessians = 0.0;
    }

    /// Leaf id, -1 when inactive.
    pub fn leaf_index(&self) -> i32 {
        self.leaf_index
    }

    /// Number of examples in the leaf.
    pub fn num_data_in_leaf(&self) -> DataSize {
        self.num_data_in_leaf
    }

    /// Gradient sum over the leaf.
    pub fn sum_gradients(&self) -> f64 {
        self.sum_gradients
    }

    /// Hessian sum over the leaf.
    pub fn sum_hessians(&self) -> f64 {
        self.sum_hessians
    }
}
