//! Data partition: per-leaf contiguous runs of example indices.
//!
//! All example indices live in a single buffer of length `num_data`; each
//! leaf owns one contiguous run. Splitting a leaf rewrites its run in place
//! so the left child keeps the front and the right child takes the back,
//! which keeps every run contiguous for the whole tree.

use crate::core::types::DataSize;
use crate::dataset::dataset::{Dataset, SplitThreshold};

/// Maps each leaf to the set of example indices it currently holds.
#[derive(Debug, Clone)]
pub struct DataPartition {
    num_data: DataSize,
    num_leaves: usize,
    leaf_begin: Vec<DataSize>,
    leaf_count: Vec<DataSize>,
    indices: Vec<DataSize>,
}

impl DataPartition {
    /// Create a partition over `num_data` examples and `num_leaves` slots.
    pub fn new(num_data: DataSize, num_leaves: usize) -> Self {
        DataPartition {
            num_data,
            num_leaves,
            leaf_begin: vec![0; num_leaves],
            leaf_count: vec![0; num_leaves],
            indices: vec![0; num_data as usize],
        }
    }

    /// Change the number of leaf slots between trees.
    pub fn reset_leaves(&mut self, num_leaves: usize) {
        self.num_leaves = num_leaves;
        self.leaf_begin.resize(num_leaves, 0);
        self.leaf_count.resize(num_leaves, 0);
    }

    /// Change the number of examples between datasets.
    pub fn reset_num_data(&mut self, num_data: DataSize) {
        self.num_data = num_data;
        self.indices.resize(num_data as usize, 0);
    }

    /// Put every example into the root leaf.
    pub fn init(&mut self) {
        self.leaf_begin.fill(0);
        self.leaf_count.fill(0);
        self.leaf_count[0] = self.num_data;
        for (i, idx) in self.indices.iter_mut().enumerate() {
            *idx = i as DataSize;
        }
    }

    /// Re-partition examples by a per-example leaf prediction.
    ///
    /// Used by refit on a fixed tree structure: `leaf_pred[i]` names the
    /// leaf example `i` lands in.
    pub fn reset_by_leaf_pred(&mut self, leaf_pred: &[i32], num_leaves: usize) {
        self.reset_leaves(num_leaves);
        let mut per_leaf: Vec<Vec<DataSize>> = vec![Vec::new(); num_leaves];
        for (i, &leaf) in leaf_pred.iter().enumerate() {
            if leaf >= 0 && (leaf as usize) < num_leaves {
                per_leaf[leaf as usize].push(i as DataSize);
            }
        }
        let mut offset: DataSize = 0;
        for (leaf, bucket) in per_leaf.iter().enumerate() {
            self.leaf_begin[leaf] = offset;
            self.leaf_count[leaf] = bucket.len() as DataSize;
            let start = offset as usize;
            self.indices[start..start + bucket.len()].copy_from_slice(bucket);
            offset += bucket.len() as DataSize;
        }
    }

    /// Example indices of one leaf.
    pub fn leaf_indices(&self, leaf: usize) -> &[DataSize] {
        let begin = self.leaf_begin[leaf] as usize;
        let count = self.leaf_count[leaf] as usize;
        &self.indices[begin..begin + count]
    }

    /// Number of examples in one leaf.
    pub fn leaf_count(&self, leaf: usize) -> DataSize {
        self.leaf_count[leaf]
    }

    /// Number of leaf slots.
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// Split the run of `leaf` on a feature threshold.
    ///
    /// Left indices stay keyed under `leaf`, right indices move under
    /// `right_leaf`. The split decision is delegated to the dataset, which
    /// owns the binned columns.
    pub fn split(
        &mut self,
        leaf: usize,
        dataset: &Dataset,
        inner_feature: usize,
        threshold: &SplitThreshold<'_>,
        default_left: bool,
        right_leaf: usize,
    ) {
        let begin = self.leaf_begin[leaf];
        let count = self.leaf_count[leaf];
        let start = begin as usize;
        let run = &mut self.indices[start..start + count as usize];
        let left_count = dataset.split_indices(inner_feature, threshold, default_left, run);
        self.leaf_count[leaf] = left_count;
        self.leaf_begin[right_leaf] = begin + left_count;
        self.leaf_count[right_leaf] = count - left_count;
    }
}
