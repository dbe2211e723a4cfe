//! Decision tree storage.
//!
//! The tree is stored as parallel arrays over internal nodes and leaves.
//! Child pointers are signed: a non-negative value names an internal node,
//! a negative value `c` names leaf `!c`. Splitting leaf `p` turns it into
//! the left child (keeping id `p`) and creates the right child with the next
//! free leaf id, so leaf ids stay dense in `[0, num_leaves)`.

use crate::core::types::DataSize;
use crate::core::utils::{construct_bitset, find_in_bitset};
use crate::dataset::binning::MissingType;
use serde::{Deserialize, Serialize};

const CATEGORICAL_MASK: i8 = 1;
const DEFAULT_LEFT_MASK: i8 = 2;

const K_ZERO_THRESHOLD: f64 = 1e-35;

/// A single regression tree grown leaf-wise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    max_leaves: usize,
    num_leaves: usize,
    shrinkage: f64,
    num_cat: i32,

    // Internal node arrays, sized max_leaves - 1
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    split_feature_inner: Vec<i32>,
    split_feature: Vec<i32>,
    threshold_in_bin: Vec<u32>,
    threshold: Vec<f64>,
    decision_type: Vec<i8>,
    split_gain: Vec<f32>,
    internal_value: Vec<f64>,
    internal_weight: Vec<f64>,
    internal_count: Vec<DataSize>,

    // Leaf arrays, sized max_leaves
    leaf_parent: Vec<i32>,
    leaf_value: Vec<f64>,
    leaf_weight: Vec<f64>,
    leaf_count: Vec<DataSize>,
    leaf_depth: Vec<i32>,

    // Categorical thresholds, in bin space (for the partition) and in
    // category-value space (for prediction on raw features)
    cat_boundaries_inner: Vec<i32>,
    cat_threshold_inner: Vec<u32>,
    cat_boundaries: Vec<i32>,
    cat_threshold: Vec<u32>,
}

impl Tree {
    /// Create a single-leaf tree with capacity for `max_leaves` leaves.
    pub fn new(max_leaves: usize) -> Self {
        let internal = max_leaves.saturating_sub(1);
        let mut tree = Tree {
            max_leaves,
            num_leaves: 1,
            shrinkage: 1.0,
            num_cat: 0,
            left_child: vec![0; internal],
            right_child: vec![0; internal],
            split_feature_inner: vec![0; internal],
            split_feature: vec![0; internal],
            threshold_in_bin: vec![0; internal],
            threshold: vec![0.0; internal],
            decision_type: vec![0; internal],
            split_gain: vec![0.0; internal],
            internal_value: vec![0.0; internal],
            internal_weight: vec![0.0; internal],
            internal_count: vec![0; internal],
            leaf_parent: vec![-1; max_leaves],
            leaf_value: vec![0.0; max_leaves],
            leaf_weight: vec![0.0; max_leaves],
            leaf_count: vec![0; max_leaves],
            leaf_depth: vec![0; max_leaves],
            cat_boundaries_inner: vec![0],
            cat_threshold_inner: Vec::new(),
            cat_boundaries: vec![0],
            cat_threshold: Vec::new(),
        };
        tree.leaf_depth[0] = 0;
        tree
    }

    /// Current number of leaves.
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// Leaf id the next split will assign to the right child.
    pub fn next_leaf_id(&self) -> usize {
        self.num_leaves
    }

    /// Depth of a leaf (root leaf has depth 0).
    pub fn leaf_depth(&self, leaf: usize) -> i32 {
        self.leaf_depth[leaf]
    }

    /// Output value of a leaf.
    pub fn leaf_output(&self, leaf: usize) -> f64 {
        self.leaf_value[leaf]
    }

    /// Overwrite the output value of a leaf.
    pub fn set_leaf_output(&mut self, leaf: usize, value: f64) {
        self.leaf_value[leaf] = value;
    }

    /// Number of training examples that reached a leaf.
    pub fn leaf_count(&self, leaf: usize) -> DataSize {
        self.leaf_count[leaf]
    }

    /// Accumulated shrinkage of this tree.
    pub fn shrinkage(&self) -> f64 {
        self.shrinkage
    }

    /// Scale every output by `rate` and fold it into the stored shrinkage.
    pub fn apply_shrinkage(&mut self, rate: f64) {
        for v in self.leaf_value.iter_mut().take(self.num_leaves) {
            *v *= rate;
        }
        for v in self
            .internal_value
            .iter_mut()
            .take(self.num_leaves.saturating_sub(1))
        {
            *v *= rate;
        }
        self.shrinkage *= rate;
    }

    /// Split a leaf on a numerical feature.
    ///
    /// # Arguments
    /// * `leaf` - Leaf to split; keeps its id as the left child
    /// * `inner_feature` / `real_feature` - Feature in both index spaces
    /// * `threshold_bin` - Logical bin threshold (bins at or below go left)
    /// * `threshold_double` - Decoded real-valued threshold for prediction
    /// * `left_value` / `right_value` - Child outputs
    /// * `left_count` / `right_count` - Child example counts
    /// * `left_weight` / `right_weight` - Child hessian sums
    /// * `gain` - Split gain
    /// * `missing_type` - Missing encoding of the feature
    /// * `default_left` - Whether missing values follow the left child
    ///
    /// Returns the id of the new right leaf.
    #[allow(clippy::too_many_arguments)]
    pub fn split(
        &mut self,
        leaf: usize,
        inner_feature: usize,
        real_feature: usize,
        threshold_bin: u32,
        threshold_double: f64,
        left_value: f64,
        right_value: f64,
        left_count: DataSize,
        right_count: DataSize,
        left_weight: f64,
        right_weight: f64,
        gain: f32,
        missing_type: MissingType,
        default_left: bool,
    ) -> usize {
        let node = self.split_internal(
            leaf,
            inner_feature,
            real_feature,
            left_value,
            right_value,
            left_count,
            right_count,
            left_weight,
            right_weight,
            gain,
        );
        self.decision_type[node] = 0;
        self.set_decision_bit(node, false, CATEGORICAL_MASK);
        self.set_decision_bit(node, default_left, DEFAULT_LEFT_MASK);
        self.set_missing_type(node, missing_type);
        self.threshold_in_bin[node] = threshold_bin;
        self.threshold[node] = threshold_double;
        self.num_leaves += 1;
        self.num_leaves - 1
    }

    /// Split a leaf on a categorical feature.
    ///
    /// `bitset_inner` holds the logical bins that go left, `bitset_real` the
    /// raw category values that go left. Returns the id of the new right
    /// leaf.
    #[allow(clippy::too_many_arguments)]
    pub fn split_categorical(
        &mut self,
        leaf: usize,
        inner_feature: usize,
        real_feature: usize,
        bitset_inner: &[u32],
        bitset_real: &[u32],
        left_value: f64,
        right_value: f64,
        left_count: DataSize,
        right_count: DataSize,
        left_weight: f64,
        right_weight: f64,
        gain: f32,
        missing_type: MissingType,
    ) -> usize {
        let node = self.split_internal(
            leaf,
            inner_feature,
            real_feature,
            left_value,
            right_value,
            left_count,
            right_count,
            left_weight,
            right_weight,
            gain,
        );
        self.decision_type[node] = 0;
        self.set_decision_bit(node, true, CATEGORICAL_MASK);
        self.set_missing_type(node, missing_type);
        // The threshold slot stores the index into the categorical tables.
        self.threshold_in_bin[node] = self.num_cat as u32;
        self.threshold[node] = self.num_cat as f64;
        self.num_cat += 1;
        self.cat_boundaries_inner
            .push(self.cat_boundaries_inner.last().unwrap() + bitset_inner.len() as i32);
        self.cat_threshold_inner.extend_from_slice(bitset_inner);
        self.cat_boundaries
            .push(self.cat_boundaries.last().unwrap() + bitset_real.len() as i32);
        self.cat_threshold.extend_from_slice(bitset_real);
        self.num_leaves += 1;
        self.num_leaves - 1
    }

    #[allow(clippy::too_many_arguments)]
    fn split_internal(
        &mut self,
        leaf: usize,
        inner_feature: usize,
        real_feature: usize,
        left_value: f64,
        right_value: f64,
        left_count: DataSize,
        right_count: DataSize,
        left_weight: f64,
        right_weight: f64,
        gain: f32,
    ) -> usize {
        let node = self.num_leaves - 1;
        let right_leaf = self.num_leaves;
        let parent = self.leaf_parent[leaf];
        if parent >= 0 {
            // Rewire the pointer that used to name this leaf.
            let parent = parent as usize;
            if self.left_child[parent] == !(leaf as i32) {
                self.left_child[parent] = node as i32;
            } else {
                self.right_child[parent] = node as i32;
            }
        }
        self.split_feature_inner[node] = inner_feature as i32;
        self.split_feature[node] = real_feature as i32;
        self.split_gain[node] = gain;
        self.left_child[node] = !(leaf as i32);
        self.right_child[node] = !(right_leaf as i32);
        self.internal_value[node] = self.leaf_value[leaf];
        self.internal_weight[node] = self.leaf_weight[leaf];
        self.internal_count[node] = left_count + right_count;
        self.leaf_value[leaf] = if left_value.is_nan() { 0.0 } else { left_value };
        self.leaf_value[right_leaf] = if right_value.is_nan() { 0.0 } else { right_value };
        self.leaf_weight[leaf] = left_weight;
        self.leaf_weight[right_leaf] = right_weight;
        self.leaf_count[leaf] = left_count;
        self.leaf_count[right_leaf] = right_count;
        self.leaf_parent[leaf] = node as i32;
        self.leaf_parent[right_leaf] = node as i32;
        self.leaf_depth[right_leaf] = self.leaf_depth[leaf] + 1;
        self.leaf_depth[leaf] += 1;
        node
    }

    /// Leaf an example with the given raw feature vector lands in.
    ///
    /// `features` is indexed by real feature index.
    pub fn predict_leaf_index(&self, features: &[f64]) -> usize {
        if self.num_leaves <= 1 {
            return 0;
        }
        let mut node: i32 = 0;
        loop {
            let n = node as usize;
            let value = features[self.split_feature[n] as usize];
            let go_left = if self.is_categorical(n) {
                self.categorical_decision(value, n)
            } else {
                self.numerical_decision(value, n)
            };
            node = if go_left {
                self.left_child[n]
            } else {
                self.right_child[n]
            };
            if node < 0 {
                return !node as usize;
            }
        }
    }

    /// Output of the leaf an example lands in.
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.leaf_value[self.predict_leaf_index(features)]
    }

    /// Add this tree's prediction to a score accumulator, one row at a time.
    pub fn add_prediction_to_score(&self, rows: &[Vec<f64>], scores: &mut [f64]) {
        for (row, score) in rows.iter().zip(scores.iter_mut()) {
            *score += self.predict(row);
        }
    }

    fn numerical_decision(&self, value: f64, node: usize) -> bool {
        let missing = self.missing_type(node);
        let is_missing = match missing {
            MissingType::NaN => value.is_nan(),
            MissingType::Zero => value.abs() < K_ZERO_THRESHOLD,
            MissingType::None => false,
        };
        if is_missing {
            return self.default_left(node);
        }
        if value.is_nan() {
            // NaN on a feature without NaN handling follows the default.
            return self.default_left(node);
        }
        value <= self.threshold[node]
    }

    fn categorical_decision(&self, value: f64, node: usize) -> bool {
        if !value.is_finite() || value < 0.0 {
            return false;
        }
        let cat = value.round() as u32;
        let slot = self.threshold_in_bin[node] as usize;
        let begin = self.cat_boundaries[slot] as usize;
        let end = self.cat_boundaries[slot + 1] as usize;
        find_in_bitset(&self.cat_threshold[begin..end], cat)
    }

    /// Bitset of logical bins routed left by a categorical node.
    pub fn categorical_bin_bitset(&self, node: usize) -> &[u32] {
        let slot = self.threshold_in_bin[node] as usize;
        let begin = self.cat_boundaries_inner[slot] as usize;
        let end = self.cat_boundaries_inner[slot + 1] as usize;
        &self.cat_threshold_inner[begin..end]
    }

    fn is_categorical(&self, node: usize) -> bool {
        self.decision_type[node] & CATEGORICAL_MASK != 0
    }

    fn default_left(&self, node: usize) -> bool {
        self.decision_type[node] & DEFAULT_LEFT_MASK != 0
    }

    fn set_decision_bit(&mut self, node: usize, value: bool, mask: i8) {
        if value {
            self.decision_type[node] |= mask;
        } else {
            self.decision_type[node] &= !mask;
        }
    }

    fn set_missing_type(&mut self, node: usize, missing: MissingType) {
        let code: i8 = match missing {
            MissingType::None => 0,
            MissingType::Zero => 1,
            MissingType::NaN => 2,
        };
        self.decision_type[node] = (self.decision_type[node] & 0b0011) | (code << 2);
    }

    fn missing_type(&self, node: usize) -> MissingType {
        match (self.decision_type[node] >> 2) & 0b11 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }

    /// Real feature index of an internal node's split.
    pub fn split_feature(&self, node: usize) -> usize {
        self.split_feature[node] as usize
    }

    /// Gain recorded for an internal node's split.
    pub fn split_gain(&self, node: usize) -> f32 {
        self.split_gain[node]
    }
}

/// Helper building a real-valued categorical bitset from category values.
pub fn category_bitset(categories: &[i32]) -> Vec<u32> {
    let non_negative: Vec<u32> = categories
        .iter()
        .filter(|&&c| c >= 0)
        .map(|&c| c as u32)
        .collect();
    construct_bitset(&non_negative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tree_is_single_leaf() {
        let tree = Tree::new(31);
        assert_eq!(tree.num_leaves(), 1);
        assert_eq!(tree.leaf_depth(0), 0);
        assert_eq!(tree.predict_leaf_index(&[1.0, 2.0]), 0);
    }

    #[test]
    fn test_split_assigns_dense_leaf_ids() {
        let mut tree = Tree::new(4);
        let right = tree.split(
            0, 0, 0, 0, 1.5, -1.0, 1.0, 4, 4, 4.0, 4.0, 8.0, MissingType::None, true,
        );
        assert_eq!(right, 1);
        assert_eq!(tree.num_leaves(), 2);
        assert_eq!(tree.leaf_depth(0), 1);
        assert_eq!(tree.leaf_depth(1), 1);

        let right = tree.split(
            1, 0, 0, 1, 2.5, 0.5, 2.0, 2, 2, 2.0, 2.0, 4.0, MissingType::None, true,
        );
        assert_eq!(right, 2);
        assert_eq!(tree.leaf_depth(1), 2);
        assert_eq!(tree.leaf_depth(2), 2);
        assert_eq!(tree.leaf_depth(0), 1);
    }

    #[test]
    fn test_prediction_routing() {
        let mut tree = Tree::new(4);
        tree.split(
            0, 0, 0, 0, 1.5, -1.0, 1.0, 4, 4, 4.0, 4.0, 8.0, MissingType::None, true,
        );
        assert_eq!(tree.predict_leaf_index(&[1.0]), 0);
        assert_eq!(tree.predict_leaf_index(&[2.0]), 1);
        assert_eq!(tree.predict(&[1.0]), -1.0);
        assert_eq!(tree.predict(&[2.0]), 1.0);
    }

    #[test]
    fn test_missing_follows_default() {
        let mut tree = Tree::new(4);
        tree.split(
            0, 0, 0, 0, 1.5, -1.0, 1.0, 4, 4, 4.0, 4.0, 8.0, MissingType::NaN, false,
        );
        assert_eq!(tree.predict_leaf_index(&[f64::NAN]), 1);
    }

    #[test]
    fn test_categorical_split_routing() {
        let mut tree = Tree::new(4);
        let bitset_inner = construct_bitset(&[0, 2]);
        let bitset_real = category_bitset(&[3, 11]);
        let right = tree.split_categorical(
            0, 0, 0, &bitset_inner, &bitset_real, -1.0, 1.0, 3, 3, 3.0, 3.0, 2.0,
            MissingType::NaN,
        );
        assert_eq!(right, 1);
        assert_eq!(tree.predict_leaf_index(&[3.0]), 0);
        assert_eq!(tree.predict_leaf_index(&[11.0]), 0);
        assert_eq!(tree.predict_leaf_index(&[7.0]), 1);
        assert_eq!(tree.predict_leaf_index(&[f64::NAN]), 1);
    }

    #[test]
    fn test_apply_shrinkage() {
        let mut tree = Tree::new(4);
        tree.split(
            0, 0, 0, 0, 1.5, -1.0, 1.0, 4, 4, 4.0, 4.0, 8.0, MissingType::None, true,
        );
        tree.apply_shrinkage(0.1);
        assert!((tree.predict(&[1.0]) + 0.1).abs() < 1e-12);
        assert!((tree.shrinkage() - 0.1).abs() < 1e-12);
    }
}
