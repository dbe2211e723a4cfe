//! Cost-effective gradient boosting: cost-aware gain adjustment.
//!
//! When enabled, every candidate split's gain is reduced by the cost of
//! taking it: a per-split cost proportional to the leaf size, a one-time
//! per-feature cost charged when a feature first appears in the tree, and a
//! lazy per-example cost charged for examples that have not been evaluated
//! on the feature yet.

use crate::config::Config;
use crate::core::types::DataSize;
use crate::treelearner::split_info::SplitInfo;

/// Cost model state for one learner.
#[derive(Debug)]
pub struct CostEffectiveGradientBoosting {
    tradeoff: f64,
    penalty_split: f64,
    penalty_feature_coupled: Vec<f64>,
    penalty_feature_lazy: Vec<f64>,
    /// Whether an inner feature has been used by any split yet
    is_feature_used_in_split: Vec<bool>,
    /// Example-by-feature usage flags, only allocated when lazy penalties
    /// are configured
    feature_used_in_data: Vec<bool>,
    num_data: usize,
    num_features: usize,
}

impl CostEffectiveGradientBoosting {
    /// Whether the configuration activates any cost penalty.
    pub fn is_enable(config: &Config) -> bool {
        config.cegb_enabled()
    }

    /// Create the cost model for a learner.
    ///
    /// # Arguments
    /// * `num_data` - Example count
    /// * `num_features` - Inner feature count
    /// * `num_total_features` - Raw column count, the index space of the
    ///   per-feature penalty vectors
    pub fn new(
        config: &Config,
        num_data: DataSize,
        num_features: usize,
        num_total_features: usize,
    ) -> Self {
        let mut penalty_feature_coupled = config
            .cegb_penalty_feature_coupled
            .clone()
            .unwrap_or_default();
        penalty_feature_coupled.resize(num_total_features, 0.0);
        let mut penalty_feature_lazy = config.cegb_penalty_feature_lazy.clone().unwrap_or_default();
        let has_lazy = penalty_feature_lazy.iter().any(|&p| p > 0.0);
        penalty_feature_lazy.resize(num_total_features, 0.0);
        CostEffectiveGradientBoosting {
            tradeoff: config.cegb_tradeoff,
            penalty_split: config.cegb_penalty_split,
            penalty_feature_coupled,
            penalty_feature_lazy,
            is_feature_used_in_split: vec![false; num_features],
            feature_used_in_data: if has_lazy {
                vec![false; num_data as usize * num_features]
            } else {
                Vec::new()
            },
            num_data: num_data as usize,
            num_features,
        }
    }

    /// Reset the usage state.
    pub fn init(&mut self) {
        self.is_feature_used_in_split.fill(false);
        self.feature_used_in_data.fill(false);
    }

    /// Cost charged against a candidate split's gain.
    ///
    /// # Arguments
    /// * `inner_feature` / `real_feature` - The candidate's feature
    /// * `num_data_in_leaf` - Examples in the leaf being split
    /// * `leaf_indices` - The leaf's example indices, for lazy costs
    pub fn delta_gain(
        &self,
        inner_feature: usize,
        real_feature: usize,
        num_data_in_leaf: DataSize,
        leaf_indices: &[DataSize],
        _split_info: &SplitInfo,
    ) -> f64 {
        let mut delta = self.penalty_split * num_data_in_leaf as f64;
        if !self.is_feature_used_in_split[inner_feature] {
            delta += self.penalty_feature_coupled[real_feature];
        }
        let lazy_penalty = self.penalty_feature_lazy[real_feature];
        if lazy_penalty > 0.0 && !self.feature_used_in_data.is_empty() {
            let mut uncharged = 0usize;
            for &idx in leaf_indices {
                if !self.feature_used_in_data[idx as usize * self.num_features + inner_feature] {
                    uncharged += 1;
                }
            }
            delta += lazy_penalty * uncharged as f64;
        }
        self.tradeoff * delta
    }

    /// Record that a split on `inner_feature` was applied to a leaf holding
    /// `leaf_indices`, and refund the coupled penalty from the stored best
    /// splits of the other leaves that chose the same feature.
    pub fn update_leaf_best_splits(
        &mut self,
        num_leaves: usize,
        best_leaf: usize,
        best_split_info: &SplitInfo,
        inner_feature: usize,
        leaf_indices: &[DataSize],
        best_split_per_leaf: &mut [SplitInfo],
    ) {
        if !self.feature_used_in_data.is_empty() {
            for &idx in leaf_indices {
                self.feature_used_in_data[idx as usize * self.num_features + inner_feature] = true;
            }
        }
        if !self.is_feature_used_in_split[inner_feature] {
            self.is_feature_used_in_split[inner_feature] = true;
            let refund = self.tradeoff
                * self.penalty_feature_coupled[best_split_info.feature as usize];
            if refund > 0.0 {
                for (leaf, split) in best_split_per_leaf.iter_mut().enumerate().take(num_leaves) {
                    if leaf == best_leaf {
                        continue;
                    }
                    if split.feature == best_split_info.feature {
                        split.gain += refund;
                    }
                }
            }
        }
    }
}
