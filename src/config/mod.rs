//! Configuration for the leafwise tree learner.
//!
//! [`Config`] is an immutable snapshot of every knob the learner reads. It is
//! validated eagerly; a learner never sees an inconsistent configuration.
//! `SerialTreeLearner::reset_config` installs a fresh snapshot between trees.

use crate::core::constants::*;
use crate::core::error::{LeafwiseError, Result};
use crate::core::types::DataSize;
use serde::{Deserialize, Serialize};

/// Training configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Tree structure
    /// Maximum number of leaves per tree (at least 2)
    pub num_leaves: usize,
    /// Maximum tree depth; non-positive means unbounded
    pub max_depth: i32,
    /// Minimum number of examples required in each leaf
    pub min_data_in_leaf: DataSize,
    /// Minimum hessian mass required in each leaf
    pub min_sum_hessian_in_leaf: f64,

    // Regularization
    /// L1 regularization on leaf outputs
    pub lambda_l1: f64,
    /// L2 regularization on leaf outputs
    pub lambda_l2: f64,
    /// Cap on the magnitude of leaf outputs; non-positive disables clipping
    pub max_delta_step: f64,
    /// Minimum gain required to accept a split
    pub min_split_gain: f64,

    // Feature sampling
    /// Fraction of features sampled once per tree
    pub feature_fraction: f64,
    /// Fraction of features sampled once per candidate node
    pub feature_fraction_bynode: f64,
    /// Seed of the feature-sampling random generator
    pub feature_fraction_seed: u64,

    // Histogram construction
    /// Maximum number of bins per feature when building the dataset
    pub max_bin: usize,
    /// Histogram cache budget in MiB; non-positive means unbounded
    pub histogram_pool_size: f64,
    /// Force the column-wise histogram kernel
    pub force_col_wise: bool,
    /// Force the row-wise histogram kernel
    pub force_row_wise: bool,

    // Constraints
    /// Per-feature monotone direction (-1, 0, +1), indexed by real feature
    pub monotone_constraints: Option<Vec<i8>>,

    // Categorical splits
    /// Cap on the number of categories collected on one side of a split
    pub max_cat_threshold: usize,
    /// Bin count at or below which categorical search is one-vs-rest
    pub max_cat_to_onehot: usize,
    /// Smoothing term for the categorical bin ordering statistic
    pub cat_smooth: f64,
    /// Extra L2 regularization applied to categorical splits
    pub cat_l2: f64,

    // Refit
    /// Blend factor between old and refitted leaf outputs
    pub refit_decay_rate: f64,

    // Cost-effective gradient boosting
    /// Global multiplier on all cost penalties
    pub cegb_tradeoff: f64,
    /// Penalty charged per split, proportional to the leaf size
    pub cegb_penalty_split: f64,
    /// Per-feature penalty charged the first time a feature is used in a tree
    pub cegb_penalty_feature_coupled: Option<Vec<f64>>,
    /// Per-feature penalty charged per example not yet evaluated on a feature
    pub cegb_penalty_feature_lazy: Option<Vec<f64>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_leaves: DEFAULT_NUM_LEAVES,
            max_depth: DEFAULT_MAX_DEPTH,
            min_data_in_leaf: DEFAULT_MIN_DATA_IN_LEAF,
            min_sum_hessian_in_leaf: DEFAULT_MIN_SUM_HESSIAN_IN_LEAF,
            lambda_l1: 0.0,
            lambda_l2: 0.0,
            max_delta_step: 0.0,
            min_split_gain: 0.0,
            feature_fraction: 1.0,
            feature_fraction_bynode: 1.0,
            feature_fraction_seed: 2,
            max_bin: DEFAULT_MAX_BIN,
            histogram_pool_size: DEFAULT_HISTOGRAM_POOL_SIZE,
            force_col_wise: false,
            force_row_wise: false,
            monotone_constraints: None,
            max_cat_threshold: DEFAULT_MAX_CAT_THRESHOLD,
            max_cat_to_onehot: DEFAULT_MAX_CAT_TO_ONEHOT,
            cat_smooth: DEFAULT_CAT_SMOOTH,
            cat_l2: DEFAULT_CAT_L2,
            refit_decay_rate: 0.9,
            cegb_tradeoff: 1.0,
            cegb_penalty_split: 0.0,
            cegb_penalty_feature_coupled: None,
            cegb_penalty_feature_lazy: None,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Config::default()
    }

    /// Validate the configuration.
    ///
    /// Contradictory or out-of-range settings are configuration errors and
    /// are reported before any training starts.
    pub fn validate(&self) -> Result<()> {
        if self.num_leaves < 2 {
            return Err(LeafwiseError::invalid_parameter(
                "num_leaves",
                self.num_leaves.to_string(),
                "must be at least 2",
            ));
        }
        if !(self.feature_fraction > 0.0 && self.feature_fraction <= 1.0) {
            return Err(LeafwiseError::invalid_parameter(
                "feature_fraction",
                self.feature_fraction.to_string(),
                "must be in (0, 1]",
            ));
        }
        if !(self.feature_fraction_bynode > 0.0 && self.feature_fraction_bynode <= 1.0) {
            return Err(LeafwiseError::invalid_parameter(
                "feature_fraction_bynode",
                self.feature_fraction_bynode.to_string(),
                "must be in (0, 1]",
            ));
        }
        if self.force_col_wise && self.force_row_wise {
            return Err(LeafwiseError::config(
                "force_col_wise and force_row_wise cannot both be set",
            ));
        }
        if self.min_data_in_leaf < 1 {
            return Err(LeafwiseError::invalid_parameter(
                "min_data_in_leaf",
                self.min_data_in_leaf.to_string(),
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.refit_decay_rate) {
            return Err(LeafwiseError::invalid_parameter(
                "refit_decay_rate",
                self.refit_decay_rate.to_string(),
                "must be in [0, 1]",
            ));
        }
        if self.max_bin < 2 {
            return Err(LeafwiseError::invalid_parameter(
                "max_bin",
                self.max_bin.to_string(),
                "must be at least 2",
            ));
        }
        if let Some(ref constraints) = self.monotone_constraints {
            if constraints.iter().any(|&c| !(-1..=1).contains(&c)) {
                return Err(LeafwiseError::config(
                    "monotone_constraints entries must be -1, 0, or 1",
                ));
            }
        }
        Ok(())
    }

    /// Whether any cost-effective gradient boosting penalty is active.
    pub fn cegb_enabled(&self) -> bool {
        self.cegb_penalty_split > 0.0
            || self
                .cegb_penalty_feature_coupled
                .as_ref()
                .map_or(false, |v| v.iter().any(|&p| p > 0.0))
            || self
                .cegb_penalty_feature_lazy
                .as_ref()
                .map_or(false, |v| v.iter().any(|&p| p > 0.0))
    }

    /// Monotone direction of a real feature index, 0 when unconstrained.
    pub fn monotone_type(&self, real_feature: usize) -> i8 {
        self.monotone_constraints
            .as_ref()
            .and_then(|v| v.get(real_feature))
            .copied()
            .unwrap_or(0)
    }
}

/// Builder for [`Config`] with a fluent interface.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder seeded with defaults.
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Set the maximum number of leaves.
    pub fn num_leaves(mut self, num_leaves: usize) -> Self {
        self.config.num_leaves = num_leaves;
        self
    }

    /// Set the maximum depth.
    pub fn max_depth(mut self, max_depth: i32) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    /// Set the minimum number of examples per leaf.
    pub fn min_data_in_leaf(mut self, min_data_in_leaf: DataSize) -> Self {
        self.config.min_data_in_leaf = min_data_in_leaf;
        self
    }

    /// Set the minimum hessian mass per leaf.
    pub fn min_sum_hessian_in_leaf(mut self, min_sum_hessian_in_leaf: f64) -> Self {
        self.config.min_sum_hessian_in_leaf = min_sum_hessian_in_leaf;
        self
    }

    /// Set the L1 regularization strength.
    pub fn lambda_l1(mut self, lambda_l1: f64) -> Self {
        self.config.lambda_l1 = lambda_l1;
        self
    }

    /// Set the L2 regularization strength.
    pub fn lambda_l2(mut self, lambda_l2: f64) -> Self {
        self.config.lambda_l2 = lambda_l2;
        self
    }

    /// Set the leaf output magnitude cap.
    pub fn max_delta_step(mut self, max_delta_step: f64) -> Self {
        self.config.max_delta_step = max_delta_step;
        self
    }

    /// Set the minimum split gain.
    pub fn min_split_gain(mut self, min_split_gain: f64) -> Self {
        self.config.min_split_gain = min_split_gain;
        self
    }

    /// Set the per-tree feature fraction.
    pub fn feature_fraction(mut self, feature_fraction: f64) -> Self {
        self.config.feature_fraction = feature_fraction;
        self
    }

    /// Set the per-node feature fraction.
    pub fn feature_fraction_bynode(mut self, feature_fraction_bynode: f64) -> Self {
        self.config.feature_fraction_bynode = feature_fraction_bynode;
        self
    }

    /// Set the feature-sampling seed.
    pub fn feature_fraction_seed(mut self, seed: u64) -> Self {
        self.config.feature_fraction_seed = seed;
        self
    }

    /// Set the maximum bin count used when building datasets.
    pub fn max_bin(mut self, max_bin: usize) -> Self {
        self.config.max_bin = max_bin;
        self
    }

    /// Set the histogram pool budget in MiB.
    pub fn histogram_pool_size(mut self, histogram_pool_size: f64) -> Self {
        self.config.histogram_pool_size = histogram_pool_size;
        self
    }

    /// Force the column-wise histogram kernel.
    pub fn force_col_wise(mut self, force: bool) -> Self {
        self.config.force_col_wise = force;
        self
    }

    /// Force the row-wise histogram kernel.
    pub fn force_row_wise(mut self, force: bool) -> Self {
        self.config.force_row_wise = force;
        self
    }

    /// Set per-feature monotone constraints.
    pub fn monotone_constraints(mut self, constraints: Vec<i8>) -> Self {
        self.config.monotone_constraints = Some(constraints);
        self
    }

    /// Set the refit blend factor.
    pub fn refit_decay_rate(mut self, refit_decay_rate: f64) -> Self {
        self.config.refit_decay_rate = refit_decay_rate;
        self
    }

    /// Set the cost penalty multiplier.
    pub fn cegb_tradeoff(mut self, cegb_tradeoff: f64) -> Self {
        self.config.cegb_tradeoff = cegb_tradeoff;
        self
    }

    /// Set the per-split cost penalty.
    pub fn cegb_penalty_split(mut self, cegb_penalty_split: f64) -> Self {
        self.config.cegb_penalty_split = cegb_penalty_split;
        self
    }

    /// Set per-feature one-time cost penalties.
    pub fn cegb_penalty_feature_coupled(mut self, penalties: Vec<f64>) -> Self {
        self.config.cegb_penalty_feature_coupled = Some(penalties);
        self
    }

    /// Set per-feature per-example cost penalties.
    pub fn cegb_penalty_feature_lazy(mut self, penalties: Vec<f64>) -> Self {
        self.config.cegb_penalty_feature_lazy = Some(penalties);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
