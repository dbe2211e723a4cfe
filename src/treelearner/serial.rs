//! The serial leaf-wise tree learner.
//!
//! One `train` call grows a single tree: `before_train` resets the per-tree
//! state, an optional forced-split template is applied breadth-first, then
//! up to `num_leaves - 1` free iterations each prepare histograms for the
//! two leaves created last, score every candidate feature, pick the leaf
//! with the globally best gain, and commit the split. Histograms for the
//! smaller child of a split are always built from scratch; the larger child
//! reuses the parent's buffers and is completed by subtraction whenever the
//! parent's histograms were still resident.

use crate::config::Config;
use crate::core::constants::K_MIN_SCORE;
use crate::core::error::{LeafwiseError, Result};
use crate::core::network::{Network, SingleMachine};
use crate::core::objective::ObjectiveFunction;
use crate::core::types::{DataSize, Score};
use crate::core::utils::construct_bitset;
use crate::dataset::dataset::{Dataset, HistEntry, SplitThreshold, TrainShareState};
use crate::dataset::partition::DataPartition;
use crate::tree::tree::{category_bitset, Tree};
use crate::treelearner::cegb::CostEffectiveGradientBoosting;
use crate::treelearner::col_sampler::ColSampler;
use crate::treelearner::constraints::{ConstraintEntry, LeafConstraints};
use crate::treelearner::feature_histogram::{
    calculate_splitted_leaf_output, find_best_threshold, gather_info_for_threshold,
    subtract_histogram, FeatureMeta, SplitParams,
};
use crate::treelearner::forced_splits::ForcedSplit;
use crate::treelearner::histogram_pool::HistogramPool;
use crate::treelearner::leaf_splits::LeafSplits;
use crate::treelearner::split_info::{arg_max, SplitInfo};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{HashMap, VecDeque};

/// Serial leaf-wise tree learner.
pub struct SerialTreeLearner<'a> {
    config: Config,
    params: SplitParams,
    train_data: &'a Dataset,
    num_data: DataSize,
    num_features: usize,
    is_constant_hessian: bool,
    feature_metas: Vec<FeatureMeta>,
    share_state: TrainShareState,
    histogram_pool: HistogramPool,
    data_partition: DataPartition,
    smaller_leaf_splits: LeafSplits,
    larger_leaf_splits: LeafSplits,
    best_split_per_leaf: Vec<SplitInfo>,
    constraints: LeafConstraints,
    col_sampler: ColSampler,
    cegb: Option<CostEffectiveGradientBoosting>,
    network: Box<dyn Network>,
    // Histogram handles of the current iteration.
    smaller_slot: Option<usize>,
    larger_slot: Option<usize>,
    parent_retained: bool,
}

impl<'a> SerialTreeLearner<'a> {
    /// Create a learner bound to a dataset.
    ///
    /// # Arguments
    /// * `config` - Validated configuration snapshot
    /// * `train_data` - Pre-binned training data, borrowed for the learner's
    ///   lifetime
    /// * `is_constant_hessian` - All hessians are equal; the histogram
    ///   kernels exploit this
    pub fn new(config: Config, train_data: &'a Dataset, is_constant_hessian: bool) -> Result<Self> {
        config.validate()?;
        let num_data = train_data.num_data();
        let num_features = train_data.num_features();

        let feature_metas = Self::build_feature_metas(&config, train_data);
        let share_state =
            train_data.test_multi_threading_method(config.force_col_wise, config.force_row_wise);

        let mut histogram_pool = HistogramPool::new();
        let cache_size = Self::max_cache_size(&config, train_data);
        histogram_pool.dynamic_change_size(
            &train_data.histogram_layout(),
            num_features,
            cache_size,
            config.num_leaves,
        );

        let cegb = if CostEffectiveGradientBoosting::is_enable(&config) {
            let mut cegb = CostEffectiveGradientBoosting::new(
                &config,
                num_data,
                num_features,
                train_data.num_total_features(),
            );
            cegb.init();
            Some(cegb)
        } else {
            None
        };

        info!(
            "Number of data points in the train set: {}, number of used features: {}",
            num_data, num_features
        );

        Ok(SerialTreeLearner {
            params: SplitParams::from_config(&config),
            col_sampler: ColSampler::new(&config, train_data),
            data_partition: DataPartition::new(num_data, config.num_leaves),
            smaller_leaf_splits: LeafSplits::new(num_data),
            larger_leaf_splits: LeafSplits::new(num_data),
            best_split_per_leaf: vec![SplitInfo::new(); config.num_leaves],
            constraints: LeafConstraints::new(config.num_leaves),
            histogram_pool,
            share_state,
            feature_metas,
            cegb,
            network: Box::new(SingleMachine),
            train_data,
            num_data,
            num_features,
            is_constant_hessian,
            smaller_slot: None,
            larger_slot: None,
            parent_retained: false,
            config,
        })
    }

    fn build_feature_metas(config: &Config, train_data: &Dataset) -> Vec<FeatureMeta> {
        (0..train_data.num_features())
            .map(|inner| {
                let mapper = train_data.feature_bin_mapper(inner);
                FeatureMeta {
                    num_bin: mapper.num_bin(),
                    bin_type: mapper.bin_type(),
                    missing_type: mapper.missing_type(),
                    monotone_type: config.monotone_type(train_data.real_feature_index(inner)),
                }
            })
            .collect()
    }

    /// Histogram cache capacity: the memory budget divided by the size of
    /// one leaf's histograms, at least 2 and at most `num_leaves`.
    fn max_cache_size(config: &Config, train_data: &Dataset) -> usize {
        let cache = if config.histogram_pool_size <= 0.0 {
            config.num_leaves
        } else {
            let entry_bytes = std::mem::size_of::<HistEntry>();
            let total_bytes: usize = (0..train_data.num_features())
                .map(|f| (train_data.feature_num_bin(f) + 2) * entry_bytes)
                .sum();
            (config.histogram_pool_size * 1024.0 * 1024.0 / total_bytes as f64) as usize
        };
        cache.max(2).min(config.num_leaves)
    }

    /// Replace the network implementation used for distributed reductions.
    pub fn set_network(&mut self, network: Box<dyn Network>) {
        self.network = network;
    }

    /// Rebind the learner to fresh training data with the same schema.
    pub fn reset_training_data(&mut self, train_data: &'a Dataset) -> Result<()> {
        if train_data.num_features() != self.num_features {
            return Err(LeafwiseError::dimension_mismatch(
                format!("{} features", self.num_features),
                format!("{} features", train_data.num_features()),
            ));
        }
        self.train_data = train_data;
        self.num_data = train_data.num_data();
        self.smaller_leaf_splits.reset_num_data(self.num_data);
        self.larger_leaf_splits.reset_num_data(self.num_data);
        self.data_partition.reset_num_data(self.num_data);
        self.feature_metas = Self::build_feature_metas(&self.config, train_data);
        let is_col_wise = self.share_state.is_col_wise;
        self.share_state = train_data
            .test_multi_threading_method(is_col_wise, !is_col_wise);
        let cache_size = Self::max_cache_size(&self.config, train_data);
        self.histogram_pool.dynamic_change_size(
            &train_data.histogram_layout(),
            self.num_features,
            cache_size,
            self.config.num_leaves,
        );
        self.col_sampler = ColSampler::new(&self.config, train_data);
        if let Some(cegb) = self.cegb.as_mut() {
            cegb.init();
        }
        Ok(())
    }

    /// Install a new configuration snapshot between trees.
    pub fn reset_config(&mut self, config: Config) -> Result<()> {
        config.validate()?;
        if config.num_leaves != self.config.num_leaves {
            self.best_split_per_leaf
                .resize(config.num_leaves, SplitInfo::new());
            self.data_partition.reset_leaves(config.num_leaves);
            self.constraints.resize(config.num_leaves);
        }
        let cache_size = Self::max_cache_size(&config, self.train_data);
        self.histogram_pool.dynamic_change_size(
            &self.train_data.histogram_layout(),
            self.num_features,
            cache_size,
            config.num_leaves,
        );
        self.params = SplitParams::from_config(&config);
        self.col_sampler.reset_config(&config);
        self.feature_metas = Self::build_feature_metas(&config, self.train_data);
        self.cegb = if CostEffectiveGradientBoosting::is_enable(&config) {
            let mut cegb = CostEffectiveGradientBoosting::new(
                &config,
                self.num_data,
                self.num_features,
                self.train_data.num_total_features(),
            );
            cegb.init();
            Some(cegb)
        } else {
            None
        };
        self.config = config;
        Ok(())
    }

    /// Grow one tree.
    ///
    /// # Arguments
    /// * `gradients`, `hessians` - Per-example statistics, one entry per
    ///   training example
    /// * `forced_split` - Optional split template applied before free growth
    pub fn train(
        &mut self,
        gradients: &[Score],
        hessians: &[Score],
        forced_split: Option<&ForcedSplit>,
    ) -> Result<Tree> {
        if gradients.len() != self.num_data as usize || hessians.len() != self.num_data as usize {
            return Err(LeafwiseError::dimension_mismatch(
                format!("{} gradient entries", self.num_data),
                format!("{}/{}", gradients.len(), hessians.len()),
            ));
        }
        self.before_train(gradients, hessians);

        let mut tree = Tree::new(self.config.num_leaves);
        // A tree returned without splits is still a valid one-leaf model.
        let root_output = calculate_splitted_leaf_output(
            self.smaller_leaf_splits.sum_gradients(),
            self.smaller_leaf_splits.sum_hessians(),
            &self.params,
        );
        tree.set_leaf_output(0, root_output * tree.shrinkage());

        let mut left_leaf: i32 = 0;
        // Only the root can be split the first time around.
        let mut right_leaf: i32 = -1;
        let mut cur_depth: i32 = 1;
        let mut aborted_last_force_split = false;
        let init_splits = match forced_split {
            Some(template) => self.force_splits(
                &mut tree,
                template,
                gradients,
                hessians,
                &mut left_leaf,
                &mut right_leaf,
                &mut cur_depth,
                &mut aborted_last_force_split,
            )?,
            None => 0,
        };

        for _split in init_splits..self.config.num_leaves.saturating_sub(1) {
            if !aborted_last_force_split {
                if self.before_find_best_split(&tree, left_leaf, right_leaf) {
                    self.find_best_splits(gradients, hessians);
                }
            } else {
                aborted_last_force_split = false;
            }

            let best_leaf = arg_max(&self.best_split_per_leaf[..tree.num_leaves()]);
            let best_gain = self.best_split_per_leaf[best_leaf].gain;
            if best_gain <= 0.0 {
                warn!(
                    "No further splits with positive gain, best gain: {}",
                    best_gain
                );
                break;
            }
            self.split(&mut tree, best_leaf, &mut left_leaf, &mut right_leaf)?;
            cur_depth = cur_depth.max(tree.leaf_depth(left_leaf as usize));
        }
        debug!(
            "Trained a tree with leaves = {} and max_depth = {}",
            tree.num_leaves(),
            cur_depth
        );
        Ok(tree)
    }

    /// Per-tree reset of all growth state.
    fn before_train(&mut self, gradients: &[Score], hessians: &[Score]) {
        self.histogram_pool.reset_map();
        self.col_sampler.reset_by_tree();
        self.train_data
            .init_train(self.col_sampler.is_feature_used_bytree(), &mut self.share_state);
        self.data_partition.init();
        self.constraints.reset();
        for split in &mut self.best_split_per_leaf {
            split.reset();
        }
        self.smaller_leaf_splits.init_from_gradients(gradients, hessians);
        self.larger_leaf_splits.init_empty();
        self.smaller_slot = None;
        self.larger_slot = None;
        self.parent_retained = false;
    }

    /// Gate the two fresh leaves and assign their histogram buffers.
    ///
    /// Returns false when neither leaf can be split (depth or minimum-data
    /// gating); both leaves' stored best splits are pinned to `-inf` so the
    /// leaves are never selected again.
    fn before_find_best_split(&mut self, tree: &Tree, left_leaf: i32, right_leaf: i32) -> bool {
        if self.config.max_depth > 0 && tree.leaf_depth(left_leaf as usize) >= self.config.max_depth
        {
            // The right leaf sits on the same level as the left one.
            self.best_split_per_leaf[left_leaf as usize].gain = K_MIN_SCORE;
            if right_leaf >= 0 {
                self.best_split_per_leaf[right_leaf as usize].gain = K_MIN_SCORE;
            }
            return false;
        }
        let left_count = self.data_partition.leaf_count(left_leaf as usize);
        let right_count = if right_leaf >= 0 {
            self.data_partition.leaf_count(right_leaf as usize)
        } else {
            0
        };
        let gate = self.config.min_data_in_leaf * 2;
        if left_count < gate && right_count < gate {
            self.best_split_per_leaf[left_leaf as usize].gain = K_MIN_SCORE;
            if right_leaf >= 0 {
                self.best_split_per_leaf[right_leaf as usize].gain = K_MIN_SCORE;
            }
            return false;
        }

        self.parent_retained = false;
        if right_leaf < 0 {
            let (slot, _) = self.histogram_pool.get(left_leaf as usize);
            self.smaller_slot = Some(slot);
            self.larger_slot = None;
        } else if left_count < right_count {
            // The parent's histograms, keyed by the left leaf, become the
            // larger (right) child's.
            let (slot, found) = self.histogram_pool.get(left_leaf as usize);
            self.larger_slot = Some(slot);
            self.parent_retained = found;
            self.histogram_pool.move_to(left_leaf as usize, right_leaf as usize);
            let (smaller, _) = self.histogram_pool.get(left_leaf as usize);
            self.smaller_slot = Some(smaller);
        } else {
            let (slot, found) = self.histogram_pool.get(left_leaf as usize);
            self.larger_slot = Some(slot);
            self.parent_retained = found;
            let (smaller, _) = self.histogram_pool.get(right_leaf as usize);
            self.smaller_slot = Some(smaller);
        }
        true
    }

    /// Build histograms for the two fresh leaves and score every feature.
    fn find_best_splits(&mut self, gradients: &[Score], hessians: &[Score]) {
        let smaller_slot = self.smaller_slot.expect("histograms assigned");
        // Features to evaluate: the tree-level sample, minus features the
        // parent already found unsplittable.
        let mut used = Vec::with_capacity(self.num_features);
        let mut inherited_dead = Vec::new();
        {
            let tree_mask = self.col_sampler.is_feature_used_bytree();
            let parent_slot = if self.parent_retained { self.larger_slot } else { None };
            for f in 0..self.num_features {
                if tree_mask[f] == 0 {
                    continue;
                }
                if let Some(slot) = parent_slot {
                    if !self.histogram_pool.slot(slot).is_splittable(f) {
                        inherited_dead.push(f);
                        continue;
                    }
                }
                used.push(f);
            }
        }
        for f in inherited_dead {
            self.histogram_pool.slot_mut(smaller_slot).set_unsplittable(f);
        }
        let use_subtract = self.parent_retained;
        self.construct_histograms(&used, use_subtract, gradients, hessians);
        self.find_best_splits_from_histograms(&used, use_subtract);
    }

    /// Fill the smaller leaf's histograms, and the larger leaf's as well
    /// when the subtract trick is not available.
    fn construct_histograms(
        &mut self,
        used: &[usize],
        use_subtract: bool,
        gradients: &[Score],
        hessians: &[Score],
    ) {
        let train_data = self.train_data;
        let mask: Vec<i8> = {
            let mut mask = vec![0i8; self.num_features];
            for &f in used {
                mask[f] = 1;
            }
            mask
        };

        let smaller_leaf = self.smaller_leaf_splits.leaf_index() as usize;
        let smaller_indices = self.data_partition.leaf_indices(smaller_leaf);
        let smaller_indices = if smaller_indices.len() == self.num_data as usize {
            None
        } else {
            Some(smaller_indices)
        };
        let slot = self.smaller_slot.expect("histograms assigned");
        train_data.construct_histograms(
            &mask,
            smaller_indices,
            gradients,
            hessians,
            self.is_constant_hessian,
            &mut self.share_state,
            self.histogram_pool.slot_mut(slot).entries_mut(),
        );

        if self.larger_leaf_splits.leaf_index() >= 0 && !use_subtract {
            let larger_leaf = self.larger_leaf_splits.leaf_index() as usize;
            let larger_indices = Some(self.data_partition.leaf_indices(larger_leaf));
            let slot = self.larger_slot.expect("larger histograms assigned");
            train_data.construct_histograms(
                &mask,
                larger_indices,
                gradients,
                hessians,
                self.is_constant_hessian,
                &mut self.share_state,
                self.histogram_pool.slot_mut(slot).entries_mut(),
            );
        }
    }

    /// Per-feature search over the constructed histograms, then a
    /// deterministic reduction to one best split per leaf.
    fn find_best_splits_from_histograms(&mut self, used: &[usize], use_subtract: bool) {
        let smaller_leaf = self.smaller_leaf_splits.leaf_index();
        let larger_leaf = self.larger_leaf_splits.leaf_index();

        // Node-level masks are drawn for both leaves even when only one is
        // active, so the sampler state advances identically either way.
        let (smaller_node_mask, larger_node_mask) = if self.col_sampler.samples_by_node() {
            (self.col_sampler.get_by_node(), self.col_sampler.get_by_node())
        } else {
            (vec![1i8; self.num_features], vec![1i8; self.num_features])
        };

        let train_data = self.train_data;
        let metas = &self.feature_metas;
        let params = &self.params;
        let cegb = self.cegb.as_ref();
        let constraint_smaller = self.constraints.get(smaller_leaf);
        let constraint_larger = self.constraints.get(larger_leaf);
        let smaller_sum_g = self.smaller_leaf_splits.sum_gradients();
        let smaller_sum_h = self.smaller_leaf_splits.sum_hessians();
        let smaller_count = self.smaller_leaf_splits.num_data_in_leaf();
        let larger_sum_g = self.larger_leaf_splits.sum_gradients();
        let larger_sum_h = self.larger_leaf_splits.sum_hessians();
        let larger_count = self.larger_leaf_splits.num_data_in_leaf();
        let smaller_indices = self.data_partition.leaf_indices(smaller_leaf as usize);
        let larger_indices = if larger_leaf >= 0 {
            self.data_partition.leaf_indices(larger_leaf as usize)
        } else {
            &[]
        };

        let smaller_slot = self.smaller_slot.expect("histograms assigned");
        let evaluate = |feature: usize,
                        hist: &[HistEntry],
                        node_allows: bool,
                        sum_g: f64,
                        sum_h: f64,
                        count: DataSize,
                        constraint: ConstraintEntry,
                        indices: &[DataSize],
                        splittable_flag: &mut bool|
         -> Option<SplitInfo> {
            if !node_allows {
                return None;
            }
            let mut candidate = SplitInfo::new();
            let splittable = find_best_threshold(
                hist,
                &metas[feature],
                params,
                sum_g,
                sum_h,
                count,
                constraint,
                &mut candidate,
            );
            if !splittable {
                *splittable_flag = false;
            }
            candidate.feature = train_data.real_feature_index(feature) as i32;
            if let Some(cegb) = cegb {
                candidate.gain -= cegb.delta_gain(
                    feature,
                    candidate.feature as usize,
                    count,
                    indices,
                    &candidate,
                );
            }
            Some(candidate)
        };

        type FeatureResult = (usize, Option<SplitInfo>, Option<SplitInfo>);
        let results: Vec<FeatureResult> = if larger_leaf >= 0 {
            let larger_slot = self.larger_slot.expect("larger histograms assigned");
            let (smaller_arr, larger_arr) =
                self.histogram_pool.slot_pair_mut(smaller_slot, larger_slot);
            let smaller_views = smaller_arr.features_mut(used);
            let larger_views = larger_arr.features_mut(used);
            smaller_views
                .into_par_iter()
                .zip(larger_views.into_par_iter())
                .map(|(smaller_view, larger_view)| {
                    let f = smaller_view.feature;
                    train_data.fix_histogram(
                        f,
                        smaller_sum_g,
                        smaller_sum_h,
                        smaller_count,
                        smaller_view.entries,
                    );
                    let smaller_cand = evaluate(
                        f,
                        smaller_view.entries,
                        smaller_node_mask[f] != 0,
                        smaller_sum_g,
                        smaller_sum_h,
                        smaller_count,
                        constraint_smaller,
                        smaller_indices,
                        smaller_view.splittable,
                    );
                    if use_subtract {
                        subtract_histogram(larger_view.entries, smaller_view.entries);
                    } else {
                        train_data.fix_histogram(
                            f,
                            larger_sum_g,
                            larger_sum_h,
                            larger_count,
                            larger_view.entries,
                        );
                    }
                    let larger_cand = evaluate(
                        f,
                        larger_view.entries,
                        larger_node_mask[f] != 0,
                        larger_sum_g,
                        larger_sum_h,
                        larger_count,
                        constraint_larger,
                        larger_indices,
                        larger_view.splittable,
                    );
                    (f, smaller_cand, larger_cand)
                })
                .collect()
        } else {
            let smaller_arr = self.histogram_pool.slot_mut(smaller_slot);
            smaller_arr
                .features_mut(used)
                .into_par_iter()
                .map(|smaller_view| {
                    let f = smaller_view.feature;
                    train_data.fix_histogram(
                        f,
                        smaller_sum_g,
                        smaller_sum_h,
                        smaller_count,
                        smaller_view.entries,
                    );
                    let smaller_cand = evaluate(
                        f,
                        smaller_view.entries,
                        smaller_node_mask[f] != 0,
                        smaller_sum_g,
                        smaller_sum_h,
                        smaller_count,
                        constraint_smaller,
                        smaller_indices,
                        smaller_view.splittable,
                    );
                    (f, smaller_cand, None)
                })
                .collect()
        };

        // Sequential fold in feature order; ties keep the earlier feature.
        let mut smaller_best = SplitInfo::new();
        let mut larger_best = SplitInfo::new();
        for (_f, smaller_cand, larger_cand) in results {
            if let Some(candidate) = smaller_cand {
                if candidate.is_better_than(&smaller_best) {
                    smaller_best = candidate;
                }
            }
            if let Some(candidate) = larger_cand {
                if candidate.is_better_than(&larger_best) {
                    larger_best = candidate;
                }
            }
        }
        self.best_split_per_leaf[smaller_leaf as usize] = smaller_best;
        if larger_leaf >= 0 {
            self.best_split_per_leaf[larger_leaf as usize] = larger_best;
        }
    }

    /// Apply the stored best split of `best_leaf` to the tree, the data
    /// partition, the leaf statistics, and the constraints.
    fn split(
        &mut self,
        tree: &mut Tree,
        best_leaf: usize,
        left_leaf: &mut i32,
        right_leaf: &mut i32,
    ) -> Result<()> {
        let mut info = self.best_split_per_leaf[best_leaf].clone();
        let inner = self.train_data.inner_feature_index(info.feature as usize);
        if inner < 0 {
            return Err(LeafwiseError::training(format!(
                "best split uses unknown feature {}",
                info.feature
            )));
        }
        let inner = inner as usize;
        if let Some(cegb) = self.cegb.as_mut() {
            cegb.update_leaf_best_splits(
                tree.num_leaves(),
                best_leaf,
                &info,
                inner,
                self.data_partition.leaf_indices(best_leaf),
                &mut self.best_split_per_leaf,
            );
        }
        *left_leaf = best_leaf as i32;
        let next_leaf = tree.next_leaf_id();
        let is_numerical = self.train_data.is_numerical(inner);
        let missing_type = self.train_data.feature_bin_mapper(inner).missing_type();

        if is_numerical {
            let threshold_double = self.train_data.real_threshold(inner, info.threshold);
            self.data_partition.split(
                best_leaf,
                self.train_data,
                inner,
                &SplitThreshold::Numerical(info.threshold),
                info.default_left,
                next_leaf,
            );
            info.left_count = self.data_partition.leaf_count(best_leaf);
            info.right_count = self.data_partition.leaf_count(next_leaf);
            *right_leaf = tree.split(
                best_leaf,
                inner,
                info.feature as usize,
                info.threshold,
                threshold_double,
                info.left_output,
                info.right_output,
                info.left_count,
                info.right_count,
                info.left_sum_hessian,
                info.right_sum_hessian,
                info.gain as f32,
                missing_type,
                info.default_left,
            ) as i32;
        } else {
            let bitset_inner = construct_bitset(&info.cat_threshold[..info.num_cat_threshold]);
            let categories: Vec<i32> = info.cat_threshold[..info.num_cat_threshold]
                .iter()
                .map(|&bin| self.train_data.real_threshold(inner, bin) as i32)
                .collect();
            let bitset_real = category_bitset(&categories);
            self.data_partition.split(
                best_leaf,
                self.train_data,
                inner,
                &SplitThreshold::Categorical(&bitset_inner),
                info.default_left,
                next_leaf,
            );
            info.left_count = self.data_partition.leaf_count(best_leaf);
            info.right_count = self.data_partition.leaf_count(next_leaf);
            *right_leaf = tree.split_categorical(
                best_leaf,
                inner,
                info.feature as usize,
                &bitset_inner,
                &bitset_real,
                info.left_output,
                info.right_output,
                info.left_count,
                info.right_count,
                info.left_sum_hessian,
                info.right_sum_hessian,
                info.gain as f32,
                missing_type,
            ) as i32;
        }
        debug_assert_eq!(*right_leaf as usize, next_leaf);

        // Name the children for the next iteration: the smaller child gets
        // a fresh histogram, the larger one reuses the parent's.
        if info.left_count < info.right_count {
            debug_assert!(info.left_count > 0);
            self.smaller_leaf_splits.init_with_sums(
                *left_leaf,
                info.left_count,
                info.left_sum_gradient,
                info.left_sum_hessian,
            );
            self.larger_leaf_splits.init_with_sums(
                *right_leaf,
                info.right_count,
                info.right_sum_gradient,
                info.right_sum_hessian,
            );
        } else {
            debug_assert!(info.right_count > 0);
            self.smaller_leaf_splits.init_with_sums(
                *right_leaf,
                info.right_count,
                info.right_sum_gradient,
                info.right_sum_hessian,
            );
            self.larger_leaf_splits.init_with_sums(
                *left_leaf,
                info.left_count,
                info.left_sum_gradient,
                info.left_sum_hessian,
            );
        }
        self.constraints.update(
            is_numerical,
            best_leaf,
            next_leaf,
            info.monotone_type,
            info.right_output,
            info.left_output,
        );
        Ok(())
    }

    /// Score a template node's threshold on a leaf using the histograms
    /// prepared for the current iteration.
    fn gather_forced(
        &self,
        node: &ForcedSplit,
        on_smaller: bool,
    ) -> Result<Option<SplitInfo>> {
        let inner = self.train_data.inner_feature_index(node.feature);
        if inner < 0 {
            return Err(LeafwiseError::training(format!(
                "forced split uses unknown feature {}",
                node.feature
            )));
        }
        let inner = inner as usize;
        let (slot, splits) = if on_smaller {
            (self.smaller_slot, &self.smaller_leaf_splits)
        } else {
            (self.larger_slot, &self.larger_leaf_splits)
        };
        let Some(slot) = slot else {
            return Ok(None);
        };
        if splits.leaf_index() < 0 {
            return Ok(None);
        }
        let threshold = self.train_data.bin_threshold(inner, node.threshold);
        let mut info = SplitInfo::new();
        gather_info_for_threshold(
            self.histogram_pool.slot(slot).feature_region(inner),
            &self.feature_metas[inner],
            &self.params,
            splits.sum_gradients(),
            splits.sum_hessians(),
            splits.num_data_in_leaf(),
            threshold,
            self.constraints.get(splits.leaf_index()),
            &mut info,
        );
        info.feature = node.feature as i32;
        Ok(Some(info))
    }

    /// Apply a forced-split template breadth-first.
    ///
    /// Returns the number of splits applied. A template node whose gathered
    /// gain is negative aborts the remainder of the template; free growth
    /// resumes from the current frontier.
    #[allow(clippy::too_many_arguments)]
    fn force_splits(
        &mut self,
        tree: &mut Tree,
        template: &'_ ForcedSplit,
        gradients: &[Score],
        hessians: &[Score],
        left_leaf: &mut i32,
        right_leaf: &mut i32,
        cur_depth: &mut i32,
        aborted_last_force_split: &mut bool,
    ) -> Result<usize> {
        let mut result_count = 0usize;
        *left_leaf = 0;
        let mut queue: VecDeque<(&ForcedSplit, i32)> = VecDeque::new();
        queue.push_back((template, 0));
        let mut force_split_map: HashMap<i32, SplitInfo> = HashMap::new();
        let mut left_node: Option<&ForcedSplit> = Some(template);
        let mut right_node: Option<&ForcedSplit> = None;
        let mut left_smaller = true;

        while !queue.is_empty() {
            // Histograms and free-growth candidates for the current pair,
            // exactly as a normal iteration would produce them.
            if self.before_find_best_split(tree, *left_leaf, *right_leaf) {
                self.find_best_splits(gradients, hessians);
            }

            if let Some(node) = left_node {
                match self.gather_forced(node, left_smaller)? {
                    Some(info) if info.gain >= 0.0 => {
                        force_split_map.insert(*left_leaf, info);
                    }
                    _ => {
                        force_split_map.remove(left_leaf);
                    }
                }
            }
            if let Some(node) = right_node {
                match self.gather_forced(node, !left_smaller)? {
                    Some(info) if info.gain >= 0.0 => {
                        force_split_map.insert(*right_leaf, info);
                    }
                    _ => {
                        force_split_map.remove(right_leaf);
                    }
                }
            }

            let (node, current_leaf) = queue.pop_front().expect("queue checked non-empty");
            let Some(mut info) = force_split_map.get(&current_leaf).cloned() else {
                debug!("Forced split aborted at leaf {}", current_leaf);
                *aborted_last_force_split = true;
                break;
            };
            let inner = self.train_data.inner_feature_index(info.feature as usize) as usize;
            let missing_type = self.train_data.feature_bin_mapper(inner).missing_type();
            *left_leaf = current_leaf;
            let next_leaf = tree.next_leaf_id();
            if self.train_data.is_numerical(inner) {
                let threshold_double = self.train_data.real_threshold(inner, info.threshold);
                self.data_partition.split(
                    current_leaf as usize,
                    self.train_data,
                    inner,
                    &SplitThreshold::Numerical(info.threshold),
                    info.default_left,
                    next_leaf,
                );
                info.left_count = self.data_partition.leaf_count(current_leaf as usize);
                info.right_count = self.data_partition.leaf_count(next_leaf);
                *right_leaf = tree.split(
                    current_leaf as usize,
                    inner,
                    info.feature as usize,
                    info.threshold,
                    threshold_double,
                    info.left_output,
                    info.right_output,
                    info.left_count,
                    info.right_count,
                    info.left_sum_hessian,
                    info.right_sum_hessian,
                    info.gain as f32,
                    missing_type,
                    info.default_left,
                ) as i32;
            } else {
                let bitset_inner = construct_bitset(&info.cat_threshold[..info.num_cat_threshold]);
                let categories: Vec<i32> = info.cat_threshold[..info.num_cat_threshold]
                    .iter()
                    .map(|&bin| self.train_data.real_threshold(inner, bin) as i32)
                    .collect();
                let bitset_real = category_bitset(&categories);
                self.data_partition.split(
                    current_leaf as usize,
                    self.train_data,
                    inner,
                    &SplitThreshold::Categorical(&bitset_inner),
                    info.default_left,
                    next_leaf,
                );
                info.left_count = self.data_partition.leaf_count(current_leaf as usize);
                info.right_count = self.data_partition.leaf_count(next_leaf);
                *right_leaf = tree.split_categorical(
                    current_leaf as usize,
                    inner,
                    info.feature as usize,
                    &bitset_inner,
                    &bitset_real,
                    info.left_output,
                    info.right_output,
                    info.left_count,
                    info.right_count,
                    info.left_sum_hessian,
                    info.right_sum_hessian,
                    info.gain as f32,
                    missing_type,
                ) as i32;
            }

            if info.left_count < info.right_count {
                left_smaller = true;
                self.smaller_leaf_splits.init_with_sums(
                    *left_leaf,
                    info.left_count,
                    info.left_sum_gradient,
                    info.left_sum_hessian,
                );
                self.larger_leaf_splits.init_with_sums(
                    *right_leaf,
                    info.right_count,
                    info.right_sum_gradient,
                    info.right_sum_hessian,
                );
            } else {
                left_smaller = false;
                self.smaller_leaf_splits.init_with_sums(
                    *right_leaf,
                    info.right_count,
                    info.right_sum_gradient,
                    info.right_sum_hessian,
                );
                self.larger_leaf_splits.init_with_sums(
                    *left_leaf,
                    info.left_count,
                    info.left_sum_gradient,
                    info.left_sum_hessian,
                );
            }

            left_node = node.left.as_deref();
            right_node = node.right.as_deref();
            if let Some(child) = left_node {
                queue.push_back((child, *left_leaf));
            }
            if let Some(child) = right_node {
                queue.push_back((child, *right_leaf));
            }
            result_count += 1;
            *cur_depth = (*cur_depth).max(tree.leaf_depth(*left_leaf as usize));
        }
        Ok(result_count)
    }

    /// Replay fresh gradients on a fixed tree structure and renew every leaf
    /// output.
    ///
    /// With `refit_decay_rate = 0` the result reproduces what training on
    /// these gradients would have produced for the same partition.
    pub fn fit_by_existing_tree(
        &self,
        old_tree: &Tree,
        gradients: &[Score],
        hessians: &[Score],
    ) -> Result<Tree> {
        if self.data_partition.num_leaves() < old_tree.num_leaves() {
            return Err(LeafwiseError::training(
                "data partition holds fewer leaves than the tree",
            ));
        }
        let mut tree = old_tree.clone();
        let params = &self.params;
        let partition = &self.data_partition;
        let decay = self.config.refit_decay_rate;
        let shrinkage = tree.shrinkage();
        let outputs: Vec<f64> = (0..tree.num_leaves())
            .into_par_iter()
            .map(|leaf| {
                let mut sum_grad = 0.0f64;
                let mut sum_hess = crate::core::constants::K_EPSILON;
                for &idx in partition.leaf_indices(leaf) {
                    sum_grad += gradients[idx as usize] as f64;
                    sum_hess += hessians[idx as usize] as f64;
                }
                let output = calculate_splitted_leaf_output(sum_grad, sum_hess, params);
                decay * tree.leaf_output(leaf) + (1.0 - decay) * output * shrinkage
            })
            .collect();
        for (leaf, output) in outputs.into_iter().enumerate() {
            tree.set_leaf_output(leaf, output);
        }
        Ok(tree)
    }

    /// Re-partition by a per-example leaf prediction, then refit.
    pub fn fit_by_existing_tree_with_pred(
        &mut self,
        old_tree: &Tree,
        leaf_pred: &[i32],
        gradients: &[Score],
        hessians: &[Score],
    ) -> Result<Tree> {
        self.data_partition
            .reset_by_leaf_pred(leaf_pred, old_tree.num_leaves());
        self.fit_by_existing_tree(old_tree, gradients, hessians)
    }

    /// Let the objective recompute leaf outputs from raw residuals.
    ///
    /// # Arguments
    /// * `residual_getter` - Residual of a full-dataset example index
    /// * `total_num_data` - Size of the full dataset; differs from the
    ///   learner's example count when training ran on a bagged subset
    /// * `bag_indices` - Bagged-position to full-index mapping in that case
    pub fn renew_tree_output(
        &self,
        tree: &mut Tree,
        objective: &dyn ObjectiveFunction,
        residual_getter: &(dyn Fn(DataSize) -> f64 + Sync),
        total_num_data: DataSize,
        bag_indices: Option<&[DataSize]>,
    ) {
        if !objective.is_renew_tree_output() {
            return;
        }
        let bag_mapper = if total_num_data != self.num_data {
            bag_indices
        } else {
            None
        };
        let partition = &self.data_partition;
        let num_leaves = tree.num_leaves();
        let outputs: Vec<Option<f64>> = (0..num_leaves)
            .into_par_iter()
            .map(|leaf| {
                let indices = partition.leaf_indices(leaf);
                if indices.is_empty() {
                    None
                } else {
                    Some(objective.renew_tree_output(
                        tree.leaf_output(leaf),
                        residual_getter,
                        indices,
                        bag_mapper,
                    ))
                }
            })
            .collect();
        let mut present = vec![1i32; num_leaves];
        for (leaf, output) in outputs.into_iter().enumerate() {
            match output {
                Some(value) => tree.set_leaf_output(leaf, value),
                None => {
                    // Only possible when another machine holds this leaf's
                    // examples.
                    tree.set_leaf_output(leaf, 0.0);
                    present[leaf] = 0;
                }
            }
        }
        if self.network.num_machines() > 1 {
            let local: Vec<f64> = (0..num_leaves).map(|leaf| tree.leaf_output(leaf)).collect();
            let summed = self.network.global_sum(&local);
            let counts = self.network.global_sum_counts(&present);
            for leaf in 0..num_leaves {
                tree.set_leaf_output(leaf, summed[leaf] / counts[leaf].max(1) as f64);
            }
        }
    }

    /// Number of examples the learner trains on.
    pub fn num_data(&self) -> DataSize {
        self.num_data
    }

    /// The configuration snapshot in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use ndarray::Array2;

    fn toy_dataset() -> Dataset {
        let features = Array2::from_shape_vec(
            (8, 2),
            vec![
                1.0, 5.0, //
                1.0, 6.0, //
                1.0, 5.0, //
                1.0, 6.0, //
                2.0, 5.0, //
                2.0, 6.0, //
                2.0, 5.0, //
                2.0, 6.0, //
            ],
        )
        .unwrap();
        Dataset::from_matrix(features.view(), &[], 255).unwrap()
    }

    struct MedianLikeObjective;

    impl ObjectiveFunction for MedianLikeObjective {
        fn is_renew_tree_output(&self) -> bool {
            true
        }

        fn renew_tree_output(
            &self,
            _old_output: f64,
            residual_getter: &dyn Fn(DataSize) -> f64,
            indices: &[DataSize],
            _bag_mapper: Option<&[DataSize]>,
        ) -> f64 {
            let sum: f64 = indices.iter().map(|&i| residual_getter(i)).sum();
            sum / indices.len() as f64
        }
    }

    #[test]
    fn test_renew_tree_output_replaces_leaf_values() {
        let dataset = toy_dataset();
        let config = ConfigBuilder::new()
            .num_leaves(2)
            .min_data_in_leaf(1)
            .min_sum_hessian_in_leaf(0.0)
            .build()
            .unwrap();
        let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
        let gradients = vec![-1.0f32, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
        let hessians = vec![1.0f32; 8];
        let mut tree = learner.train(&gradients, &hessians, None).unwrap();
        assert_eq!(tree.num_leaves(), 2);

        let residuals: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let getter = move |i: DataSize| residuals[i as usize];
        learner.renew_tree_output(&mut tree, &MedianLikeObjective, &getter, 8, None);
        // Leaf 0 holds examples 0..4, leaf 1 holds 4..8.
        assert!((tree.leaf_output(0) - 1.5).abs() < 1e-12);
        assert!((tree.leaf_output(1) - 5.5).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_length_mismatch_is_an_error() {
        let dataset = toy_dataset();
        let config = ConfigBuilder::new().num_leaves(2).build().unwrap();
        let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
        let result = learner.train(&[0.0; 4], &[1.0; 4], None);
        assert!(result.is_err());
    }

    #[test]
    fn test_reset_training_data_rejects_schema_change() {
        let dataset = toy_dataset();
        let config = ConfigBuilder::new().num_leaves(2).build().unwrap();
        let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();

        let other = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let other = Dataset::from_matrix(other.view(), &[], 255).unwrap();
        assert!(learner.reset_training_data(&other).is_err());
    }

    #[test]
    fn test_fit_by_existing_tree_with_pred_repartitions() {
        let dataset = toy_dataset();
        let config = ConfigBuilder::new()
            .num_leaves(2)
            .min_data_in_leaf(1)
            .min_sum_hessian_in_leaf(0.0)
            .refit_decay_rate(0.0)
            .build()
            .unwrap();
        let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
        let gradients = vec![-1.0f32, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
        let hessians = vec![1.0f32; 8];
        let tree = learner.train(&gradients, &hessians, None).unwrap();

        // Swap the two leaves when repartitioning; outputs follow the
        // assignment, not the stored structure.
        let leaf_pred = vec![1, 1, 1, 1, 0, 0, 0, 0];
        let refitted = learner
            .fit_by_existing_tree_with_pred(&tree, &leaf_pred, &gradients, &hessians)
            .unwrap();
        assert!((refitted.leaf_output(0) - 1.0).abs() < 1e-6);
        assert!((refitted.leaf_output(1) + 1.0).abs() < 1e-6);
    }
}
