//! Feature sampling for tree-level and node-level column subsetting.
//!
//! All draws consume a single seeded `StdRng`, so a fixed seed yields the
//! same feature subsets on every run. A floor of `min(2, |valid|)` features
//! is always kept, which guarantees growth stays possible even for
//! fractions close to zero.

use crate::config::Config;
use crate::dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Deterministic sampler over the valid feature set.
#[derive(Debug)]
pub struct ColSampler {
    fraction_bytree: f64,
    fraction_bynode: f64,
    rng: StdRng,
    /// Real indices of features that can be split on
    valid_feature_indices: Vec<usize>,
    /// Real-to-inner lookup captured from the dataset
    real_to_inner: Vec<i32>,
    num_features: usize,
    /// Tree-level sample: positions into `valid_feature_indices`. Empty when
    /// tree-level sampling is disabled, in which case node-level draws come
    /// directly from the valid set.
    used_feature_indices: Vec<usize>,
    /// Tree-level mask over inner features
    is_feature_used: Vec<i8>,
}

impl ColSampler {
    /// Create a sampler bound to a dataset.
    pub fn new(config: &Config, train_data: &Dataset) -> Self {
        let num_features = train_data.num_features();
        let real_to_inner = (0..train_data.num_total_features())
            .map(|real| train_data.inner_feature_index(real))
            .collect();
        ColSampler {
            fraction_bytree: config.feature_fraction,
            fraction_bynode: config.feature_fraction_bynode,
            rng: StdRng::seed_from_u64(config.feature_fraction_seed),
            valid_feature_indices: train_data.valid_feature_indices(),
            real_to_inner,
            num_features,
            used_feature_indices: Vec::new(),
            is_feature_used: vec![1; num_features],
        }
    }

    /// Install a new configuration snapshot.
    pub fn reset_config(&mut self, config: &Config) {
        self.fraction_bytree = config.feature_fraction;
        self.fraction_bynode = config.feature_fraction_bynode;
        self.rng = StdRng::seed_from_u64(config.feature_fraction_seed);
    }

    /// Number of features to keep for a total count and fraction.
    fn sample_count(&self, total: usize, fraction: f64) -> usize {
        let floor = 2.min(self.valid_feature_indices.len());
        ((total as f64 * fraction).round() as usize).max(floor).min(total)
    }

    /// Draw `k` distinct positions from `[0, n)`.
    fn sample(&mut self, n: usize, k: usize) -> Vec<usize> {
        if k >= n {
            return (0..n).collect();
        }
        let mut positions: Vec<usize> = (0..n).collect();
        let (chosen, _) = positions.partial_shuffle(&mut self.rng, k);
        let mut chosen = chosen.to_vec();
        chosen.sort_unstable();
        chosen
    }

    /// Redraw the tree-level feature subset. Called once per tree.
    pub fn reset_by_tree(&mut self) {
        if self.fraction_bytree >= 1.0 {
            self.is_feature_used.fill(1);
            self.used_feature_indices.clear();
            return;
        }
        self.is_feature_used.fill(0);
        let count = self.sample_count(self.valid_feature_indices.len(), self.fraction_bytree);
        self.used_feature_indices = self.sample(self.valid_feature_indices.len(), count);
        for &pos in &self.used_feature_indices {
            let real = self.valid_feature_indices[pos];
            let inner = self.real_to_inner[real];
            debug_assert!(inner >= 0);
            self.is_feature_used[inner as usize] = 1;
        }
    }

    /// Draw a node-level mask over inner features.
    ///
    /// With tree-level sampling active the draw is taken from the tree-level
    /// subset, otherwise directly from the valid feature set.
    pub fn get_by_node(&mut self) -> Vec<i8> {
        if self.fraction_bynode >= 1.0 {
            return self.is_feature_used.clone();
        }
        let mut mask = vec![0i8; self.num_features];
        if self.used_feature_indices.is_empty() {
            let count = self.sample_count(self.valid_feature_indices.len(), self.fraction_bynode);
            for pos in self.sample(self.valid_feature_indices.len(), count) {
                let real = self.valid_feature_indices[pos];
                mask[self.real_to_inner[real] as usize] = 1;
            }
        } else {
            let count = self.sample_count(self.used_feature_indices.len(), self.fraction_bynode);
            let picks = self.sample(self.used_feature_indices.len(), count);
            for pick in picks {
                let real = self.valid_feature_indices[self.used_feature_indices[pick]];
                mask[self.real_to_inner[real] as usize] = 1;
            }
        }
        mask
    }

    /// Tree-level mask over inner features.
    pub fn is_feature_used_bytree(&self) -> &[i8] {
        &self.is_feature_used
    }

    /// Whether node-level sampling is active.
    pub fn samples_by_node(&self) -> bool {
        self.fraction_bynode < 1.0
    }
}
