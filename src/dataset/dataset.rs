//! Pre-binned training dataset and histogram construction kernels.
//!
//! The dataset owns one binned column per used feature, the injective
//! mapping between *real* (caller-facing) and *inner* (learner-facing)
//! feature indices, and the shared [`HistogramLayout`] that fixes where each
//! feature's bins live inside a leaf's flat histogram buffer.
//!
//! Histogram accumulation runs either column-wise (parallel across features)
//! or row-wise (parallel across fixed example blocks, merged in block order).
//! The method is chosen once per learner lifetime and never changes during
//! training, so repeated runs visit bins in the same order and produce
//! bit-identical sums.

use crate::core::constants::HIST_OFFSET;
use crate::core::error::{LeafwiseError, Result};
use crate::core::types::{BinIndex, DataSize, Hist, Score};
use crate::core::utils::find_in_bitset;
use crate::dataset::binning::{BinMapper, BinType, MissingType};
use ndarray::ArrayView2;
use rayon::prelude::*;
use std::sync::Arc;

/// One histogram bin: gradient sum, hessian sum, and example count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistEntry {
    /// Sum of gradients of the examples in this bin
    pub sum_gradient: Hist,
    /// Sum of hessians of the examples in this bin
    pub sum_hessian: Hist,
    /// Number of examples in this bin
    pub count: DataSize,
}

impl HistEntry {
    /// Accumulate one example.
    #[inline]
    pub fn add(&mut self, gradient: Hist, hessian: Hist) {
        self.sum_gradient += gradient;
        self.sum_hessian += hessian;
        self.count += 1;
    }

    /// Accumulate another entry.
    #[inline]
    pub fn add_entry(&mut self, other: &HistEntry) {
        self.sum_gradient += other.sum_gradient;
        self.sum_hessian += other.sum_hessian;
        self.count += other.count;
    }

    /// Subtract another entry.
    #[inline]
    pub fn sub_entry(&mut self, other: &HistEntry) {
        self.sum_gradient -= other.sum_gradient;
        self.sum_hessian -= other.sum_hessian;
        self.count -= other.count;
    }
}

/// Placement of per-feature bin ranges inside a flat histogram buffer.
#[derive(Debug, Clone)]
pub struct HistogramLayout {
    /// Physical start slot of each inner feature
    pub offsets: Vec<usize>,
    /// Number of stored slots of each inner feature (data bins + sentinels)
    pub sizes: Vec<usize>,
    /// Total slots of one leaf histogram
    pub total_bins: usize,
}

impl HistogramLayout {
    /// Borrow the buffer region of one feature.
    pub fn feature_region<'a>(&self, feature: usize, buf: &'a [HistEntry]) -> &'a [HistEntry] {
        let start = self.offsets[feature];
        &buf[start..start + self.sizes[feature]]
    }

    /// Split a buffer into disjoint mutable per-feature regions.
    ///
    /// `features` must be sorted ascending. Regions come back in the same
    /// order, paired with their feature index.
    pub fn feature_regions_mut<'a>(
        &self,
        features: &[usize],
        mut buf: &'a mut [HistEntry],
    ) -> Vec<(usize, &'a mut [HistEntry])> {
        let mut regions = Vec::with_capacity(features.len());
        let mut consumed = 0usize;
        for &f in features {
            let start = self.offsets[f];
            debug_assert!(start >= consumed);
            let rest = buf.split_at_mut(start - consumed).1;
            let (region, rest) = rest.split_at_mut(self.sizes[f]);
            buf = rest;
            consumed = start + self.sizes[f];
            regions.push((f, region));
        }
        regions
    }
}

/// Scratch state for histogram construction, created once per learner by
/// [`Dataset::test_multi_threading_method`] and reused for every leaf.
#[derive(Debug)]
pub struct TrainShareState {
    /// Whether the column-wise kernel was selected
    pub is_col_wise: bool,
    /// Fixed worker count used to partition row-wise blocks
    pub num_threads: usize,
    ordered_gradients: Vec<Score>,
    ordered_hessians: Vec<Score>,
    thread_hist: Vec<Vec<HistEntry>>,
}

impl TrainShareState {
    fn new(is_col_wise: bool, num_threads: usize) -> Self {
        TrainShareState {
            is_col_wise,
            num_threads,
            ordered_gradients: Vec::new(),
            ordered_hessians: Vec::new(),
            thread_hist: Vec::new(),
        }
    }
}

/// Threshold specification handed to the partition split.
#[derive(Debug, Clone, Copy)]
pub enum SplitThreshold<'a> {
    /// Numerical split: logical bins at or below the threshold go left
    Numerical(BinIndex),
    /// Categorical split: logical bins inside the bitset go left
    Categorical(&'a [u32]),
}

/// A pre-binned training dataset.
#[derive(Debug)]
pub struct Dataset {
    num_data: DataSize,
    num_total_features: usize,
    mappers: Vec<BinMapper>,
    /// Stored bins per inner feature, column-major
    columns: Vec<Vec<u16>>,
    real_to_inner: Vec<i32>,
    inner_to_real: Vec<usize>,
    layout: Arc<HistogramLayout>,
}

impl Dataset {
    /// Build a dataset from a raw feature matrix.
    ///
    /// # Arguments
    /// * `features` - `num_data x num_features` matrix; NaN entries are
    ///   treated as missing
    /// * `categorical_features` - Real indices of categorical columns
    /// * `max_bin` - Upper limit on the number of bins per feature
    ///
    /// Constant columns are excluded from the inner feature space; their
    /// real indices map to inner index `-1`.
    pub fn from_matrix(
        features: ArrayView2<f64>,
        categorical_features: &[usize],
        max_bin: usize,
    ) -> Result<Self> {
        let (num_data, num_total_features) = features.dim();
        if num_data == 0 || num_total_features == 0 {
            return Err(LeafwiseError::dataset("feature matrix is empty"));
        }
        if num_data > DataSize::MAX as usize {
            return Err(LeafwiseError::dataset("too many examples for 32-bit indexing"));
        }

        let mut mappers = Vec::new();
        let mut columns = Vec::new();
        let mut real_to_inner = vec![-1i32; num_total_features];
        let mut inner_to_real = Vec::new();

        for real in 0..num_total_features {
            let column: Vec<f64> = features.column(real).to_vec();
            let mapper = if categorical_features.contains(&real) {
                BinMapper::new_categorical(&column, max_bin)?
            } else {
                let missing = if column.iter().any(|v| v.is_nan()) {
                    MissingType::NaN
                } else {
                    MissingType::None
                };
                BinMapper::new_numerical(&column, max_bin, missing)?
            };
            if mapper.is_trivial() {
                continue;
            }
            let stored: Vec<u16> = column.iter().map(|&v| mapper.stored_bin(v) as u16).collect();
            real_to_inner[real] = inner_to_real.len() as i32;
            inner_to_real.push(real);
            mappers.push(mapper);
            columns.push(stored);
        }

        if mappers.is_empty() {
            return Err(LeafwiseError::dataset(
                "no usable features: every column is constant",
            ));
        }

        let mut offsets = Vec::with_capacity(mappers.len());
        let mut sizes = Vec::with_capacity(mappers.len());
        let mut total_bins = 0usize;
        for mapper in &mappers {
            offsets.push(total_bins);
            sizes.push(mapper.num_stored_bin());
            total_bins += mapper.num_stored_bin();
        }

        Ok(Dataset {
            num_data: num_data as DataSize,
            num_total_features,
            mappers,
            columns,
            real_to_inner,
            inner_to_real,
            layout: Arc::new(HistogramLayout {
                offsets,
                sizes,
                total_bins,
            }),
        })
    }

    /// Number of examples.
    pub fn num_data(&self) -> DataSize {
        self.num_data
    }

    /// Number of inner (used) features.
    pub fn num_features(&self) -> usize {
        self.mappers.len()
    }

    /// Number of raw columns the dataset was built from.
    pub fn num_total_features(&self) -> usize {
        self.num_total_features
    }

    /// Number of data bins of an inner feature.
    pub fn feature_num_bin(&self, inner: usize) -> usize {
        self.mappers[inner].num_bin()
    }

    /// Real indices of every feature that can be split on.
    pub fn valid_feature_indices(&self) -> Vec<usize> {
        self.inner_to_real.clone()
    }

    /// Inner index of a real feature, `-1` if the feature was dropped.
    pub fn inner_feature_index(&self, real: usize) -> i32 {
        self.real_to_inner.get(real).copied().unwrap_or(-1)
    }

    /// Real index of an inner feature.
    pub fn real_feature_index(&self, inner: usize) -> usize {
        self.inner_to_real[inner]
    }

    /// Bin mapper of an inner feature.
    pub fn feature_bin_mapper(&self, inner: usize) -> &BinMapper {
        &self.mappers[inner]
    }

    /// Map a real-valued threshold on an inner feature to its logical bin.
    pub fn bin_threshold(&self, inner: usize, threshold: f64) -> BinIndex {
        self.mappers[inner].bin_threshold(threshold)
    }

    /// Decode a logical bin of an inner feature into a real threshold.
    pub fn real_threshold(&self, inner: usize, bin: BinIndex) -> f64 {
        self.mappers[inner].real_threshold(bin)
    }

    /// Stored bin of one example on one inner feature.
    pub fn stored_bin(&self, inner: usize, index: DataSize) -> u16 {
        self.columns[inner][index as usize]
    }

    /// Shared histogram placement table.
    pub fn histogram_layout(&self) -> Arc<HistogramLayout> {
        Arc::clone(&self.layout)
    }

    /// Select the histogram construction method and allocate scratch state.
    ///
    /// The selection is a deterministic rule over the forced flags and the
    /// dataset shape; it is pinned for the lifetime of the returned state.
    pub fn test_multi_threading_method(
        &self,
        force_col_wise: bool,
        force_row_wise: bool,
    ) -> TrainShareState {
        let num_threads = rayon::current_num_threads().max(1);
        let is_col_wise = if force_col_wise {
            true
        } else if force_row_wise {
            false
        } else {
            // Row-wise only pays off on tall, narrow data with real
            // parallelism available.
            !(num_threads > 1 && self.num_data as usize >= 1024 * self.num_features())
        };
        TrainShareState::new(is_col_wise, num_threads)
    }

    /// Prepare the share state for a new tree.
    pub fn init_train(&self, _is_feature_used: &[i8], state: &mut TrainShareState) {
        let n = self.num_data as usize;
        if state.ordered_gradients.len() < n {
            state.ordered_gradients.resize(n, 0.0);
            state.ordered_hessians.resize(n, 0.0);
        }
    }

    /// Accumulate per-feature histograms for one leaf.
    ///
    /// # Arguments
    /// * `is_feature_used` - Inner-feature mask; unused regions are not touched
    /// * `data_indices` - Examples of the leaf, `None` for the full dataset
    /// * `gradients`, `hessians` - Per-example statistics over the full index space
    /// * `is_constant_hessian` - All hessians equal `hessians[0]`
    /// * `state` - Scratch state from [`Dataset::test_multi_threading_method`]
    /// * `out` - Flat leaf histogram, laid out per [`HistogramLayout`]
    ///
    /// Each feature's most frequent bin is skipped during accumulation and
    /// must be restored afterwards with [`Dataset::fix_histogram`].
    #[allow(clippy::too_many_arguments)]
    pub fn construct_histograms(
        &self,
        is_feature_used: &[i8],
        data_indices: Option<&[DataSize]>,
        gradients: &[Score],
        hessians: &[Score],
        is_constant_hessian: bool,
        state: &mut TrainShareState,
        out: &mut [HistEntry],
    ) {
        let n = data_indices.map_or(self.num_data as usize, |idx| idx.len());
        let used: Vec<usize> = (0..self.num_features())
            .filter(|&f| is_feature_used[f] != 0)
            .collect();
        if n == 0 || used.is_empty() {
            for &f in &used {
                let start = self.layout.offsets[f];
                out[start..start + self.layout.sizes[f]].fill(HistEntry::default());
            }
            return;
        }

        let TrainShareState {
            is_col_wise,
            num_threads,
            ordered_gradients,
            ordered_hessians,
            thread_hist,
        } = state;

        // Gather leaf-local gradients so the kernels read contiguously.
        let (grad, hess): (&[Score], &[Score]) = if let Some(indices) = data_indices {
            if ordered_gradients.len() < n {
                ordered_gradients.resize(n, 0.0);
                ordered_hessians.resize(n, 0.0);
            }
            for (i, &idx) in indices.iter().enumerate() {
                ordered_gradients[i] = gradients[idx as usize];
            }
            if !is_constant_hessian {
                for (i, &idx) in indices.iter().enumerate() {
                    ordered_hessians[i] = hessians[idx as usize];
                }
            }
            (&ordered_gradients[..n], &ordered_hessians[..n])
        } else {
            (gradients, hessians)
        };
        let const_hess = hessians[0] as Hist;

        if *is_col_wise {
            self.construct_col_wise(
                &used,
                data_indices,
                grad,
                hess,
                is_constant_hessian,
                const_hess,
                out,
            );
        } else {
            self.construct_row_wise(
                &used,
                data_indices,
                grad,
                hess,
                is_constant_hessian,
                const_hess,
                *num_threads,
                thread_hist,
                out,
            );
        }
    }

    /// Column-wise kernel: parallel across features, each worker owns one
    /// feature's region of the output buffer.
    #[allow(clippy::too_many_arguments)]
    fn construct_col_wise(
        &self,
        used: &[usize],
        data_indices: Option<&[DataSize]>,
        grad: &[Score],
        hess: &[Score],
        is_constant_hessian: bool,
        const_hess: Hist,
        out: &mut [HistEntry],
    ) {
        let n = data_indices.map_or(self.num_data as usize, |idx| idx.len());
        let regions = self.layout.feature_regions_mut(used, out);
        regions.into_par_iter().for_each(|(f, region)| {
            region.fill(HistEntry::default());
            let column = &self.columns[f];
            let skip = (self.mappers[f].most_freq_bin() + HIST_OFFSET) as u16;
            for i in 0..n {
                let row = data_indices.map_or(i, |idx| idx[i] as usize);
                let bin = column[row];
                if bin == skip {
                    continue;
                }
                let h = if is_constant_hessian {
                    const_hess
                } else {
                    hess[i] as Hist
                };
                region[bin as usize].add(grad[i] as Hist, h);
            }
        });
    }

    /// Row-wise kernel: parallel across fixed example blocks into per-thread
    /// buffers, merged sequentially in block order.
    #[allow(clippy::too_many_arguments)]
    fn construct_row_wise(
        &self,
        used: &[usize],
        data_indices: Option<&[DataSize]>,
        grad: &[Score],
        hess: &[Score],
        is_constant_hessian: bool,
        const_hess: Hist,
        num_threads: usize,
        thread_hist: &mut Vec<Vec<HistEntry>>,
        out: &mut [HistEntry],
    ) {
        let n = data_indices.map_or(self.num_data as usize, |idx| idx.len());
        let total_bins = self.layout.total_bins;
        if thread_hist.len() != num_threads
            || thread_hist.first().map_or(false, |b| b.len() != total_bins)
        {
            *thread_hist = vec![vec![HistEntry::default(); total_bins]; num_threads];
        }
        let block_size = (n + num_threads - 1) / num_threads;

        thread_hist
            .par_iter_mut()
            .enumerate()
            .for_each(|(tid, buffer)| {
                for &f in used {
                    let start = self.layout.offsets[f];
                    buffer[start..start + self.layout.sizes[f]].fill(HistEntry::default());
                }
                let begin = tid * block_size;
                let end = ((tid + 1) * block_size).min(n);
                for &f in used {
                    let column = &self.columns[f];
                    let offset = self.layout.offsets[f];
                    let skip = (self.mappers[f].most_freq_bin() + HIST_OFFSET) as u16;
                    for i in begin..end {
                        let row = data_indices.map_or(i, |idx| idx[i] as usize);
                        let bin = column[row];
                        if bin == skip {
                            continue;
                        }
                        let h = if is_constant_hessian {
                            const_hess
                        } else {
                            hess[i] as Hist
                        };
                        buffer[offset + bin as usize].add(grad[i] as Hist, h);
                    }
                }
            });

        // Merge in fixed block order so float sums do not depend on scheduling.
        for &f in used {
            let start = self.layout.offsets[f];
            let size = self.layout.sizes[f];
            out[start..start + size].fill(HistEntry::default());
            for buffer in thread_hist.iter().take(num_threads) {
                for (dst, src) in out[start..start + size]
                    .iter_mut()
                    .zip(&buffer[start..start + size])
                {
                    dst.add_entry(src);
                }
            }
        }
    }

    /// Restore the skipped most-frequent bin of one feature from the leaf
    /// totals.
    pub fn fix_histogram(
        &self,
        inner: usize,
        sum_gradient: f64,
        sum_hessian: f64,
        num_data: DataSize,
        hist: &mut [HistEntry],
    ) {
        let mfb = (self.mappers[inner].most_freq_bin() + HIST_OFFSET) as usize;
        let mut rest = HistEntry::default();
        for (slot, entry) in hist.iter().enumerate() {
            if slot != mfb {
                rest.add_entry(entry);
            }
        }
        hist[mfb] = HistEntry {
            sum_gradient: sum_gradient - rest.sum_gradient,
            sum_hessian: sum_hessian - rest.sum_hessian,
            count: num_data - rest.count,
        };
    }

    /// Stable in-place partition of `indices` by a split decision.
    ///
    /// Returns the number of indices routed left; they occupy the front of
    /// the slice, the right indices follow, both sides in original order.
    pub fn split_indices(
        &self,
        inner: usize,
        threshold: &SplitThreshold<'_>,
        default_left: bool,
        indices: &mut [DataSize],
    ) -> DataSize {
        let column = &self.columns[inner];
        let mut left = Vec::with_capacity(indices.len());
        let mut right = Vec::with_capacity(indices.len());
        for &idx in indices.iter() {
            let stored = column[idx as usize] as u32;
            let goes_left = if stored < HIST_OFFSET {
                default_left
            } else {
                let logical = stored - HIST_OFFSET;
                match threshold {
                    SplitThreshold::Numerical(t) => logical <= *t,
                    SplitThreshold::Categorical(bitset) => find_in_bitset(bitset, logical),
                }
            };
            if goes_left {
                left.push(idx);
            } else {
                right.push(idx);
            }
        }
        let left_count = left.len();
        indices[..left_count].copy_from_slice(&left);
        indices[left_count..].copy_from_slice(&right);
        left_count as DataSize
    }

    /// Whether an inner feature is numerical.
    pub fn is_numerical(&self, inner: usize) -> bool {
        self.mappers[inner].bin_type() == BinType::Numerical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn toy_dataset() -> Dataset {
        // Two informative columns and one constant column that gets dropped.
        let features = Array2::from_shape_vec(
            (8, 3),
            vec![
                1.0, 10.0, 7.0, //
                1.0, 20.0, 7.0, //
                2.0, 10.0, 7.0, //
                2.0, 20.0, 7.0, //
                3.0, 10.0, 7.0, //
                3.0, 20.0, 7.0, //
                4.0, 10.0, 7.0, //
                4.0, 20.0, 7.0, //
            ],
        )
        .unwrap();
        Dataset::from_matrix(features.view(), &[], 255).unwrap()
    }

    #[test]
    fn test_from_matrix_drops_constant_columns() {
        let dataset = toy_dataset();
        assert_eq!(dataset.num_data(), 8);
        assert_eq!(dataset.num_total_features(), 3);
        assert_eq!(dataset.num_features(), 2);
        assert_eq!(dataset.inner_feature_index(0), 0);
        assert_eq!(dataset.inner_feature_index(1), 1);
        assert_eq!(dataset.inner_feature_index(2), -1);
        assert_eq!(dataset.valid_feature_indices(), vec![0, 1]);
    }

    #[test]
    fn test_histogram_sums_match_leaf_totals() {
        let dataset = toy_dataset();
        let gradients: Vec<Score> = vec![-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
        let hessians: Vec<Score> = vec![1.0; 8];
        let mut state = dataset.test_multi_threading_method(true, false);
        dataset.init_train(&[1, 1], &mut state);

        let mut hist = vec![HistEntry::default(); dataset.histogram_layout().total_bins];
        dataset.construct_histograms(
            &[1, 1],
            None,
            &gradients,
            &hessians,
            true,
            &mut state,
            &mut hist,
        );
        for f in 0..2 {
            dataset.fix_histogram(f, 0.0, 8.0, 8, {
                let layout = dataset.histogram_layout();
                let start = layout.offsets[f];
                &mut hist[start..start + layout.sizes[f]]
            });
        }

        let layout = dataset.histogram_layout();
        for f in 0..2 {
            let region = layout.feature_region(f, &hist);
            let total: HistEntry = {
                let mut acc = HistEntry::default();
                for e in region {
                    acc.add_entry(e);
                }
                acc
            };
            assert!((total.sum_gradient - 0.0).abs() < 1e-12);
            assert!((total.sum_hessian - 8.0).abs() < 1e-12);
            assert_eq!(total.count, 8);
        }
    }

    #[test]
    fn test_col_and_row_wise_agree() {
        let dataset = toy_dataset();
        let gradients: Vec<Score> = (0..8).map(|i| (i as f32) - 3.5).collect();
        let hessians: Vec<Score> = (0..8).map(|i| 1.0 + (i % 3) as f32).collect();
        let total = dataset.histogram_layout().total_bins;

        let mut col_state = dataset.test_multi_threading_method(true, false);
        let mut row_state = dataset.test_multi_threading_method(false, true);
        let mut col_hist = vec![HistEntry::default(); total];
        let mut row_hist = vec![HistEntry::default(); total];

        let indices: Vec<DataSize> = vec![0, 2, 3, 5, 7];
        dataset.construct_histograms(
            &[1, 1],
            Some(&indices),
            &gradients,
            &hessians,
            false,
            &mut col_state,
            &mut col_hist,
        );
        dataset.construct_histograms(
            &[1, 1],
            Some(&indices),
            &gradients,
            &hessians,
            false,
            &mut row_state,
            &mut row_hist,
        );

        for (a, b) in col_hist.iter().zip(&row_hist) {
            assert!((a.sum_gradient - b.sum_gradient).abs() < 1e-9);
            assert!((a.sum_hessian - b.sum_hessian).abs() < 1e-9);
            assert_eq!(a.count, b.count);
        }
    }

    #[test]
    fn test_split_indices_numerical() {
        let dataset = toy_dataset();
        let mut indices: Vec<DataSize> = (0..8).collect();
        // Feature 0 has bins 0..4 for values 1..4; threshold bin 1 keeps
        // values <= 2 on the left.
        let left_count = dataset.split_indices(
            0,
            &SplitThreshold::Numerical(1),
            true,
            &mut indices,
        );
        assert_eq!(left_count, 4);
        assert_eq!(&indices[..4], &[0, 1, 2, 3]);
        assert_eq!(&indices[4..], &[4, 5, 6, 7]);
    }

    #[test]
    fn test_histogram_additivity() {
        // hist(parent) == hist(left) + hist(right) bin by bin.
        let dataset = toy_dataset();
        let gradients: Vec<Score> = (0..8).map(|i| (i as f32) * 0.25 - 1.0).collect();
        let hessians: Vec<Score> = vec![1.0; 8];
        let total = dataset.histogram_layout().total_bins;
        let mut state = dataset.test_multi_threading_method(true, false);

        let parent: Vec<DataSize> = (0..8).collect();
        let left: Vec<DataSize> = vec![0, 1, 2, 3];
        let right: Vec<DataSize> = vec![4, 5, 6, 7];

        let mut hist_parent = vec![HistEntry::default(); total];
        let mut hist_left = vec![HistEntry::default(); total];
        let mut hist_right = vec![HistEntry::default(); total];
        for (indices, hist) in [
            (&parent, &mut hist_parent),
            (&left, &mut hist_left),
            (&right, &mut hist_right),
        ] {
            dataset.construct_histograms(
                &[1, 1],
                Some(indices),
                &gradients,
                &hessians,
                true,
                &mut state,
                hist,
            );
        }
        for i in 0..total {
            let sum_g = hist_left[i].sum_gradient + hist_right[i].sum_gradient;
            assert!((hist_parent[i].sum_gradient - sum_g).abs() < 1e-9);
            assert_eq!(hist_parent[i].count, hist_left[i].count + hist_right[i].count);
        }
    }
}
