//! Feature discretization: mapping raw feature values to bins.
//!
//! A [`BinMapper`] is built per feature from the training column. Numerical
//! features use unique-value boundaries when the column has few distinct
//! values and quantile boundaries otherwise. Categorical features keep the
//! most frequent categories, one bin each.
//!
//! Bins come in two index spaces. The *logical* space `[0, num_bin)` covers
//! data bins and is what split search iterates over. The *stored* space
//! prepends [`HIST_OFFSET`] sentinel slots (slot 0 for zero-coded missing
//! values, slot 1 for NaN-coded missing values) and is what the binned
//! columns and histogram buffers are addressed by.

use crate::core::constants::HIST_OFFSET;
use crate::core::error::{LeafwiseError, Result};
use crate::core::types::BinIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Threshold below which a value counts as zero for zero-coded missing.
const K_ZERO_THRESHOLD: f64 = 1e-35;

/// Kind of feature a bin mapper discretizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinType {
    /// Ordered feature, split by threshold
    Numerical,
    /// Unordered feature, split by category subset
    Categorical,
}

/// How missing values are represented in a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingType {
    /// The column contains no missing values
    None,
    /// Missing values are encoded as zero
    Zero,
    /// Missing values are encoded as NaN
    NaN,
}

/// Stored bin index of the zero-coded missing sentinel.
pub const ZERO_SENTINEL: u32 = 0;
/// Stored bin index of the NaN-coded missing sentinel.
pub const NAN_SENTINEL: u32 = 1;

/// Per-feature mapping between raw values and bins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinMapper {
    bin_type: BinType,
    missing_type: MissingType,
    /// Number of data bins (sentinels excluded)
    num_bin: usize,
    /// Inclusive upper bound of each numerical bin; the last entry is +inf
    bin_upper_bounds: Vec<f64>,
    /// Category value of each categorical bin
    categories: Vec<i32>,
    /// Category value to bin lookup
    category_to_bin: HashMap<i32, BinIndex>,
    /// Logical data bin with the highest training count
    most_freq_bin: BinIndex,
}

impl BinMapper {
    /// Build a numerical bin mapper from a training column.
    ///
    /// # Arguments
    /// * `values` - Raw column values; NaN entries are treated as missing
    /// * `max_bin` - Upper limit on the number of data bins
    /// * `missing_type` - Missing-value encoding of this column
    pub fn new_numerical(values: &[f64], max_bin: usize, missing_type: MissingType) -> Result<Self> {
        let mut finite: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .filter(|v| !(missing_type == MissingType::Zero && v.abs() < K_ZERO_THRESHOLD))
            .collect();
        if finite.is_empty() {
            // A column of nothing but missing values gets a single trivial bin.
            return Ok(BinMapper {
                bin_type: BinType::Numerical,
                missing_type,
                num_bin: 1,
                bin_upper_bounds: vec![f64::INFINITY],
                categories: Vec::new(),
                category_to_bin: HashMap::new(),
                most_freq_bin: 0,
            });
        }
        finite.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let mut unique: Vec<f64> = Vec::with_capacity(finite.len());
        for &v in &finite {
            if unique.last().map_or(true, |&u| u != v) {
                unique.push(v);
            }
        }

        let bin_upper_bounds = if unique.len() <= max_bin {
            Self::boundaries_from_unique(&unique)
        } else {
            Self::boundaries_from_quantiles(&finite, max_bin)
        };
        let num_bin = bin_upper_bounds.len();

        let mut mapper = BinMapper {
            bin_type: BinType::Numerical,
            missing_type,
            num_bin,
            bin_upper_bounds,
            categories: Vec::new(),
            category_to_bin: HashMap::new(),
            most_freq_bin: 0,
        };
        mapper.most_freq_bin = mapper.compute_most_freq_bin(values);
        Ok(mapper)
    }

    /// Build a categorical bin mapper from a training column.
    ///
    /// Category values are the rounded non-negative integers of the column.
    /// The `max_bin` most frequent categories each receive a bin; everything
    /// else maps to the NaN sentinel and follows the default direction.
    pub fn new_categorical(values: &[f64], max_bin: usize) -> Result<Self> {
        let mut counts: HashMap<i32, usize> = HashMap::new();
        for &v in values {
            if !v.is_finite() || v < 0.0 {
                continue;
            }
            *counts.entry(v.round() as i32).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return Err(LeafwiseError::dataset(
                "categorical feature has no valid category values",
            ));
        }
        let mut by_count: Vec<(i32, usize)> = counts.into_iter().collect();
        // Most frequent first; ties broken toward the smaller category value
        // so rebuilding the dataset yields identical bins.
        by_count.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        by_count.truncate(max_bin);

        let categories: Vec<i32> = by_count.iter().map(|&(c, _)| c).collect();
        let category_to_bin: HashMap<i32, BinIndex> = categories
            .iter()
            .enumerate()
            .map(|(bin, &c)| (c, bin as BinIndex))
            .collect();

        Ok(BinMapper {
            bin_type: BinType::Categorical,
            missing_type: MissingType::NaN,
            num_bin: categories.len(),
            bin_upper_bounds: Vec::new(),
            categories,
            category_to_bin,
            // bin 0 is the most frequent category by construction
            most_freq_bin: 0,
        })
    }

    fn boundaries_from_unique(unique: &[f64]) -> Vec<f64> {
        let mut bounds = Vec::with_capacity(unique.len());
        for window in unique.windows(2) {
            bounds.push((window[0] + window[1]) / 2.0);
        }
        bounds.push(f64::INFINITY);
        bounds
    }

    fn boundaries_from_quantiles(sorted: &[f64], max_bin: usize) -> Vec<f64> {
        let n = sorted.len();
        let mut bounds = Vec::with_capacity(max_bin);
        for b in 1..max_bin {
            let pos = b * n / max_bin;
            let lo = sorted[pos - 1];
            let hi = sorted[pos.min(n - 1)];
            if lo < hi {
                let mid = (lo + hi) / 2.0;
                if bounds.last().map_or(true, |&prev| mid > prev) {
                    bounds.push(mid);
                }
            }
        }
        bounds.push(f64::INFINITY);
        bounds
    }

    fn compute_most_freq_bin(&self, values: &[f64]) -> BinIndex {
        let mut counts = vec![0usize; self.num_bin];
        for &v in values {
            let stored = self.stored_bin(v);
            if stored >= HIST_OFFSET {
                counts[(stored - HIST_OFFSET) as usize] += 1;
            }
        }
        let mut best = 0usize;
        for (bin, &cnt) in counts.iter().enumerate() {
            if cnt > counts[best] {
                best = bin;
            }
        }
        best as BinIndex
    }

    /// Map a raw value to its stored bin (sentinels included).
    pub fn stored_bin(&self, value: f64) -> u32 {
        match self.bin_type {
            BinType::Numerical => {
                if value.is_nan() {
                    return NAN_SENTINEL;
                }
                if self.missing_type == MissingType::Zero && value.abs() < K_ZERO_THRESHOLD {
                    return ZERO_SENTINEL;
                }
                self.value_to_data_bin(value) + HIST_OFFSET
            }
            BinType::Categorical => {
                if !value.is_finite() || value < 0.0 {
                    return NAN_SENTINEL;
                }
                match self.category_to_bin.get(&(value.round() as i32)) {
                    Some(&bin) => bin + HIST_OFFSET,
                    None => NAN_SENTINEL,
                }
            }
        }
    }

    /// Map a finite value to its logical data bin.
    pub fn value_to_data_bin(&self, value: f64) -> BinIndex {
        debug_assert_eq!(self.bin_type, BinType::Numerical);
        // First bin whose upper bound admits the value.
        let mut lo = 0usize;
        let mut hi = self.num_bin - 1;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if value <= self.bin_upper_bounds[mid] {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo as BinIndex
    }

    /// Map a real-valued threshold to the logical bin it falls into.
    pub fn bin_threshold(&self, threshold: f64) -> BinIndex {
        match self.bin_type {
            BinType::Numerical => self.value_to_data_bin(threshold),
            BinType::Categorical => self
                .category_to_bin
                .get(&(threshold.round() as i32))
                .copied()
                .unwrap_or(0),
        }
    }

    /// Decode a logical bin back into a real-valued threshold.
    pub fn real_threshold(&self, bin: BinIndex) -> f64 {
        match self.bin_type {
            BinType::Numerical => self.bin_upper_bounds[bin as usize],
            BinType::Categorical => self.categories[bin as usize] as f64,
        }
    }

    /// Number of data bins.
    pub fn num_bin(&self) -> usize {
        self.num_bin
    }

    /// Total number of stored slots (data bins plus sentinels).
    pub fn num_stored_bin(&self) -> usize {
        self.num_bin + HIST_OFFSET as usize
    }

    /// Feature kind.
    pub fn bin_type(&self) -> BinType {
        self.bin_type
    }

    /// Missing-value encoding.
    pub fn missing_type(&self) -> MissingType {
        self.missing_type
    }

    /// Logical data bin with the highest training count. Histogram
    /// construction skips this bin; `Dataset::fix_histogram` restores it.
    pub fn most_freq_bin(&self) -> BinIndex {
        self.most_freq_bin
    }

    /// Whether this feature cannot ever be split on.
    pub fn is_trivial(&self) -> bool {
        self.num_bin < 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_value_boundaries() {
        let values = vec![1.0, 1.0, 2.0, 2.0, 3.0];
        let mapper = BinMapper::new_numerical(&values, 255, MissingType::None).unwrap();
        assert_eq!(mapper.num_bin(), 3);
        assert_eq!(mapper.value_to_data_bin(1.0), 0);
        assert_eq!(mapper.value_to_data_bin(1.6), 1);
        assert_eq!(mapper.value_to_data_bin(2.0), 1);
        assert_eq!(mapper.value_to_data_bin(100.0), 2);
    }

    #[test]
    fn test_quantile_boundaries_cap_bin_count() {
        let values: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let mapper = BinMapper::new_numerical(&values, 16, MissingType::None).unwrap();
        assert!(mapper.num_bin() <= 16);
        assert!(mapper.num_bin() >= 2);
        // Bins are ordered
        let lo = mapper.value_to_data_bin(3.0);
        let hi = mapper.value_to_data_bin(900.0);
        assert!(lo < hi);
    }

    #[test]
    fn test_nan_goes_to_sentinel() {
        let values = vec![1.0, 2.0, f64::NAN, 3.0];
        let mapper = BinMapper::new_numerical(&values, 255, MissingType::NaN).unwrap();
        assert_eq!(mapper.stored_bin(f64::NAN), NAN_SENTINEL);
        assert_eq!(mapper.stored_bin(1.0), HIST_OFFSET);
    }

    #[test]
    fn test_zero_as_missing() {
        let values = vec![0.0, 1.0, 0.0, 2.0];
        let mapper = BinMapper::new_numerical(&values, 255, MissingType::Zero).unwrap();
        assert_eq!(mapper.stored_bin(0.0), ZERO_SENTINEL);
        assert_eq!(mapper.num_bin(), 2);
    }

    #[test]
    fn test_constant_feature_is_trivial() {
        let values = vec![5.0; 10];
        let mapper = BinMapper::new_numerical(&values, 255, MissingType::None).unwrap();
        assert!(mapper.is_trivial());
    }

    #[test]
    fn test_most_freq_bin() {
        let values = vec![1.0, 1.0, 1.0, 2.0, 3.0];
        let mapper = BinMapper::new_numerical(&values, 255, MissingType::None).unwrap();
        assert_eq!(mapper.most_freq_bin(), 0);
    }

    #[test]
    fn test_categorical_mapping() {
        let values = vec![7.0, 7.0, 3.0, 3.0, 3.0, 11.0];
        let mapper = BinMapper::new_categorical(&values, 255).unwrap();
        assert_eq!(mapper.num_bin(), 3);
        // Most frequent category occupies bin 0
        assert_eq!(mapper.stored_bin(3.0), HIST_OFFSET);
        assert_eq!(mapper.real_threshold(0), 3.0);
        // Unseen category behaves like missing
        assert_eq!(mapper.stored_bin(99.0), NAN_SENTINEL);
    }

    #[test]
    fn test_threshold_roundtrip() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        let mapper = BinMapper::new_numerical(&values, 255, MissingType::None).unwrap();
        let bin = mapper.bin_threshold(2.4);
        assert_eq!(bin, mapper.value_to_data_bin(2.4));
        assert!(mapper.real_threshold(bin) >= 2.4);
    }
}
