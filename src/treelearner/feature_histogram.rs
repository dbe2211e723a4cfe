//! Per-feature best-threshold search over leaf histograms.
//!
//! All searches operate on one feature's stored histogram region (sentinels
//! included) together with the owning leaf's totals. Missing mass is never
//! read from the sentinels directly; it is the leaf totals minus the data
//! bins, which also covers examples whose bin was skipped by a stale
//! region. Candidates are evaluated left to right and only a strictly
//! better gain replaces the incumbent, so equal-gain ties resolve to the
//! smaller threshold and, across the two default directions, to
//! `default_left = true`.

use crate::core::constants::{HIST_OFFSET, K_EPSILON, K_MIN_SCORE};
use crate::core::types::{BinIndex, DataSize};
use crate::config::Config;
use crate::dataset::binning::{BinType, MissingType};
use crate::dataset::dataset::HistEntry;
use crate::treelearner::constraints::ConstraintEntry;
use crate::treelearner::split_info::SplitInfo;

/// The slice of the configuration the threshold search reads.
#[derive(Debug, Clone)]
pub struct SplitParams {
    pub lambda_l1: f64,
    pub lambda_l2: f64,
    pub max_delta_step: f64,
    pub min_gain_to_split: f64,
    pub min_data_in_leaf: DataSize,
    pub min_sum_hessian_in_leaf: f64,
    pub max_cat_threshold: usize,
    pub max_cat_to_onehot: usize,
    pub cat_smooth: f64,
    pub cat_l2: f64,
}

impl SplitParams {
    /// Extract the search parameters from a configuration snapshot.
    pub fn from_config(config: &Config) -> Self {
        SplitParams {
            lambda_l1: config.lambda_l1,
            lambda_l2: config.lambda_l2,
            max_delta_step: config.max_delta_step,
            min_gain_to_split: config.min_split_gain,
            min_data_in_leaf: config.min_data_in_leaf,
            min_sum_hessian_in_leaf: config.min_sum_hessian_in_leaf,
            max_cat_threshold: config.max_cat_threshold,
            max_cat_to_onehot: config.max_cat_to_onehot,
            cat_smooth: config.cat_smooth,
            cat_l2: config.cat_l2,
        }
    }
}

/// Static description of one inner feature, fixed at learner init.
#[derive(Debug, Clone)]
pub struct FeatureMeta {
    /// Number of logical data bins
    pub num_bin: usize,
    /// Numerical or categorical
    pub bin_type: BinType,
    /// Missing-value encoding
    pub missing_type: MissingType,
    /// Monotone direction of the feature (-1, 0, +1)
    pub monotone_type: i8,
}

#[inline]
fn threshold_l1(s: f64, l1: f64) -> f64 {
    let reg_s = s.abs() - l1;
    if reg_s <= 0.0 {
        0.0
    } else if s > 0.0 {
        reg_s
    } else {
        -reg_s
    }
}

/// Optimal leaf output for the given sums, clipped by `max_delta_step`.
pub fn calculate_splitted_leaf_output(
    sum_gradient: f64,
    sum_hessian: f64,
    params: &SplitParams,
) -> f64 {
    calculate_leaf_output(sum_gradient, sum_hessian, params, params.lambda_l2)
}

fn calculate_leaf_output(sum_gradient: f64, sum_hessian: f64, params: &SplitParams, l2: f64) -> f64 {
    let denominator = (sum_hessian + l2).max(K_EPSILON);
    let output = threshold_l1(sum_gradient, params.lambda_l1) / denominator;
    if params.max_delta_step > 0.0 {
        output.clamp(-params.max_delta_step, params.max_delta_step)
    } else {
        output
    }
}

fn constrained_leaf_output(
    sum_gradient: f64,
    sum_hessian: f64,
    params: &SplitParams,
    l2: f64,
    constraint: &ConstraintEntry,
) -> f64 {
    calculate_leaf_output(sum_gradient, sum_hessian, params, l2).clamp(constraint.min, constraint.max)
}

/// Loss reduction contributed by a leaf holding the given sums, evaluated
/// at a fixed output value.
fn leaf_gain_given_output(sum_gradient: f64, sum_hessian: f64, params: &SplitParams, l2: f64, output: f64) -> f64 {
    let reg_g = threshold_l1(sum_gradient, params.lambda_l1);
    2.0 * reg_g * output - (sum_hessian + l2) * output * output
}

/// Unconstrained leaf gain, the `score` term of the split criterion.
fn leaf_gain(sum_gradient: f64, sum_hessian: f64, params: &SplitParams, l2: f64) -> f64 {
    if params.max_delta_step <= 0.0 {
        let reg_g = threshold_l1(sum_gradient, params.lambda_l1);
        reg_g * reg_g / (sum_hessian + l2).max(K_EPSILON)
    } else {
        let output = calculate_leaf_output(sum_gradient, sum_hessian, params, l2);
        leaf_gain_given_output(sum_gradient, sum_hessian, params, l2, output)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BinStats {
    sum_gradient: f64,
    sum_hessian: f64,
    count: DataSize,
}

impl BinStats {
    #[inline]
    fn add(&mut self, entry: &HistEntry) {
        self.sum_gradient += entry.sum_gradient;
        self.sum_hessian += entry.sum_hessian;
        self.count += entry.count;
    }
}

#[inline]
fn data_bin(hist: &[HistEntry], logical: usize) -> &HistEntry {
    &hist[logical + HIST_OFFSET as usize]
}

/// Gain of a (left, right) candidate under the leaf's constraint entry.
/// Returns `None` when the candidate violates the monotone direction.
fn split_gain(
    left: &BinStats,
    right: &BinStats,
    params: &SplitParams,
    l2: f64,
    constraint: &ConstraintEntry,
    monotone_type: i8,
) -> Option<(f64, f64, f64)> {
    let left_output = constrained_leaf_output(left.sum_gradient, left.sum_hessian, params, l2, constraint);
    let right_output =
        constrained_leaf_output(right.sum_gradient, right.sum_hessian, params, l2, constraint);
    if monotone_type > 0 && left_output > right_output {
        return None;
    }
    if monotone_type < 0 && left_output < right_output {
        return None;
    }
    let gain = leaf_gain_given_output(left.sum_gradient, left.sum_hessian, params, l2, left_output)
        + leaf_gain_given_output(right.sum_gradient, right.sum_hessian, params, l2, right_output);
    Some((gain, left_output, right_output))
}

/// Find the best threshold of one feature.
///
/// # Arguments
/// * `hist` - The feature's stored histogram region, already fixed
/// * `meta` - Feature description
/// * `params` - Search parameters
/// * `sum_gradient`, `sum_hessian`, `num_data` - Leaf totals
/// * `constraint` - The leaf's inherited output bounds
/// * `out` - Receives the winning candidate; untouched fields keep their
///   reset state when nothing qualifies
///
/// Returns whether any candidate passed the count and hessian gates. A
/// leaf/feature pair that returns `false` can never become splittable again
/// and is skipped in descendants.
pub fn find_best_threshold(
    hist: &[HistEntry],
    meta: &FeatureMeta,
    params: &SplitParams,
    sum_gradient: f64,
    sum_hessian: f64,
    num_data: DataSize,
    constraint: ConstraintEntry,
    out: &mut SplitInfo,
) -> bool {
    match meta.bin_type {
        BinType::Numerical => find_best_threshold_numerical(
            hist,
            meta,
            params,
            sum_gradient,
            sum_hessian,
            num_data,
            constraint,
            out,
        ),
        BinType::Categorical => find_best_threshold_categorical(
            hist,
            meta,
            params,
            sum_gradient,
            sum_hessian,
            num_data,
            constraint,
            out,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn find_best_threshold_numerical(
    hist: &[HistEntry],
    meta: &FeatureMeta,
    params: &SplitParams,
    sum_gradient: f64,
    sum_hessian: f64,
    num_data: DataSize,
    constraint: ConstraintEntry,
    out: &mut SplitInfo,
) -> bool {
    let l2 = params.lambda_l2;
    let gain_shift = leaf_gain(sum_gradient, sum_hessian, params, l2);
    let min_gain_shift = gain_shift + params.min_gain_to_split;

    let mut data_total = BinStats::default();
    for logical in 0..meta.num_bin {
        data_total.add(data_bin(hist, logical));
    }
    let missing = BinStats {
        sum_gradient: sum_gradient - data_total.sum_gradient,
        sum_hessian: sum_hessian - data_total.sum_hessian,
        count: num_data - data_total.count,
    };

    let mut is_splittable = false;
    let mut best_gain = K_MIN_SCORE;
    let mut best = None;

    let directions: &[bool] = if missing.count > 0 { &[true, false] } else { &[true] };
    for &default_left in directions {
        let mut left = if default_left { missing } else { BinStats::default() };
        for t in 0..meta.num_bin.saturating_sub(1) {
            left.add(data_bin(hist, t));
            let right = BinStats {
                sum_gradient: sum_gradient - left.sum_gradient,
                sum_hessian: sum_hessian - left.sum_hessian,
                count: num_data - left.count,
            };
            if left.count < params.min_data_in_leaf
                || left.sum_hessian < params.min_sum_hessian_in_leaf
            {
                continue;
            }
            if right.count < params.min_data_in_leaf
                || right.sum_hessian < params.min_sum_hessian_in_leaf
            {
                // The right side only shrinks from here on.
                break;
            }
            is_splittable = true;
            let Some((gain, left_output, right_output)) =
                split_gain(&left, &right, params, l2, &constraint, meta.monotone_type)
            else {
                continue;
            };
            if gain <= min_gain_shift {
                continue;
            }
            if gain > best_gain {
                best_gain = gain;
                best = Some((t as BinIndex, default_left, left, right, left_output, right_output));
            }
        }
    }

    if let Some((threshold, default_left, left, right, left_output, right_output)) = best {
        out.threshold = threshold;
        out.default_left = default_left;
        out.gain = best_gain - min_gain_shift;
        out.left_count = left.count;
        out.right_count = right.count;
        out.left_sum_gradient = left.sum_gradient;
        out.left_sum_hessian = left.sum_hessian;
        out.right_sum_gradient = right.sum_gradient;
        out.right_sum_hessian = right.sum_hessian;
        out.left_output = left_output;
        out.right_output = right_output;
        out.num_cat_threshold = 0;
        out.cat_threshold.clear();
        out.monotone_type = meta.monotone_type;
    }
    is_splittable
}

#[allow(clippy::too_many_arguments)]
fn find_best_threshold_categorical(
    hist: &[HistEntry],
    meta: &FeatureMeta,
    params: &SplitParams,
    sum_gradient: f64,
    sum_hessian: f64,
    num_data: DataSize,
    constraint: ConstraintEntry,
    out: &mut SplitInfo,
) -> bool {
    let l2 = params.lambda_l2 + params.cat_l2;
    let gain_shift = leaf_gain(sum_gradient, sum_hessian, params, l2);
    let min_gain_shift = gain_shift + params.min_gain_to_split;

    let used_bins: Vec<usize> = (0..meta.num_bin)
        .filter(|&b| data_bin(hist, b).count > 0)
        .collect();
    if used_bins.len() < 2 {
        return false;
    }

    let mut is_splittable = false;
    let mut best_gain = K_MIN_SCORE;
    let mut best: Option<(Vec<BinIndex>, BinStats, BinStats, f64, f64)> = None;

    let consider = |subset: &[usize],
                        left: BinStats,
                        is_splittable: &mut bool,
                        best_gain: &mut f64,
                        best: &mut Option<(Vec<BinIndex>, BinStats, BinStats, f64, f64)>| {
        let right = BinStats {
            sum_gradient: sum_gradient - left.sum_gradient,
            sum_hessian: sum_hessian - left.sum_hessian,
            count: num_data - left.count,
        };
        if left.count < params.min_data_in_leaf
            || left.sum_hessian < params.min_sum_hessian_in_leaf
            || right.count < params.min_data_in_leaf
            || right.sum_hessian < params.min_sum_hessian_in_leaf
        {
            return;
        }
        *is_splittable = true;
        let Some((gain, left_output, right_output)) =
            split_gain(&left, &right, params, l2, &constraint, 0)
        else {
            return;
        };
        if gain <= min_gain_shift || gain <= *best_gain {
            return;
        }
        *best_gain = gain;
        *best = Some((
            subset.iter().map(|&b| b as BinIndex).collect(),
            left,
            right,
            left_output,
            right_output,
        ));
    };

    if meta.num_bin <= params.max_cat_to_onehot {
        // One-vs-rest: each used category alone on the left.
        for &b in &used_bins {
            let mut left = BinStats::default();
            left.add(data_bin(hist, b));
            consider(&[b], left, &mut is_splittable, &mut best_gain, &mut best);
        }
    } else {
        // Order categories by regularized gradient ratio, then grow one side
        // greedily from either end of the ordering.
        let mut sorted = used_bins.clone();
        sorted.sort_by(|&a, &b| {
            let ka = data_bin(hist, a);
            let kb = data_bin(hist, b);
            let ra = ka.sum_gradient / (ka.sum_hessian + params.cat_smooth);
            let rb = kb.sum_gradient / (kb.sum_hessian + params.cat_smooth);
            ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
        });
        let max_num_cat = params.max_cat_threshold.min((sorted.len() + 1) / 2).max(1);
        for forward in [true, false] {
            let mut left = BinStats::default();
            let mut subset: Vec<usize> = Vec::with_capacity(max_num_cat);
            for k in 0..max_num_cat {
                let b = if forward {
                    sorted[k]
                } else {
                    sorted[sorted.len() - 1 - k]
                };
                left.add(data_bin(hist, b));
                subset.push(b);
                consider(&subset, left, &mut is_splittable, &mut best_gain, &mut best);
            }
        }
    }

    if let Some((subset, left, right, left_output, right_output)) = best {
        out.threshold = 0;
        out.default_left = false;
        out.gain = best_gain - min_gain_shift;
        out.left_count = left.count;
        out.right_count = right.count;
        out.left_sum_gradient = left.sum_gradient;
        out.left_sum_hessian = left.sum_hessian;
        out.right_sum_gradient = right.sum_gradient;
        out.right_sum_hessian = right.sum_hessian;
        out.left_output = left_output;
        out.right_output = right_output;
        out.num_cat_threshold = subset.len();
        out.cat_threshold = subset;
        out.monotone_type = 0;
    }
    is_splittable
}

/// Score one fixed threshold of a feature, used by forced splits.
///
/// Both default directions are evaluated and the better one kept. No
/// count gates are applied; the caller decides what to do with a negative
/// gain.
#[allow(clippy::too_many_arguments)]
pub fn gather_info_for_threshold(
    hist: &[HistEntry],
    meta: &FeatureMeta,
    params: &SplitParams,
    sum_gradient: f64,
    sum_hessian: f64,
    num_data: DataSize,
    threshold: BinIndex,
    constraint: ConstraintEntry,
    out: &mut SplitInfo,
) {
    match meta.bin_type {
        BinType::Numerical => {
            let l2 = params.lambda_l2;
            let gain_shift = leaf_gain(sum_gradient, sum_hessian, params, l2);
            let min_gain_shift = gain_shift + params.min_gain_to_split;

            let mut data_total = BinStats::default();
            for logical in 0..meta.num_bin {
                data_total.add(data_bin(hist, logical));
            }
            let missing = BinStats {
                sum_gradient: sum_gradient - data_total.sum_gradient,
                sum_hessian: sum_hessian - data_total.sum_hessian,
                count: num_data - data_total.count,
            };

            let mut best_gain = K_MIN_SCORE;
            let directions: &[bool] = if missing.count > 0 { &[true, false] } else { &[true] };
            for &default_left in directions {
                let mut left = if default_left { missing } else { BinStats::default() };
                for t in 0..=(threshold as usize).min(meta.num_bin.saturating_sub(1)) {
                    left.add(data_bin(hist, t));
                }
                let right = BinStats {
                    sum_gradient: sum_gradient - left.sum_gradient,
                    sum_hessian: sum_hessian - left.sum_hessian,
                    count: num_data - left.count,
                };
                let Some((gain, left_output, right_output)) =
                    split_gain(&left, &right, params, l2, &constraint, meta.monotone_type)
                else {
                    continue;
                };
                if gain <= best_gain {
                    continue;
                }
                best_gain = gain;
                out.threshold = threshold;
                out.default_left = default_left;
                out.gain = gain - min_gain_shift;
                out.left_count = left.count;
                out.right_count = right.count;
                out.left_sum_gradient = left.sum_gradient;
                out.left_sum_hessian = left.sum_hessian;
                out.right_sum_gradient = right.sum_gradient;
                out.right_sum_hessian = right.sum_hessian;
                out.left_output = left_output;
                out.right_output = right_output;
                out.num_cat_threshold = 0;
                out.cat_threshold.clear();
                out.monotone_type = meta.monotone_type;
            }
        }
        BinType::Categorical => {
            // A forced categorical node splits one category against the rest.
            let l2 = params.lambda_l2 + params.cat_l2;
            let gain_shift = leaf_gain(sum_gradient, sum_hessian, params, l2);
            let min_gain_shift = gain_shift + params.min_gain_to_split;
            let mut left = BinStats::default();
            left.add(data_bin(hist, threshold as usize));
            let right = BinStats {
                sum_gradient: sum_gradient - left.sum_gradient,
                sum_hessian: sum_hessian - left.sum_hessian,
                count: num_data - left.count,
            };
            if let Some((gain, left_output, right_output)) =
                split_gain(&left, &right, params, l2, &constraint, 0)
            {
                out.threshold = 0;
                out.default_left = false;
                out.gain = gain - min_gain_shift;
                out.left_count = left.count;
                out.right_count = right.count;
                out.left_sum_gradient = left.sum_gradient;
                out.left_sum_hessian = left.sum_hessian;
                out.right_sum_gradient = right.sum_gradient;
                out.right_sum_hessian = right.sum_hessian;
                out.left_output = left_output;
                out.right_output = right_output;
                out.num_cat_threshold = 1;
                out.cat_threshold = vec![threshold];
                out.monotone_type = 0;
            }
        }
    }
}

/// Subtract a sibling histogram in place: `larger -= smaller`, slot by slot.
pub fn subtract_histogram(larger: &mut [HistEntry], smaller: &[HistEntry]) {
    for (l, s) in larger.iter_mut().zip(smaller) {
        l.sub_entry(s);
    }
}
