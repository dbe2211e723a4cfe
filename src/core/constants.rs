//! System constants and default configuration values.

use crate::core::types::DataSize;

/// Sentinel gain marking a split candidate as not viable.
pub const K_MIN_SCORE: f64 = f64::NEG_INFINITY;

/// Floor applied to hessian sums before division in output computation.
pub const K_EPSILON: f64 = 1e-15;

/// Number of sentinel bins preceding the data bins of every feature
/// histogram. Sentinel 0 collects zero-coded missing values, sentinel 1
/// collects NaN-coded missing values.
pub const HIST_OFFSET: u32 = 2;

/// Default maximum number of bins for feature discretization.
pub const DEFAULT_MAX_BIN: usize = 255;

/// Default minimum number of examples required in a leaf.
pub const DEFAULT_MIN_DATA_IN_LEAF: DataSize = 20;

/// Default minimum hessian mass required in a leaf.
pub const DEFAULT_MIN_SUM_HESSIAN_IN_LEAF: f64 = 1e-3;

/// Default number of leaves for each tree.
pub const DEFAULT_NUM_LEAVES: usize = 31;

/// Default maximum tree depth. Non-positive means unbounded.
pub const DEFAULT_MAX_DEPTH: i32 = -1;

/// Default histogram pool budget in MiB. Non-positive means unbounded.
pub const DEFAULT_HISTOGRAM_POOL_SIZE: f64 = -1.0;

/// Default number of categorical bins searched one-vs-rest before switching
/// to the sorted-subset scan.
pub const DEFAULT_MAX_CAT_TO_ONEHOT: usize = 4;

/// Default cap on the number of categories collected on one side of a
/// categorical split.
pub const DEFAULT_MAX_CAT_THRESHOLD: usize = 32;

/// Default smoothing term for the categorical bin ordering statistic.
pub const DEFAULT_CAT_SMOOTH: f64 = 10.0;

/// Default extra L2 regularization applied to categorical splits.
pub const DEFAULT_CAT_L2: f64 = 10.0;
