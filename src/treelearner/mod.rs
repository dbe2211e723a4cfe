//! The serial leaf-wise tree learner and its supporting machinery.

pub mod cegb;
pub mod col_sampler;
pub mod constraints;
pub mod feature_histogram;
pub mod forced_splits;
pub mod histogram_pool;
pub mod leaf_splits;
pub mod serial;
pub mod split_info;

pub use forced_splits::ForcedSplit;
pub use serial::SerialTreeLearner;
pub use split_info::SplitInfo;
