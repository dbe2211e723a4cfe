//! Binned dataset, feature discretization, and the per-leaf data partition.

pub mod binning;
#[allow(clippy::module_inception)]
pub mod dataset;
pub mod partition;

pub use binning::{BinMapper, BinType, MissingType};
pub use dataset::{Dataset, HistEntry, HistogramLayout, SplitThreshold, TrainShareState};
pub use partition::DataPartition;
