//! # leafwise
//!
//! A histogram-based, serial, leaf-wise decision tree learner for gradient
//! boosting. Given a pre-binned [`Dataset`] and per-example gradient and
//! hessian vectors, [`SerialTreeLearner`] grows one regression [`Tree`] at a
//! time by repeatedly splitting the leaf with the highest regularized gain.
//!
//! The learner keeps histogram work low with a bounded histogram pool and
//! the subtract trick (the larger child of a split inherits the parent's
//! histograms and is completed by subtraction), supports monotone
//! constraints, deterministic feature sampling, forced-split templates, and
//! cost-aware gain adjustment. Given identical inputs, thread count, and
//! seed, training is bit-identical across runs.
//!
//! ```
//! use leafwise::{ConfigBuilder, Dataset, SerialTreeLearner};
//! use ndarray::Array2;
//!
//! let features = Array2::from_shape_vec(
//!     (8, 1),
//!     vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0],
//! )
//! .unwrap();
//! let dataset = Dataset::from_matrix(features.view(), &[], 255).unwrap();
//! let config = ConfigBuilder::new()
//!     .num_leaves(2)
//!     .min_data_in_leaf(1)
//!     .build()
//!     .unwrap();
//! let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
//! let gradients = vec![-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
//! let hessians = vec![1.0; 8];
//! let tree = learner.train(&gradients, &hessians, None).unwrap();
//! assert_eq!(tree.num_leaves(), 2);
//! ```

pub mod config;
pub mod core;
pub mod dataset;
pub mod tree;
pub mod treelearner;

pub use crate::config::{Config, ConfigBuilder};
pub use crate::core::error::{LeafwiseError, Result};
pub use crate::core::network::{Network, SingleMachine};
pub use crate::core::objective::ObjectiveFunction;
pub use crate::dataset::{BinMapper, BinType, Dataset, MissingType};
pub use crate::tree::Tree;
pub use crate::treelearner::{ForcedSplit, SerialTreeLearner, SplitInfo};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
