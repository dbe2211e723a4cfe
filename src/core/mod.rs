//! Core types, constants, errors, and collaborator contracts.

pub mod constants;
pub mod error;
pub mod network;
pub mod objective;
pub mod types;
pub mod utils;

pub use error::{LeafwiseError, Result};
