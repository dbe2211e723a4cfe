//! Forced-split templates.
//!
//! A template is a small tree of `(feature, threshold)` pairs supplied by
//! the caller. The learner applies it breadth-first before free growth,
//! dropping the remainder of the template as soon as a forced node scores a
//! negative gain.

use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One node of a forced-split template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcedSplit {
    /// Real feature index to split on
    pub feature: usize,
    /// Real-valued threshold; for categorical features the category value
    /// put alone on the left side
    pub threshold: f64,
    /// Template for the left child
    #[serde(default)]
    pub left: Option<Box<ForcedSplit>>,
    /// Template for the right child
    #[serde(default)]
    pub right: Option<Box<ForcedSplit>>,
}

impl ForcedSplit {
    /// Parse a template from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a template from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
