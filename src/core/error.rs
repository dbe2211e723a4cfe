//! Error handling for the leafwise tree learner.
//!
//! All fallible operations in the crate return [`Result`]; configuration and
//! dataset problems are reported eagerly, collaborator errors propagate
//! unchanged and nothing is retried.

use std::io;
use thiserror::Error;

/// Main error type for the leafwise library.
#[derive(Error, Debug)]
pub enum LeafwiseError {
    /// Configuration and validation errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Dataset-related errors
    #[error("Dataset error: {message}")]
    Dataset { message: String },

    /// Training-related errors
    #[error("Training error: {message}")]
    Training { message: String },

    /// Invalid input parameters
    #[error("Invalid parameter: {parameter} = {value}, {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    /// Dimension mismatch errors
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    /// File I/O errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// JSON parsing errors (forced-split templates)
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl LeafwiseError {
    /// Create a configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        LeafwiseError::Config {
            message: message.into(),
        }
    }

    /// Create a dataset error.
    pub fn dataset<S: Into<String>>(message: S) -> Self {
        LeafwiseError::Dataset {
            message: message.into(),
        }
    }

    /// Create a training error.
    pub fn training<S: Into<String>>(message: S) -> Self {
        LeafwiseError::Training {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter<P, V, R>(parameter: P, value: V, reason: R) -> Self
    where
        P: Into<String>,
        V: Into<String>,
        R: Into<String>,
    {
        LeafwiseError::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch<E, A>(expected: E, actual: A) -> Self
    where
        E: Into<String>,
        A: Into<String>,
    {
        LeafwiseError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type alias for leafwise operations.
pub type Result<T> = std::result::Result<T, LeafwiseError>;
