//! Core data types for the leafwise tree learner.
//!
//! These aliases pin the numeric widths used throughout the crate: example
//! indices are 32-bit, per-example gradient statistics are single precision,
//! and histogram accumulation is double precision for numerical stability.

/// Example indexing type. 32-bit integer supporting up to 2 billion examples.
pub type DataSize = i32;

/// Gradient and hessian value type for per-example statistics.
pub type Score = f32;

/// Target value and sample weight type.
pub type Label = f32;

/// Histogram accumulation type.
pub type Hist = f64;

/// Bin index type for discretized feature values.
pub type BinIndex = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(std::mem::size_of::<DataSize>(), 4);
        assert_eq!(std::mem::size_of::<Score>(), 4);
        assert_eq!(std::mem::size_of::<Hist>(), 8);
        assert_eq!(std::mem::size_of::<BinIndex>(), 4);
    }
}
