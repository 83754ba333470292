//! Error type shared by every fallible entry point of the crate.

use thiserror::Error;

/// Everything that can go wrong before a GEMM starts computing.
///
/// The numeric pipeline itself cannot fail; all variants describe a
/// precondition the caller violated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GemmError {
    #[error("LHS is {lhs_rows}x{lhs_cols} but RHS is {rhs_rows}x{rhs_cols}: inner dimensions differ")]
    ShapeMismatch {
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_rows: usize,
        rhs_cols: usize,
    },

    #[error("result is {actual_rows}x{actual_cols}, expected {expected_rows}x{expected_cols}")]
    DimensionMismatch {
        expected_rows: usize,
        expected_cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    #[error("result_shift must be in 1..=31, got {0}")]
    InvalidShift(i32),

    #[error("stride {stride} is smaller than the line length {min}")]
    InvalidStride { stride: usize, min: usize },

    #[error("buffer holds {len} elements but the view addresses {required}")]
    BufferTooSmall { len: usize, required: usize },

    #[error("invalid kernel format: {0}")]
    InvalidFormat(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported storage order: {0}")]
    UnsupportedOrder(String),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl From<rayon::ThreadPoolBuildError> for GemmError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        GemmError::ThreadPool(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GemmError>;
