//! Quantization parameters and argument validation shared by every GEMM
//! entry point.

use crate::error::{GemmError, Result};
use crate::matrix::{MatrixView, MatrixViewMut};

/// Offsets, multiplier and shift of one quantized product.
///
/// For each output coefficient:
///
/// ```text
/// acc = sum_l (lhs[i,l] + lhs_offset) * (rhs[l,j] + rhs_offset)
/// raw = ((acc + result_offset) * result_mult_int + (1 << (result_shift - 1))) >> result_shift
/// out = clamp(raw, 0, 255)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuantizationParams {
    pub lhs_offset: i32,
    pub rhs_offset: i32,
    pub result_offset: i32,
    pub result_mult_int: i32,
    pub result_shift: i32,
}

impl QuantizationParams {
    pub fn new(
        lhs_offset: i32,
        rhs_offset: i32,
        result_offset: i32,
        result_mult_int: i32,
        result_shift: i32,
    ) -> Self {
        Self {
            lhs_offset,
            rhs_offset,
            result_offset,
            result_mult_int,
            result_shift,
        }
    }

    pub fn with_shift(self, result_shift: i32) -> Self {
        Self {
            result_shift,
            ..self
        }
    }

    /// Shifts outside `1..=31` have no rounding bias or shift everything out.
    pub fn validate(&self) -> Result<()> {
        if !(1..=31).contains(&self.result_shift) {
            return Err(GemmError::InvalidShift(self.result_shift));
        }
        Ok(())
    }

    #[inline]
    pub fn rounding_bias(&self) -> i32 {
        1 << (self.result_shift - 1)
    }
}

/// Checks shapes and parameters of `result = lhs * rhs`.
pub fn check_gemm_args(
    lhs: &MatrixView<'_, u8>,
    rhs: &MatrixView<'_, u8>,
    result: &MatrixViewMut<'_, u8>,
    params: &QuantizationParams,
) -> Result<()> {
    if lhs.cols() != rhs.rows() {
        return Err(GemmError::ShapeMismatch {
            lhs_rows: lhs.rows(),
            lhs_cols: lhs.cols(),
            rhs_rows: rhs.rows(),
            rhs_cols: rhs.cols(),
        });
    }
    if result.rows() != lhs.rows() || result.cols() != rhs.cols() {
        return Err(GemmError::DimensionMismatch {
            expected_rows: lhs.rows(),
            expected_cols: rhs.cols(),
            actual_rows: result.rows(),
            actual_cols: result.cols(),
        });
    }
    params.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{MapOrder, Matrix};

    #[test]
    fn test_shift_range() {
        let params = QuantizationParams::new(0, 0, 0, 1, 1);
        assert!(params.validate().is_ok());
        assert_eq!(params.rounding_bias(), 1);
        assert_eq!(params.with_shift(16).rounding_bias(), 32768);
        assert!(params.with_shift(31).validate().is_ok());
        assert_eq!(
            params.with_shift(0).validate(),
            Err(GemmError::InvalidShift(0))
        );
        assert_eq!(
            params.with_shift(32).validate(),
            Err(GemmError::InvalidShift(32))
        );
    }

    #[test]
    fn test_shape_checks() {
        let lhs = Matrix::<u8>::new(2, 3, MapOrder::RowMajor);
        let rhs = Matrix::<u8>::new(3, 4, MapOrder::ColMajor);
        let bad_rhs = Matrix::<u8>::new(2, 4, MapOrder::ColMajor);
        let mut result = Matrix::<u8>::new(2, 4, MapOrder::ColMajor);
        let mut bad_result = Matrix::<u8>::new(4, 2, MapOrder::ColMajor);
        let params = QuantizationParams::new(0, 0, 0, 1, 8);

        assert!(check_gemm_args(&lhs.view(), &rhs.view(), &result.view_mut(), &params).is_ok());
        assert!(matches!(
            check_gemm_args(&lhs.view(), &bad_rhs.view(), &result.view_mut(), &params),
            Err(GemmError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            check_gemm_args(&lhs.view(), &rhs.view(), &bad_result.view_mut(), &params),
            Err(GemmError::DimensionMismatch { .. })
        ));
    }
}
