//! Scalar reference implementation of the quantized product.
//!
//! This is the textbook triple loop with the arithmetic written out exactly
//! as the contract states it. It is slow on purpose: every other code path
//! in the crate must match it byte for byte.

use crate::error::Result;
use crate::matrix::{MatrixView, MatrixViewMut};
use crate::params::{QuantizationParams, check_gemm_args};

/// Saturation counters of the last [`reference_gemm`] call.
///
/// The test harness uses them to decide whether a shift was too large
/// (many zeros) or too small (many 255s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceContext {
    /// Outputs whose raw value was below 0.
    pub saturated_0_values: usize,
    /// Outputs whose raw value was above 255.
    pub saturated_255_values: usize,
}

/// Computes `result = requantize(lhs * rhs)` one coefficient at a time.
///
/// Loops over columns, then rows, then depth. Any storage orders work.
/// Arithmetic wraps on 32 bits, the same way the optimised kernels do.
pub fn reference_gemm(
    context: &mut ReferenceContext,
    lhs: &MatrixView<'_, u8>,
    rhs: &MatrixView<'_, u8>,
    result: &mut MatrixViewMut<'_, u8>,
    params: &QuantizationParams,
) -> Result<()> {
    check_gemm_args(lhs, rhs, result, params)?;
    context.saturated_0_values = 0;
    context.saturated_255_values = 0;

    let (m, n, k) = (lhs.rows(), rhs.cols(), lhs.cols());
    for j in 0..n {
        for i in 0..m {
            let mut total: i32 = 0;
            for l in 0..k {
                let a = lhs.get(i, l) as i32 + params.lhs_offset;
                let b = rhs.get(l, j) as i32 + params.rhs_offset;
                total = total.wrapping_add(a.wrapping_mul(b));
            }
            let output = total
                .wrapping_add(params.result_offset)
                .wrapping_mul(params.result_mult_int)
                .wrapping_add(1 << (params.result_shift - 1))
                >> params.result_shift;

            let clamped = if output > 255 {
                context.saturated_255_values += 1;
                255
            } else if output < 0 {
                context.saturated_0_values += 1;
                0
            } else {
                output
            };
            result.set(i, j, clamped as u8);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{MapOrder, Matrix};

    fn run(
        lhs: &Matrix<u8>,
        rhs: &Matrix<u8>,
        params: QuantizationParams,
    ) -> (Matrix<u8>, ReferenceContext) {
        let mut result = Matrix::new(lhs.rows(), rhs.cols(), MapOrder::ColMajor);
        let mut context = ReferenceContext::default();
        reference_gemm(
            &mut context,
            &lhs.view(),
            &rhs.view(),
            &mut result.view_mut(),
            &params,
        )
        .unwrap();
        (result, context)
    }

    #[test]
    fn test_zero_inputs_do_not_count_as_saturated() {
        let lhs = Matrix::new(1, 1, MapOrder::RowMajor);
        let rhs = Matrix::new(1, 1, MapOrder::ColMajor);
        let (result, context) = run(&lhs, &rhs, QuantizationParams::new(0, 0, 0, 1, 1));
        assert_eq!(result.get(0, 0), 0);
        assert_eq!(context, ReferenceContext::default());
    }

    #[test]
    fn test_offsets_only() {
        let lhs = Matrix::new(2, 2, MapOrder::RowMajor);
        let rhs = Matrix::new(2, 2, MapOrder::ColMajor);
        let (result, _) = run(&lhs, &rhs, QuantizationParams::new(10, 10, 0, 1, 1));
        // acc = 2 * 10 * 10 = 200, (200 + 1) >> 1 = 100
        assert!(result.data().iter().all(|&v| v == 100));
    }

    #[test]
    fn test_round_half_up() {
        let lhs = Matrix::from_vec(vec![255], 1, 1, MapOrder::RowMajor).unwrap();
        let rhs = Matrix::from_vec(vec![255], 1, 1, MapOrder::ColMajor).unwrap();
        let (result, _) = run(&lhs, &rhs, QuantizationParams::new(0, 0, 0, 1, 16));
        // (65025 + 32768) >> 16 = 1
        assert_eq!(result.get(0, 0), 1);
    }

    #[test]
    fn test_saturation_counters() {
        let lhs = Matrix::from_vec(vec![255, 0], 2, 1, MapOrder::RowMajor).unwrap();
        let rhs = Matrix::from_vec(vec![255], 1, 1, MapOrder::ColMajor).unwrap();
        let (result, context) = run(&lhs, &rhs, QuantizationParams::new(0, 0, -10, 1, 1));
        assert_eq!(result.get(0, 0), 255);
        assert_eq!(result.get(1, 0), 0);
        assert_eq!(context.saturated_255_values, 1);
        assert_eq!(context.saturated_0_values, 1);
    }

    #[test]
    fn test_negative_offsets_match_hand_computation() {
        let lhs = Matrix::from_vec(vec![100, 200, 50], 1, 3, MapOrder::RowMajor).unwrap();
        let rhs = Matrix::from_vec(vec![30, 90, 250], 3, 1, MapOrder::ColMajor).unwrap();
        let params = QuantizationParams::new(-75, -91, 74980, 123, 20);
        let acc: i32 = (100 - 75) * (30 - 91) + (200 - 75) * (90 - 91) + (50 - 75) * (250 - 91);
        let raw = ((acc + 74980) * 123 + (1 << 19)) >> 20;
        let (result, _) = run(&lhs, &rhs, params);
        assert_eq!(result.get(0, 0) as i32, raw.clamp(0, 255));
    }
}
