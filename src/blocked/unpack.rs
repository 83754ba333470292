//! Unpacking: fold offsets into raw accumulators, requantize, store bytes.

use crate::matrix::{MapOrder, MatrixViewMut};
use crate::params::QuantizationParams;

/// Applies `result_offset`, the multiplier, the rounding shift and the
/// `0..=255` clamp to one finished accumulator.
#[inline]
pub fn requantize(acc: i32, params: &QuantizationParams) -> u8 {
    let raw = acc
        .wrapping_add(params.result_offset)
        .wrapping_mul(params.result_mult_int)
        .wrapping_add(params.rounding_bias())
        >> params.result_shift;
    raw.clamp(0, 255) as u8
}

/// Raw products of one block plus the sums needed to add the offsets.
#[derive(Debug, Clone, Copy)]
pub struct BlockAccumulators<'a> {
    /// Row-major `sum(lhs * rhs)` tiles, `stride` apart.
    pub raw: &'a [i32],
    pub stride: usize,
    /// Per-row sums of the LHS block.
    pub lhs_sums: &'a [i32],
    /// Per-column sums of the RHS block.
    pub rhs_sums: &'a [i32],
    /// Full (unpadded) depth of the product.
    pub depth: usize,
}

/// Writes the requantized block into `result`.
///
/// Uses the identity
/// `sum((a + oa)(b + ob)) = sum(ab) + ob*sum(a) + oa*sum(b) + depth*oa*ob`,
/// evaluated with wrapping arithmetic so it agrees with the reference
/// modulo 2^32. Only the `result.rows() x result.cols()` area is written;
/// padding in `raw` is ignored. Writes follow the result's storage order.
pub fn unpack_block(
    result: &mut MatrixViewMut<'_, u8>,
    acc: &BlockAccumulators<'_>,
    params: &QuantizationParams,
) {
    let (rows, cols) = (result.rows(), result.cols());
    let constant = (acc.depth as i32)
        .wrapping_mul(params.lhs_offset)
        .wrapping_mul(params.rhs_offset);

    let coefficient = |r: usize, c: usize| {
        let total = acc.raw[r * acc.stride + c]
            .wrapping_add(params.rhs_offset.wrapping_mul(acc.lhs_sums[r]))
            .wrapping_add(params.lhs_offset.wrapping_mul(acc.rhs_sums[c]))
            .wrapping_add(constant);
        requantize(total, params)
    };

    match result.order() {
        MapOrder::RowMajor => {
            for r in 0..rows {
                for c in 0..cols {
                    result.set(r, c, coefficient(r, c));
                }
            }
        }
        MapOrder::ColMajor => {
            for c in 0..cols {
                for r in 0..rows {
                    result.set(r, c, coefficient(r, c));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;

    #[test]
    fn test_requantize_rounding_and_clamp() {
        let params = QuantizationParams::new(0, 0, 0, 1, 16);
        assert_eq!(requantize(65025, &params), 1);
        assert_eq!(requantize(32767, &params), 0);
        assert_eq!(requantize(32768, &params), 1);

        let params = QuantizationParams::new(0, 0, 0, 1, 1);
        assert_eq!(requantize(200, &params), 100);
        assert_eq!(requantize(511, &params), 255);
        assert_eq!(requantize(10_000, &params), 255);
        assert_eq!(requantize(-3, &params), 0);
        // round half up, not half to even: (-1 + 1) >> 1 = 0
        assert_eq!(requantize(-1, &params), 0);
    }

    #[test]
    fn test_requantize_offset_and_multiplier() {
        let params = QuantizationParams::new(0, 0, 10, 3, 2);
        // ((5 + 10) * 3 + 2) >> 2 = 47 >> 2 = 11
        assert_eq!(requantize(5, &params), 11);
    }

    #[test]
    fn test_unpack_applies_offsets_and_skips_padding() {
        // 1x2 product with depth 2: lhs = [1, 2], rhs = [[3, 4], [5, 6]]
        let raw = [11, 17, -99, -99];
        let acc = BlockAccumulators {
            raw: &raw,
            stride: 4,
            lhs_sums: &[3],
            rhs_sums: &[7, 11],
            depth: 2,
        };
        let params = QuantizationParams::new(1, -2, 0, 1, 1);
        let mut out = Matrix::<u8>::new(1, 2, MapOrder::ColMajor);
        unpack_block(&mut out.view_mut(), &acc, &params);

        // (1+1)(3-2) + (2+1)(4-2) = 8, (1+1)(5-2) + (2+1)(6-2) = 18
        assert_eq!(out.get(0, 0), 4);
        assert_eq!(out.get(0, 1), 9);
    }
}
