//! The legacy `EightBitIntGemm` call convention.
//!
//! ```text
//! C (m x n, row-major, stride ldc) = A (m x k, row-major, stride lda)
//!                                  * B^T where B is n x k, row-major, stride ldb
//! ```
//!
//! i.e. `c[i * ldc + j] = requantize(sum_l (a[i * lda + l] + a_offset)
//! * (b[j * ldb + l] + b_offset))`. Internally this is the regular product
//! with `B` as a row-major LHS, `A` as a column-major RHS and `C` as a
//! column-major result, which is the order combination the kernels like.
//!
//! Calls share one process-wide [`GemmContext`], created on first use and
//! released by [`free_persistent_resources`].

use std::sync::Mutex;

use log::debug;

use crate::context::GemmContext;
use crate::error::Result;
use crate::matrix::{MapOrder, MatrixView, MatrixViewMut};
use crate::params::QuantizationParams;
use crate::try_gemm;

static PERSISTENT_CONTEXT: Mutex<Option<GemmContext>> = Mutex::new(None);

/// Quantized `C = A * B^T` in the legacy argument order.
///
/// # Errors
///
/// Fails if a stride is shorter than its row, a buffer is too short for
/// the given shape and stride, or `c_shift` is outside `1..=31`.
#[allow(clippy::too_many_arguments)]
pub fn try_eight_bit_int_gemm(
    m: usize,
    n: usize,
    k: usize,
    a: &[u8],
    a_offset: i32,
    lda: usize,
    b: &[u8],
    b_offset: i32,
    ldb: usize,
    c: &mut [u8],
    c_offset: i32,
    c_mult_int: i32,
    c_shift: i32,
    ldc: usize,
) -> Result<()> {
    let lhs = MatrixView::new(b, n, k, ldb, MapOrder::RowMajor)?;
    let rhs = MatrixView::new(a, k, m, lda, MapOrder::ColMajor)?;
    let mut result = MatrixViewMut::new(c, n, m, ldc, MapOrder::ColMajor)?;
    let params = QuantizationParams::new(b_offset, a_offset, c_offset, c_mult_int, c_shift);

    let mut guard = PERSISTENT_CONTEXT
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    let context = guard.get_or_insert_with(|| {
        debug!("creating persistent eight_bit_int_gemm context");
        GemmContext::new()
    });
    try_gemm(context, &lhs, &rhs, &mut result, &params)
}

/// Same as [`try_eight_bit_int_gemm`] but panics on bad arguments.
#[allow(clippy::too_many_arguments)]
pub fn eight_bit_int_gemm(
    m: usize,
    n: usize,
    k: usize,
    a: &[u8],
    a_offset: i32,
    lda: usize,
    b: &[u8],
    b_offset: i32,
    ldb: usize,
    c: &mut [u8],
    c_offset: i32,
    c_mult_int: i32,
    c_shift: i32,
    ldc: usize,
) {
    if let Err(err) = try_eight_bit_int_gemm(
        m, n, k, a, a_offset, lda, b, b_offset, ldb, c, c_offset, c_mult_int, c_shift, ldc,
    ) {
        panic!("eight_bit_int_gemm: {}", err);
    }
}

/// Drops the shared context, joining its worker threads. The next call
/// creates a fresh one.
pub fn free_persistent_resources() {
    let mut guard = PERSISTENT_CONTEXT
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    if guard.take().is_some() {
        debug!("released persistent eight_bit_int_gemm context");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GemmError;

    /// Straight from the definition, strides included.
    #[allow(clippy::too_many_arguments)]
    fn naive(
        m: usize,
        n: usize,
        k: usize,
        a: &[u8],
        a_offset: i32,
        lda: usize,
        b: &[u8],
        b_offset: i32,
        ldb: usize,
        c: &mut [u8],
        c_offset: i32,
        c_mult_int: i32,
        c_shift: i32,
        ldc: usize,
    ) {
        for i in 0..m {
            for j in 0..n {
                let mut total = 0i32;
                for l in 0..k {
                    let x = a[i * lda + l] as i32 + a_offset;
                    let y = b[j * ldb + l] as i32 + b_offset;
                    total = total.wrapping_add(x * y);
                }
                let raw = ((total + c_offset) * c_mult_int + (1 << (c_shift - 1))) >> c_shift;
                c[i * ldc + j] = raw.clamp(0, 255) as u8;
            }
        }
    }

    #[test]
    fn test_matches_definition_with_padded_strides() {
        let (m, n, k) = (13, 7, 21);
        let (lda, ldb, ldc) = (k + 3, k + 1, n + 5);
        let a: Vec<u8> = (0..m * lda).map(|i| (i * 37 % 251) as u8).collect();
        let b: Vec<u8> = (0..n * ldb).map(|i| (i * 91 % 241) as u8).collect();

        let mut expected = vec![7u8; m * ldc];
        naive(m, n, k, &a, -3, lda, &b, 5, ldb, &mut expected, 100, 3, 9, ldc);

        let mut got = vec![7u8; m * ldc];
        eight_bit_int_gemm(m, n, k, &a, -3, lda, &b, 5, ldb, &mut got, 100, 3, 9, ldc);

        assert_eq!(got, expected);
    }

    #[test]
    fn test_persistent_context_survives_free() {
        let a = [2u8, 3];
        let b = [4u8, 5];
        let mut c = [0u8];
        eight_bit_int_gemm(1, 1, 2, &a, 0, 2, &b, 0, 2, &mut c, 0, 1, 1, 1);
        // (8 + 15 + 1) >> 1
        assert_eq!(c[0], 12);

        free_persistent_resources();
        free_persistent_resources();

        c[0] = 0;
        eight_bit_int_gemm(1, 1, 2, &a, 0, 2, &b, 0, 2, &mut c, 0, 1, 1, 1);
        assert_eq!(c[0], 12);
    }

    #[test]
    fn test_rejects_short_buffers() {
        let a = [0u8; 3];
        let b = [0u8; 4];
        let mut c = [0u8; 4];
        let err = try_eight_bit_int_gemm(2, 2, 2, &a, 0, 2, &b, 0, 2, &mut c, 0, 1, 1, 2);
        assert!(matches!(err, Err(GemmError::BufferTooSmall { .. })));
    }
}
