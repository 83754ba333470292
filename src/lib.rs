//! Low-precision (8-bit) matrix multiplication in Rust.
//!
//! Operands are `u8` matrices with an integer offset added to every entry;
//! products accumulate in `i32` and are requantized back to `u8` with a
//! multiplier, a rounding right shift and saturation. Every path in this
//! crate produces exactly the bytes the scalar reference produces.
//!
//! The fast path is the usual recipe: cache blocking, packing into kernel
//! order, and an AVX2 micro-kernel. Offsets never reach the kernel; the
//! packer records row/column sums and the unpacker folds the offsets in.
//!
//! ## Usage
//!
//! ```
//! use lowp_gemm::{GemmContext, MapOrder, Matrix, QuantizationParams, gemm};
//!
//! let lhs = Matrix::<u8>::new(64, 32, MapOrder::RowMajor);
//! let rhs = Matrix::<u8>::new(32, 16, MapOrder::ColMajor);
//! let mut result = Matrix::<u8>::new(64, 16, MapOrder::ColMajor);
//!
//! let mut context = GemmContext::new();
//! let params = QuantizationParams::new(10, 10, 0, 1, 1);
//! gemm(&mut context, &lhs.view(), &rhs.view(), &mut result.view_mut(), &params);
//!
//! // 32 * (10 * 10) = 3200, halved and clamped
//! assert!(result.data().iter().all(|&v| v == 255));
//! ```
//!
//! [`try_gemm`] returns a [`GemmError`] instead of panicking. The legacy
//! `EightBitIntGemm` call convention lives in [`eight_bit_int_gemm`].
//!
//! ## What's inside
//!
//! - 12x4 AVX2 GEMM kernel, 8x1 AVX2 GEMV kernel, scalar fallback
//! - Cache blocking driven by [`GemmConfig`]
//! - Adaptive multi-threading on a rayon pool owned by the context
//! - A shift-bisection test harness ([`harness`]) behind the
//!   `lowp-gemm-test` binary

pub mod blocked;
pub mod config;
pub mod context;
pub mod eight_bit_int_gemm;
pub mod error;
pub mod harness;
pub mod kernels;
pub mod matrix;
pub mod params;
pub mod threaded;

pub use blocked::single_thread::single_thread_gemm;
pub use config::GemmConfig;
pub use context::GemmContext;
pub use error::{GemmError, Result};
pub use matrix::reference::{ReferenceContext, reference_gemm};
pub use matrix::{MapOrder, Matrix, MatrixView, MatrixViewMut};
pub use params::QuantizationParams;
pub use threaded::multi_thread::multi_thread_gemm;

use kernels::{Kernel, default_kernel_for_gemm, default_kernel_for_gemv};

/// Kernel [`try_gemm`] would use for a product with `cols` result columns.
pub fn default_kernel_for(cols: usize) -> &'static dyn Kernel {
    if cols == 1 {
        default_kernel_for_gemv()
    } else {
        default_kernel_for_gemm()
    }
}

/// Quantized matrix multiply: `result = requantize(lhs * rhs)`.
///
/// Picks the fastest kernel for your CPU (AVX2 > scalar), switching to the
/// GEMV kernel when the result is a single column, and spreads the work
/// over up to `context.max_threads()` threads. Any storage order works
/// for any of the three matrices.
///
/// # Errors
///
/// Fails if `lhs.cols() != rhs.rows()`, if `result` is not
/// `lhs.rows() x rhs.cols()`, or if `result_shift` is outside `1..=31`.
pub fn try_gemm(
    context: &mut GemmContext,
    lhs: &MatrixView<'_, u8>,
    rhs: &MatrixView<'_, u8>,
    result: &mut MatrixViewMut<'_, u8>,
    params: &QuantizationParams,
) -> Result<()> {
    let kernel = default_kernel_for(rhs.cols());
    multi_thread_gemm(context, kernel, lhs, rhs, result, params)
}

/// Same as [`try_gemm`] but panics on bad arguments.
///
/// # Panics
///
/// Panics with the diagnostic of the violated precondition.
pub fn gemm(
    context: &mut GemmContext,
    lhs: &MatrixView<'_, u8>,
    rhs: &MatrixView<'_, u8>,
    result: &mut MatrixViewMut<'_, u8>,
    params: &QuantizationParams,
) {
    if let Err(err) = try_gemm(context, lhs, rhs, result, params) {
        panic!("gemm: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemv_uses_gemv_kernel() {
        assert_eq!(default_kernel_for(1).format(), kernels::GEMV_FORMAT);
        assert_eq!(default_kernel_for(2).format(), kernels::GEMM_FORMAT);
    }

    #[test]
    #[should_panic(expected = "result_shift must be in 1..=31")]
    fn test_gemm_panics_on_bad_shift() {
        let lhs = Matrix::<u8>::new(2, 2, MapOrder::RowMajor);
        let rhs = Matrix::<u8>::new(2, 2, MapOrder::ColMajor);
        let mut result = Matrix::<u8>::new(2, 2, MapOrder::ColMajor);
        gemm(
            &mut GemmContext::new(),
            &lhs.view(),
            &rhs.view(),
            &mut result.view_mut(),
            &QuantizationParams::new(0, 0, 0, 1, 0),
        );
    }
}
