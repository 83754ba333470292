//! 12×4 depth-2 AVX2 microkernel for 8-bit GEMM.

use super::{GEMM_FORMAT, Kernel, KernelFormat};

/// AVX2 kernel producing a 12×4 tile of `i32` accumulators.
///
/// Both sides use width-major 4×2 cells: every line contributes a pair of
/// consecutive depth values, which is exactly what `vpmaddwd` consumes.
/// Three LHS cells make the 12 rows, one RHS cell the 4 columns.
///
/// Only obtainable through [`Avx2Kernel12x4Depth2::detect`], so holding one
/// proves the CPU has AVX2.
#[derive(Debug)]
pub struct Avx2Kernel12x4Depth2 {
    _detected: (),
}

static KERNEL: Avx2Kernel12x4Depth2 = Avx2Kernel12x4Depth2 { _detected: () };

impl Avx2Kernel12x4Depth2 {
    pub fn detect() -> Option<&'static Self> {
        if is_x86_feature_detected!("avx2") {
            Some(&KERNEL)
        } else {
            None
        }
    }
}

impl Kernel for Avx2Kernel12x4Depth2 {
    fn name(&self) -> String {
        "Avx2Kernel12x4Depth2".to_string()
    }

    fn format(&self) -> KernelFormat {
        GEMM_FORMAT
    }

    fn run(&self, dst: &mut [i32], dst_stride: usize, lhs: &[u8], rhs: &[u8], depth: usize) {
        assert_eq!(depth % 2, 0, "depth {} is not a multiple of 2", depth);
        assert!(lhs.len() >= 12 * depth && rhs.len() >= 4 * depth);
        assert!(dst.len() >= 11 * dst_stride + 4);

        let mut tile = [0i32; 48];
        // SAFETY: AVX2 was detected when `self` was handed out, and the
        // slice lengths were checked above.
        unsafe { kernel_12x4_depth2_avx2(lhs.as_ptr(), rhs.as_ptr(), depth, &mut tile) };

        for (r, row) in tile.chunks_exact(4).enumerate() {
            let out = &mut dst[r * dst_stride..r * dst_stride + 4];
            for (acc, &v) in out.iter_mut().zip(row) {
                *acc = acc.wrapping_add(v);
            }
        }
    }
}

/// Computes a 12×4 tile: tile = LHS_packed × RHS_packed (raw products)
///
/// Per depth step the LHS holds 24 bytes (3 cells of 4 rows × 2 depths)
/// and the RHS 8 bytes (4 columns × 2 depths). Each byte pair widens to
/// one 32-bit lane of two `i16`s, so one `madd` yields two full rows of
/// the tile. Six YMM accumulators cover the 12 rows.
///
/// # Safety
///
/// Caller must ensure:
/// - CPU supports AVX2 (checked via `#[target_feature]`)
/// - `lhs` points to `12 * depth` packed bytes
/// - `rhs` points to `4 * depth` packed bytes
/// - `depth` is even
#[target_feature(enable = "avx2")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn kernel_12x4_depth2_avx2(lhs: *const u8, rhs: *const u8, depth: usize, tile: &mut [i32; 48]) {
    use std::arch::x86_64::*;

    // Lane selectors: row pair (0, 1) and row pair (2, 3) of a cell.
    let first_rows = _mm256_setr_epi32(0, 0, 0, 0, 1, 1, 1, 1);
    let second_rows = _mm256_setr_epi32(2, 2, 2, 2, 3, 3, 3, 3);

    // Two output rows per accumulator
    let mut c0 = _mm256_setzero_si256();
    let mut c1 = _mm256_setzero_si256();
    let mut c2 = _mm256_setzero_si256();
    let mut c3 = _mm256_setzero_si256();
    let mut c4 = _mm256_setzero_si256();
    let mut c5 = _mm256_setzero_si256();

    for step in 0..depth / 2 {
        let l = lhs.add(step * 24);
        let r = rhs.add(step * 8);

        // [col0 col1 col2 col3 | col0 col1 col2 col3], each a depth pair
        let b = _mm256_broadcastsi128_si256(_mm_cvtepu8_epi16(_mm_loadl_epi64(r as *const __m128i)));

        let a0 = _mm256_broadcastsi128_si256(_mm_cvtepu8_epi16(_mm_loadl_epi64(l as *const __m128i)));
        let a1 = _mm256_broadcastsi128_si256(_mm_cvtepu8_epi16(_mm_loadl_epi64(l.add(8) as *const __m128i)));
        let a2 = _mm256_broadcastsi128_si256(_mm_cvtepu8_epi16(_mm_loadl_epi64(l.add(16) as *const __m128i)));

        c0 = _mm256_add_epi32(c0, _mm256_madd_epi16(_mm256_permutevar8x32_epi32(a0, first_rows), b));
        c1 = _mm256_add_epi32(c1, _mm256_madd_epi16(_mm256_permutevar8x32_epi32(a0, second_rows), b));
        c2 = _mm256_add_epi32(c2, _mm256_madd_epi16(_mm256_permutevar8x32_epi32(a1, first_rows), b));
        c3 = _mm256_add_epi32(c3, _mm256_madd_epi16(_mm256_permutevar8x32_epi32(a1, second_rows), b));
        c4 = _mm256_add_epi32(c4, _mm256_madd_epi16(_mm256_permutevar8x32_epi32(a2, first_rows), b));
        c5 = _mm256_add_epi32(c5, _mm256_madd_epi16(_mm256_permutevar8x32_epi32(a2, second_rows), b));
    }

    let out = tile.as_mut_ptr() as *mut __m256i;
    _mm256_storeu_si256(out, c0);
    _mm256_storeu_si256(out.add(1), c1);
    _mm256_storeu_si256(out.add(2), c2);
    _mm256_storeu_si256(out.add(3), c3);
    _mm256_storeu_si256(out.add(4), c4);
    _mm256_storeu_si256(out.add(5), c5);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::reference::ReferenceKernel;

    #[test]
    fn test_kernel_12x4_matches_reference() {
        let Some(kernel) = Avx2Kernel12x4Depth2::detect() else {
            println!("Skipping - AVX2 not available");
            return;
        };
        let reference = ReferenceKernel::new(GEMM_FORMAT).unwrap();

        for depth in [2, 4, 16, 130] {
            let lhs: Vec<u8> = (0..12 * depth).map(|i| (i * 131 % 256) as u8).collect();
            let rhs: Vec<u8> = (0..4 * depth).map(|i| (255 - i * 7 % 256) as u8).collect();

            let stride = 6;
            let mut got = vec![3i32; 12 * stride];
            let mut expected = got.clone();
            kernel.run(&mut got, stride, &lhs, &rhs, depth);
            reference.run(&mut expected, stride, &lhs, &rhs, depth);

            assert_eq!(got, expected, "depth {}", depth);
        }
    }

    #[test]
    fn test_kernel_12x4_saturated_inputs() {
        let Some(kernel) = Avx2Kernel12x4Depth2::detect() else {
            println!("Skipping - AVX2 not available");
            return;
        };
        let depth = 64;
        let lhs = vec![255u8; 12 * depth];
        let rhs = vec![255u8; 4 * depth];
        let mut dst = vec![0i32; 48];
        kernel.run(&mut dst, 4, &lhs, &rhs, depth);
        assert!(dst.iter().all(|&v| v == 255 * 255 * depth as i32));
    }
}
