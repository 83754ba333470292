//! 8×1 depth-4 AVX2 microkernel for matrix × vector products.

use super::{GEMV_FORMAT, Kernel, KernelFormat};

/// AVX2 kernel producing an 8×1 tile.
///
/// The LHS cell is 8 rows × 4 depths, width-major, so 16 bytes cover 4
/// rows. The single RHS column contributes 4 depth values per step,
/// replicated across the register.
#[derive(Debug)]
pub struct Avx2Kernel8x1Depth4 {
    _detected: (),
}

static KERNEL: Avx2Kernel8x1Depth4 = Avx2Kernel8x1Depth4 { _detected: () };

impl Avx2Kernel8x1Depth4 {
    pub fn detect() -> Option<&'static Self> {
        if is_x86_feature_detected!("avx2") {
            Some(&KERNEL)
        } else {
            None
        }
    }
}

impl Kernel for Avx2Kernel8x1Depth4 {
    fn name(&self) -> String {
        "Avx2Kernel8x1Depth4".to_string()
    }

    fn format(&self) -> KernelFormat {
        GEMV_FORMAT
    }

    fn run(&self, dst: &mut [i32], dst_stride: usize, lhs: &[u8], rhs: &[u8], depth: usize) {
        assert_eq!(depth % 4, 0, "depth {} is not a multiple of 4", depth);
        assert!(lhs.len() >= 8 * depth && rhs.len() >= depth);
        assert!(dst.len() > 7 * dst_stride);

        let mut tile = [0i32; 8];
        // SAFETY: AVX2 was detected when `self` was handed out, and the
        // slice lengths were checked above.
        unsafe { kernel_8x1_depth4_avx2(lhs.as_ptr(), rhs.as_ptr(), depth, &mut tile) };

        for (r, &v) in tile.iter().enumerate() {
            dst[r * dst_stride] = dst[r * dst_stride].wrapping_add(v);
        }
    }
}

/// Computes an 8×1 tile: tile = LHS_packed × RHS_packed (raw products)
///
/// `madd` leaves each row as two partial sums; a single horizontal add at
/// the end folds them, then a permute restores row order.
///
/// # Safety
///
/// Caller must ensure:
/// - CPU supports AVX2 (checked via `#[target_feature]`)
/// - `lhs` points to `8 * depth` packed bytes
/// - `rhs` points to `depth` packed bytes
/// - `depth` is a multiple of 4
#[target_feature(enable = "avx2")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn kernel_8x1_depth4_avx2(lhs: *const u8, rhs: *const u8, depth: usize, tile: &mut [i32; 8]) {
    use std::arch::x86_64::*;

    let mut rows_0_3 = _mm256_setzero_si256();
    let mut rows_4_7 = _mm256_setzero_si256();

    for step in 0..depth / 4 {
        let l = lhs.add(step * 32);
        let r = (rhs.add(step * 4) as *const u32).read_unaligned();

        // Same 4 depth values in every group of 4 lanes
        let b = _mm256_cvtepu8_epi16(_mm_set1_epi32(r as i32));
        let a_lo = _mm256_cvtepu8_epi16(_mm_loadu_si128(l as *const __m128i));
        let a_hi = _mm256_cvtepu8_epi16(_mm_loadu_si128(l.add(16) as *const __m128i));

        rows_0_3 = _mm256_add_epi32(rows_0_3, _mm256_madd_epi16(a_lo, b));
        rows_4_7 = _mm256_add_epi32(rows_4_7, _mm256_madd_epi16(a_hi, b));
    }

    // hadd gives [r0 r1 r4 r5 | r2 r3 r6 r7]
    let sums = _mm256_hadd_epi32(rows_0_3, rows_4_7);
    let ordered = _mm256_permutevar8x32_epi32(sums, _mm256_setr_epi32(0, 1, 4, 5, 2, 3, 6, 7));
    _mm256_storeu_si256(tile.as_mut_ptr() as *mut __m256i, ordered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::reference::ReferenceKernel;

    #[test]
    fn test_kernel_8x1_matches_reference() {
        let Some(kernel) = Avx2Kernel8x1Depth4::detect() else {
            println!("Skipping - AVX2 not available");
            return;
        };
        let reference = ReferenceKernel::new(GEMV_FORMAT).unwrap();

        for depth in [4, 8, 64, 260] {
            let lhs: Vec<u8> = (0..8 * depth).map(|i| (i * 29 % 256) as u8).collect();
            let rhs: Vec<u8> = (0..depth).map(|i| (i * 53 % 256) as u8).collect();

            let stride = 3;
            let mut got = vec![-7i32; 8 * stride];
            let mut expected = got.clone();
            kernel.run(&mut got, stride, &lhs, &rhs, depth);
            reference.run(&mut expected, stride, &lhs, &rhs, depth);

            assert_eq!(got, expected, "depth {}", depth);
        }
    }
}
