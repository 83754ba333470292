//! 20×1 depth-4 AVX2 microkernel for matrix × vector products.

use super::{GEMV_20X1_FORMAT, Kernel, KernelFormat};

/// AVX2 kernel producing a 20×1 tile.
///
/// Five width-major LHS cells of 4 rows × 4 depths; each cell widens to
/// one register and feeds one `madd`. Taller than the 8×1 kernel, so the
/// RHS depth values are loaded once per 20 rows instead of once per 8.
#[derive(Debug)]
pub struct Avx2Kernel20x1Depth4 {
    _detected: (),
}

static KERNEL: Avx2Kernel20x1Depth4 = Avx2Kernel20x1Depth4 { _detected: () };

impl Avx2Kernel20x1Depth4 {
    pub fn detect() -> Option<&'static Self> {
        if is_x86_feature_detected!("avx2") {
            Some(&KERNEL)
        } else {
            None
        }
    }
}

impl Kernel for Avx2Kernel20x1Depth4 {
    fn name(&self) -> String {
        "Avx2Kernel20x1Depth4".to_string()
    }

    fn format(&self) -> KernelFormat {
        GEMV_20X1_FORMAT
    }

    fn run(&self, dst: &mut [i32], dst_stride: usize, lhs: &[u8], rhs: &[u8], depth: usize) {
        assert_eq!(depth % 4, 0, "depth {} is not a multiple of 4", depth);
        assert!(lhs.len() >= 20 * depth && rhs.len() >= depth);
        assert!(dst.len() > 19 * dst_stride);

        let mut tile = [0i32; 24];
        // SAFETY: AVX2 was detected when `self` was handed out, and the
        // slice lengths were checked above.
        unsafe { kernel_20x1_depth4_avx2(lhs.as_ptr(), rhs.as_ptr(), depth, &mut tile) };

        for (r, &v) in tile[..20].iter().enumerate() {
            dst[r * dst_stride] = dst[r * dst_stride].wrapping_add(v);
        }
    }
}

/// Computes a 20×1 tile: tile = LHS_packed × RHS_packed (raw products)
///
/// Each accumulator holds two partial sums for each of 4 rows. The
/// horizontal adds at the end fold them pairwise; rows 16-19 are folded
/// against zero and land in the first half of the last store.
///
/// # Safety
///
/// Caller must ensure:
/// - CPU supports AVX2 (checked via `#[target_feature]`)
/// - `lhs` points to `20 * depth` packed bytes
/// - `rhs` points to `depth` packed bytes
/// - `depth` is a multiple of 4
#[target_feature(enable = "avx2")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn kernel_20x1_depth4_avx2(lhs: *const u8, rhs: *const u8, depth: usize, tile: &mut [i32; 24]) {
    use std::arch::x86_64::*;

    let mut c0 = _mm256_setzero_si256();
    let mut c1 = _mm256_setzero_si256();
    let mut c2 = _mm256_setzero_si256();
    let mut c3 = _mm256_setzero_si256();
    let mut c4 = _mm256_setzero_si256();

    for step in 0..depth / 4 {
        let l = lhs.add(step * 80);
        let r = (rhs.add(step * 4) as *const u32).read_unaligned();

        let b = _mm256_cvtepu8_epi16(_mm_set1_epi32(r as i32));
        let a0 = _mm256_cvtepu8_epi16(_mm_loadu_si128(l as *const __m128i));
        let a1 = _mm256_cvtepu8_epi16(_mm_loadu_si128(l.add(16) as *const __m128i));
        let a2 = _mm256_cvtepu8_epi16(_mm_loadu_si128(l.add(32) as *const __m128i));
        let a3 = _mm256_cvtepu8_epi16(_mm_loadu_si128(l.add(48) as *const __m128i));
        let a4 = _mm256_cvtepu8_epi16(_mm_loadu_si128(l.add(64) as *const __m128i));

        c0 = _mm256_add_epi32(c0, _mm256_madd_epi16(a0, b));
        c1 = _mm256_add_epi32(c1, _mm256_madd_epi16(a1, b));
        c2 = _mm256_add_epi32(c2, _mm256_madd_epi16(a2, b));
        c3 = _mm256_add_epi32(c3, _mm256_madd_epi16(a3, b));
        c4 = _mm256_add_epi32(c4, _mm256_madd_epi16(a4, b));
    }

    // hadd gives [a0 a1 b0 b1 | a2 a3 b2 b3]
    let order = _mm256_setr_epi32(0, 1, 4, 5, 2, 3, 6, 7);
    let rows_0_7 = _mm256_permutevar8x32_epi32(_mm256_hadd_epi32(c0, c1), order);
    let rows_8_15 = _mm256_permutevar8x32_epi32(_mm256_hadd_epi32(c2, c3), order);
    let rows_16_19 = _mm256_permutevar8x32_epi32(_mm256_hadd_epi32(c4, _mm256_setzero_si256()), order);

    let out = tile.as_mut_ptr() as *mut __m256i;
    _mm256_storeu_si256(out, rows_0_7);
    _mm256_storeu_si256(out.add(1), rows_8_15);
    _mm256_storeu_si256(out.add(2), rows_16_19);
}
