//! Scalar kernel for any [`KernelFormat`].
//!
//! Slow, but it reads packed data through the same format description as
//! the packer writes it, so running the blocked GEMM with odd formats
//! (3x4 cells, 5x3 cells, ...) exercises every corner of the packing code.

use super::{Kernel, KernelFormat};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceKernel {
    format: KernelFormat,
}

impl ReferenceKernel {
    pub fn new(format: KernelFormat) -> Result<Self> {
        let format = KernelFormat::new(format.lhs, format.rhs)?;
        Ok(Self { format })
    }

    /// For formats already known to be valid.
    pub(crate) const fn from_format(format: KernelFormat) -> Self {
        Self { format }
    }
}

impl Kernel for ReferenceKernel {
    fn name(&self) -> String {
        format!("ReferenceKernel {}", self.format)
    }

    fn format(&self) -> KernelFormat {
        self.format
    }

    fn run(&self, dst: &mut [i32], dst_stride: usize, lhs: &[u8], rhs: &[u8], depth: usize) {
        let (rows, cols) = (self.format.rows(), self.format.cols());
        assert_eq!(depth % self.format.depth(), 0, "depth {} not a multiple of the cell depth", depth);
        assert!(lhs.len() >= rows * depth && rhs.len() >= cols * depth);

        for d in 0..depth {
            for r in 0..rows {
                let a = lhs[self.format.lhs.packed_offset(r, d)] as i32;
                let out = &mut dst[r * dst_stride..r * dst_stride + cols];
                for (c, acc) in out.iter_mut().enumerate() {
                    let b = rhs[self.format.rhs.packed_offset(c, d)] as i32;
                    *acc = acc.wrapping_add(a * b);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{CellFormat, CellOrder, KernelSideFormat};

    /// Packs a single run of `lines x depth` row-major values.
    fn pack_run(side: &KernelSideFormat, values: &[u8], depth: usize) -> Vec<u8> {
        let mut out = vec![0u8; side.width() * depth];
        for line in 0..side.width() {
            for d in 0..depth {
                out[side.packed_offset(line, d)] = values[line * depth + d];
            }
        }
        out
    }

    #[test]
    fn test_reference_kernel_matches_naive_product() {
        let lhs_side = KernelSideFormat::new(CellFormat::new(3, 4), 2);
        let rhs_side =
            KernelSideFormat::new(CellFormat::new(5, 4).with_order(CellOrder::WidthMajor), 3);
        let kernel = ReferenceKernel::new(KernelFormat::new(lhs_side, rhs_side).unwrap()).unwrap();
        let (rows, cols, depth) = (6, 15, 8);

        let a: Vec<u8> = (0..rows * depth).map(|i| (i * 37 % 256) as u8).collect();
        let b: Vec<u8> = (0..cols * depth).map(|i| (i * 91 % 256) as u8).collect();
        let a_pack = pack_run(&lhs_side, &a, depth);
        let b_pack = pack_run(&rhs_side, &b, depth);

        let stride = cols + 3;
        let mut dst = vec![1i32; rows * stride];
        kernel.run(&mut dst, stride, &a_pack, &b_pack, depth);

        for r in 0..rows {
            for c in 0..cols {
                let expected: i32 = 1 + (0..depth)
                    .map(|d| a[r * depth + d] as i32 * b[c * depth + d] as i32)
                    .sum::<i32>();
                assert_eq!(dst[r * stride + c], expected, "mismatch at ({}, {})", r, c);
            }
            // Padding columns of the destination are left alone.
            assert!(dst[r * stride + cols..(r + 1) * stride].iter().all(|&v| v == 1));
        }
    }

    #[test]
    fn test_reference_kernel_rejects_bad_format() {
        let lhs = KernelSideFormat::new(CellFormat::new(3, 4), 2);
        let rhs = KernelSideFormat::new(CellFormat::new(3, 2), 2);
        assert!(ReferenceKernel::new(KernelFormat { lhs, rhs }).is_err());
    }
}
