//! Single-threaded blocked GEMM.
//!
//! For each row block the LHS is packed once; for each column block the RHS
//! is packed, the kernel sweeps every (LHS run, RHS run) pair depth block by
//! depth block into a block-local `i32` accumulator, and the finished block
//! is unpacked straight into the result. The full `rows x cols` accumulator
//! is never materialised.

use log::trace;

use crate::blocked::block_params::BlockParams;
use crate::blocked::pack::{PackedSideBlock, pack_lhs, pack_rhs};
use crate::blocked::unpack::{BlockAccumulators, unpack_block};
use crate::config::GemmConfig;
use crate::context::{GemmContext, Workspace};
use crate::error::Result;
use crate::kernels::{GEMM_FORMAT, Kernel, KernelFormat};
use crate::matrix::{MatrixView, MatrixViewMut};
use crate::params::{QuantizationParams, check_gemm_args};

/// Per-thread buffers, reused from one call to the next.
#[derive(Debug, Clone)]
pub struct Scratch {
    lhs: PackedSideBlock,
    rhs: PackedSideBlock,
    acc: Vec<i32>,
}

impl Scratch {
    pub fn new(format: KernelFormat) -> Self {
        Self {
            lhs: PackedSideBlock::new(format.lhs),
            rhs: PackedSideBlock::new(format.rhs),
            acc: Vec::new(),
        }
    }

    fn prepare(&mut self, format: &KernelFormat) {
        self.lhs.set_format(format.lhs);
        self.rhs.set_format(format.rhs);
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new(GEMM_FORMAT)
    }
}

/// Computes `result = requantize(lhs * rhs)` on the calling thread.
///
/// Any storage orders are accepted. The context only supplies its scratch
/// buffers and blocking configuration; no worker pool is created.
pub fn single_thread_gemm(
    context: &mut GemmContext,
    kernel: &dyn Kernel,
    lhs: &MatrixView<'_, u8>,
    rhs: &MatrixView<'_, u8>,
    result: &mut MatrixViewMut<'_, u8>,
    params: &QuantizationParams,
) -> Result<()> {
    check_gemm_args(lhs, rhs, result, params)?;
    let Workspace { config, scratch, .. } = context.workspace(1)?;
    compute_slab(
        &mut scratch[0],
        config,
        kernel,
        lhs,
        rhs,
        result.reborrow(),
        params,
    );
    Ok(())
}

/// Computes one output slab. `lhs` and `rhs` must already be restricted to
/// the slab's rows and columns; arguments are assumed valid.
pub(crate) fn compute_slab(
    scratch: &mut Scratch,
    config: &GemmConfig,
    kernel: &dyn Kernel,
    lhs: &MatrixView<'_, u8>,
    rhs: &MatrixView<'_, u8>,
    mut result: MatrixViewMut<'_, u8>,
    params: &QuantizationParams,
) {
    let (rows, cols, depth) = (result.rows(), result.cols(), lhs.cols());
    if rows == 0 || cols == 0 {
        return;
    }

    let format = kernel.format();
    scratch.prepare(&format);
    let blocks = BlockParams::new(rows, cols, depth, &format, config);
    trace!(
        "slab {}x{}x{} with {}: {:?}",
        rows,
        depth,
        cols,
        kernel.name(),
        blocks
    );

    for r0 in (0..rows).step_by(blocks.block_rows) {
        let rs = blocks.block_rows.min(rows - r0);
        pack_lhs(&mut scratch.lhs, &lhs.block(r0, 0, rs, depth));

        for c0 in (0..cols).step_by(blocks.block_cols) {
            let cs = blocks.block_cols.min(cols - c0);
            pack_rhs(&mut scratch.rhs, &rhs.block(0, c0, depth, cs));

            let stride = compute_block(
                kernel,
                &scratch.lhs,
                &scratch.rhs,
                &mut scratch.acc,
                blocks.block_depth,
            );
            let acc = BlockAccumulators {
                raw: &scratch.acc,
                stride,
                lhs_sums: scratch.lhs.sums(),
                rhs_sums: scratch.rhs.sums(),
                depth,
            };
            unpack_block(&mut result.block_mut(r0, c0, rs, cs), &acc, params);
        }
    }
}

/// Runs the kernel over every run pair of one packed block. Returns the row
/// stride of the accumulator tiles written into `acc`.
fn compute_block(
    kernel: &dyn Kernel,
    lhs: &PackedSideBlock,
    rhs: &PackedSideBlock,
    acc: &mut Vec<i32>,
    block_depth: usize,
) -> usize {
    let format = kernel.format();
    let (mr, nr) = (format.rows(), format.cols());
    let stride = rhs.runs() * nr;

    acc.clear();
    acc.resize(lhs.runs() * mr * stride, 0);

    let padded_depth = lhs.padded_depth();
    for d0 in (0..padded_depth).step_by(block_depth) {
        let ds = block_depth.min(padded_depth - d0);
        for rc in 0..rhs.runs() {
            let rhs_run = rhs.run(rc, d0, ds);
            for rr in 0..lhs.runs() {
                let lhs_run = lhs.run(rr, d0, ds);
                kernel.run(&mut acc[rr * mr * stride + rc * nr..], stride, lhs_run, rhs_run, ds);
            }
        }
    }
    stride
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::reference::ReferenceKernel;
    use crate::kernels::{CellFormat, KernelSideFormat, default_kernel_for_gemm};
    use crate::matrix::reference::{ReferenceContext, reference_gemm};
    use crate::matrix::{MapOrder, Matrix};

    fn patterned(rows: usize, cols: usize, order: MapOrder, seed: usize) -> Matrix<u8> {
        let mut m = Matrix::new(rows, cols, order);
        for r in 0..rows {
            for c in 0..cols {
                m.set(r, c, ((r * 31 + c * 17 + seed * 7) % 256) as u8);
            }
        }
        m
    }

    fn check(kernel: &dyn Kernel, rows: usize, depth: usize, cols: usize, config: GemmConfig) {
        let lhs = patterned(rows, depth, MapOrder::RowMajor, 1);
        let rhs = patterned(depth, cols, MapOrder::ColMajor, 2);
        let params = QuantizationParams::new(-75, -91, 74980, 123, 20);

        let mut expected = Matrix::new(rows, cols, MapOrder::ColMajor);
        reference_gemm(
            &mut ReferenceContext::default(),
            &lhs.view(),
            &rhs.view(),
            &mut expected.view_mut(),
            &params,
        )
        .unwrap();

        let mut context = GemmContext::with_config(config).unwrap();
        let mut got = Matrix::new(rows, cols, MapOrder::ColMajor);
        single_thread_gemm(
            &mut context,
            kernel,
            &lhs.view(),
            &rhs.view(),
            &mut got.view_mut(),
            &params,
        )
        .unwrap();

        assert_eq!(got, expected, "{}x{}x{} with {}", rows, depth, cols, kernel.name());
    }

    #[test]
    fn test_matches_reference_default_kernel() {
        for (rows, depth, cols) in [(1, 1, 1), (12, 2, 4), (13, 3, 5), (50, 33, 21)] {
            check(default_kernel_for_gemm(), rows, depth, cols, GemmConfig::default());
        }
    }

    #[test]
    fn test_many_blocks_in_every_dimension() {
        // Tiny caches force several row, column and depth blocks.
        let config = GemmConfig::default().with_cache_sizes(64, 2048);
        check(default_kernel_for_gemm(), 61, 97, 43, config);
    }

    #[test]
    fn test_odd_reference_format() {
        let format = KernelFormat::new(
            KernelSideFormat::new(CellFormat::new(5, 3), 3),
            KernelSideFormat::new(CellFormat::new(4, 3), 2),
        )
        .unwrap();
        let kernel = ReferenceKernel::new(format).unwrap();
        let config = GemmConfig::default().with_cache_sizes(128, 4096);
        check(&kernel, 31, 20, 17, config);
    }

    #[test]
    fn test_zero_depth_gives_requantized_offsets() {
        let lhs = Matrix::<u8>::new(3, 0, MapOrder::RowMajor);
        let rhs = Matrix::<u8>::new(0, 2, MapOrder::ColMajor);
        let params = QuantizationParams::new(5, 5, 7, 2, 1);
        let mut result = Matrix::new(3, 2, MapOrder::ColMajor);
        single_thread_gemm(
            &mut GemmContext::new(),
            default_kernel_for_gemm(),
            &lhs.view(),
            &rhs.view(),
            &mut result.view_mut(),
            &params,
        )
        .unwrap();
        // (7 * 2 + 1) >> 1
        assert!(result.data().iter().all(|&v| v == 7));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let lhs = Matrix::<u8>::new(2, 3, MapOrder::RowMajor);
        let rhs = Matrix::<u8>::new(4, 2, MapOrder::ColMajor);
        let mut result = Matrix::new(2, 2, MapOrder::ColMajor);
        let err = single_thread_gemm(
            &mut GemmContext::new(),
            default_kernel_for_gemm(),
            &lhs.view(),
            &rhs.view(),
            &mut result.view_mut(),
            &QuantizationParams::new(0, 0, 0, 1, 1),
        );
        assert!(err.is_err());
    }
}
