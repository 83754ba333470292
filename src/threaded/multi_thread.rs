//! Slab-parallel GEMM on the context's worker pool.

use log::debug;

use crate::blocked::single_thread::{Scratch, compute_slab};
use crate::config::GemmConfig;
use crate::context::{GemmContext, Workspace};
use crate::error::Result;
use crate::kernels::Kernel;
use crate::matrix::{MatrixView, MatrixViewMut};
use crate::params::{QuantizationParams, check_gemm_args};

/// Computes `result = requantize(lhs * rhs)` using up to
/// `context.config().thread_budget()` threads, the calling thread included.
///
/// The output is identical to the single-threaded path whatever the thread
/// count: slabs are disjoint and each coefficient is produced by exactly
/// one thread with the same arithmetic.
pub fn multi_thread_gemm(
    context: &mut GemmContext,
    kernel: &dyn Kernel,
    lhs: &MatrixView<'_, u8>,
    rhs: &MatrixView<'_, u8>,
    result: &mut MatrixViewMut<'_, u8>,
    params: &QuantizationParams,
) -> Result<()> {
    check_gemm_args(lhs, rhs, result, params)?;

    let (rows, cols, depth) = (result.rows(), result.cols(), lhs.cols());
    let split = Split::new(rows, cols, kernel);
    let threads = choose_thread_count(rows, cols, depth, split.tiles(), context.config());

    debug!(
        "gemm {}x{}x{} with {}: {} thread(s), split by {}",
        rows,
        depth,
        cols,
        kernel.name(),
        threads,
        if split.by_rows { "rows" } else { "cols" }
    );

    gemm_in_slabs(context, kernel, lhs, rhs, result, params, threads)
}

/// Dimension the output is cut along, in whole kernel tiles.
#[derive(Debug, Clone, Copy)]
struct Split {
    by_rows: bool,
    extent: usize,
    granule: usize,
}

impl Split {
    fn new(rows: usize, cols: usize, kernel: &dyn Kernel) -> Self {
        let format = kernel.format();
        if rows >= cols {
            Self {
                by_rows: true,
                extent: rows,
                granule: format.rows(),
            }
        } else {
            Self {
                by_rows: false,
                extent: cols,
                granule: format.cols(),
            }
        }
    }

    fn tiles(&self) -> usize {
        self.extent.div_ceil(self.granule)
    }
}

/// Cuts `result` into `slabs` slabs and computes each one, handing them to
/// the context's pool when there is one. Arguments must already be checked.
pub(crate) fn gemm_in_slabs(
    context: &mut GemmContext,
    kernel: &dyn Kernel,
    lhs: &MatrixView<'_, u8>,
    rhs: &MatrixView<'_, u8>,
    result: &mut MatrixViewMut<'_, u8>,
    params: &QuantizationParams,
    slabs: usize,
) -> Result<()> {
    let depth = lhs.cols();
    let Split {
        by_rows,
        extent,
        granule,
    } = Split::new(result.rows(), result.cols(), kernel);
    let slabs = slabs.max(1);

    // Whole tiles per slab; the last slab takes the remainder.
    let slab_len = (extent.div_ceil(granule).div_ceil(slabs) * granule).max(1);
    let mut parts = Vec::with_capacity(slabs);
    let mut rest = result.reborrow();
    let mut start = 0;
    while start < extent {
        let len = slab_len.min(extent - start);
        let (slab, tail) = if by_rows {
            rest.split_rows(len)
        } else {
            rest.split_cols(len)
        };
        parts.push((start, slab));
        rest = tail;
        start += len;
    }

    let Workspace {
        config,
        pool,
        scratch,
    } = context.workspace(parts.len())?;

    let run = |scratch: &mut Scratch, start: usize, slab: MatrixViewMut<'_, u8>| {
        if by_rows {
            let lhs = lhs.block(start, 0, slab.rows(), depth);
            compute_slab(scratch, config, kernel, &lhs, rhs, slab, params);
        } else {
            let rhs = rhs.block(0, start, depth, slab.cols());
            compute_slab(scratch, config, kernel, lhs, &rhs, slab, params);
        }
    };

    let mut jobs = parts.into_iter().zip(scratch.iter_mut());
    match pool {
        Some(pool) => pool.in_place_scope(|scope| {
            let first = jobs.next();
            for ((start, slab), scratch) in jobs {
                let run = &run;
                scope.spawn(move |_| run(scratch, start, slab));
            }
            if let Some(((start, slab), scratch)) = first {
                run(scratch, start, slab);
            }
        }),
        None => {
            for ((start, slab), scratch) in jobs {
                run(scratch, start, slab);
            }
        }
    }
    Ok(())
}

/// Picks how many threads to use for a `rows x depth x cols` product.
///
/// Bounded by the configured maximum, by the hardware threads, by the
/// number of kernel tiles along the split dimension (`max_tasks`), and by
/// the amount of work: each thread should get at least
/// `min_ops_per_thread` multiply-adds.
pub fn choose_thread_count(
    rows: usize,
    cols: usize,
    depth: usize,
    max_tasks: usize,
    config: &GemmConfig,
) -> usize {
    let ops = rows.saturating_mul(cols).saturating_mul(depth);
    let by_work = ops / config.min_ops_per_thread.max(1);

    config
        .thread_budget()
        .min(max_tasks)
        .min(by_work)
        .max(1)
}
