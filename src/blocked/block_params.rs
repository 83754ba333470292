//! Cache blocking parameters.

use crate::config::GemmConfig;
use crate::kernels::KernelFormat;

/// Block sizes for one product, always whole multiples of the kernel tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockParams {
    /// Rows packed together (and kept in L2 across column blocks).
    pub block_rows: usize,
    /// Columns packed together; bounds the block accumulator.
    pub block_cols: usize,
    /// Depth swept per kernel call, sized so one LHS run and one RHS run
    /// stay in L1.
    pub block_depth: usize,
}

impl BlockParams {
    pub fn new(
        rows: usize,
        cols: usize,
        depth: usize,
        format: &KernelFormat,
        config: &GemmConfig,
    ) -> Self {
        let (mr, nr, kr) = (format.rows(), format.cols(), format.depth());
        let padded_depth = depth.next_multiple_of(kr).max(kr);

        let block_depth = round_down(config.l1_bytes / (mr + nr), kr)
            .clamp(kr, padded_depth);

        // Half of L2 for the packed rows over the full depth...
        let block_rows = round_down(config.l2_bytes / 2 / padded_depth, mr)
            .clamp(mr, rows.next_multiple_of(mr).max(mr));

        // ...the other half for the i32 accumulators of the block.
        let block_cols = round_down(config.l2_bytes / 2 / (4 * block_rows), nr)
            .clamp(nr, cols.next_multiple_of(nr).max(nr));

        Self {
            block_rows,
            block_cols,
            block_depth,
        }
    }
}

fn round_down(value: usize, multiple: usize) -> usize {
    value - value % multiple
}
