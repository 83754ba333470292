//! Packing: reorder one side of the product into kernel order.
//!
//! A side is seen as `lines x depth`: the LHS as-is (rows × depth), the RHS
//! through its transpose (cols × depth). Lines are grouped into runs of
//! the kernel's width; inside a run the bytes appear in exactly the order
//! the kernel reads them (see [`KernelSideFormat::packed_offset`]). Line
//! and depth tails are zero padded so the kernel never needs edge cases.
//!
//! Values are copied untouched. The per-line sums recorded alongside let
//! the unpacker apply the operand offsets afterwards.

use crate::kernels::KernelSideFormat;
use crate::matrix::{MapOrder, MatrixView};

/// Packed bytes of one block of one side, plus per-line sums.
#[derive(Debug, Clone)]
pub struct PackedSideBlock {
    format: KernelSideFormat,
    data: Vec<u8>,
    sums: Vec<i32>,
    lines: usize,
    depth: usize,
    padded_depth: usize,
}

impl PackedSideBlock {
    pub fn new(format: KernelSideFormat) -> Self {
        Self {
            format,
            data: Vec::new(),
            sums: Vec::new(),
            lines: 0,
            depth: 0,
            padded_depth: 0,
        }
    }

    pub fn format(&self) -> KernelSideFormat {
        self.format
    }

    /// Switches to another format; the buffers are kept for reuse.
    pub fn set_format(&mut self, format: KernelSideFormat) {
        self.format = format;
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Depth rounded up to the cell depth.
    pub fn padded_depth(&self) -> usize {
        self.padded_depth
    }

    /// Number of kernel-width runs (the last one may be partly padding).
    pub fn runs(&self) -> usize {
        self.lines.div_ceil(self.format.width())
    }

    /// Raw sum of every packed line, without padding.
    pub fn sums(&self) -> &[i32] {
        &self.sums
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of run `run` covering depth `depth_start..depth_start + depth_len`.
    ///
    /// `depth_start` must be a multiple of the cell depth.
    pub fn run(&self, run: usize, depth_start: usize, depth_len: usize) -> &[u8] {
        debug_assert_eq!(depth_start % self.format.cell.depth, 0);
        let width = self.format.width();
        let start = run * width * self.padded_depth + depth_start * width;
        &self.data[start..start + depth_len * width]
    }

    /// Position of (`line`, `d`) in the packed buffer.
    #[inline]
    pub fn offset(&self, line: usize, d: usize) -> usize {
        let width = self.format.width();
        (line / width) * width * self.padded_depth + self.format.packed_offset(line % width, d)
    }

    fn reset(&mut self, lines: usize, depth: usize) {
        let width = self.format.width();
        self.lines = lines;
        self.depth = depth;
        self.padded_depth = depth.next_multiple_of(self.format.cell.depth);
        self.data.clear();
        self.data
            .resize(lines.next_multiple_of(width) * self.padded_depth, 0);
        self.sums.clear();
        self.sums.resize(lines, 0);
    }
}

/// Packs `src` (`lines x depth`) into `dst`.
///
/// Reads follow the source's storage order so the inner loop is the
/// contiguous one; writes land wherever the format says.
pub fn pack_side(dst: &mut PackedSideBlock, src: &MatrixView<'_, u8>) {
    let (lines, depth) = (src.rows(), src.cols());
    dst.reset(lines, depth);

    match src.order() {
        MapOrder::RowMajor => {
            for line in 0..lines {
                let mut sum = 0i32;
                for d in 0..depth {
                    let v = src.get(line, d);
                    let off = dst.offset(line, d);
                    dst.data[off] = v;
                    sum = sum.wrapping_add(v as i32);
                }
                dst.sums[line] = sum;
            }
        }
        MapOrder::ColMajor => {
            for d in 0..depth {
                for line in 0..lines {
                    let v = src.get(line, d);
                    let off = dst.offset(line, d);
                    dst.data[off] = v;
                    dst.sums[line] = dst.sums[line].wrapping_add(v as i32);
                }
            }
        }
    }
}

/// Packs an LHS block (rows × depth); lines of the packed block are rows.
pub fn pack_lhs(dst: &mut PackedSideBlock, lhs: &MatrixView<'_, u8>) {
    pack_side(dst, lhs);
}

/// Packs an RHS block (depth × cols); lines of the packed block are columns.
pub fn pack_rhs(dst: &mut PackedSideBlock, rhs: &MatrixView<'_, u8>) {
    pack_side(dst, &rhs.transposed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{CellFormat, CellOrder};
    use crate::matrix::Matrix;

    fn numbered(rows: usize, cols: usize, order: MapOrder) -> Matrix<u8> {
        let mut m = Matrix::new(rows, cols, order);
        for r in 0..rows {
            for c in 0..cols {
                m.set(r, c, (1 + r * 16 + c) as u8);
            }
        }
        m
    }

    #[test]
    fn test_pack_layout_cell_by_cell() {
        // 2 cells of 2 lines x 2 depth, depth-major inside a cell.
        let format = KernelSideFormat::new(CellFormat::new(2, 2), 2);
        let src = numbered(4, 4, MapOrder::RowMajor);
        let mut packed = PackedSideBlock::new(format);
        pack_side(&mut packed, &src.view());

        // value = 1 + line * 16 + d
        let expected: Vec<u8> = vec![
            // depth step 0: cell 0 (lines 0-1), cell 1 (lines 2-3)
            1, 17, 2, 18, 33, 49, 34, 50,
            // depth step 1
            3, 19, 4, 20, 35, 51, 36, 52,
        ];
        assert_eq!(packed.data(), &expected[..]);
        assert_eq!(packed.runs(), 1);
        assert_eq!(packed.sums(), &[10, 74, 138, 202]);
    }

    #[test]
    fn test_pack_pads_lines_and_depth_with_zeros() {
        let format =
            KernelSideFormat::new(CellFormat::new(3, 4).with_order(CellOrder::WidthMajor), 1);
        let src = numbered(4, 5, MapOrder::ColMajor);
        let mut packed = PackedSideBlock::new(format);
        pack_side(&mut packed, &src.view());

        assert_eq!(packed.padded_depth(), 8);
        assert_eq!(packed.runs(), 2);
        assert_eq!(packed.data().len(), 2 * 3 * 8);

        for line in 0..6 {
            for d in 0..8 {
                let v = packed.data()[packed.offset(line, d)];
                if line < 4 && d < 5 {
                    assert_eq!(v, src.get(line, d));
                } else {
                    assert_eq!(v, 0, "padding at ({}, {})", line, d);
                }
            }
        }
    }

    #[test]
    fn test_storage_order_is_transparent() {
        let format = KernelSideFormat::new(CellFormat::new(5, 3), 3);
        let rm = numbered(17, 11, MapOrder::RowMajor);
        let mut cm = Matrix::new(17, 11, MapOrder::ColMajor);
        for r in 0..17 {
            for c in 0..11 {
                cm.set(r, c, rm.get(r, c));
            }
        }
        let mut a = PackedSideBlock::new(format);
        let mut b = PackedSideBlock::new(format);
        pack_side(&mut a, &rm.view());
        pack_side(&mut b, &cm.view());
        assert_eq!(a.data(), b.data());
        assert_eq!(a.sums(), b.sums());
    }

    #[test]
    fn test_pack_rhs_uses_columns_as_lines() {
        let format = KernelSideFormat::new(CellFormat::new(2, 1), 1);
        let rhs = numbered(3, 2, MapOrder::ColMajor);
        let mut packed = PackedSideBlock::new(format);
        pack_rhs(&mut packed, &rhs.view());
        assert_eq!(packed.lines(), 2);
        assert_eq!(packed.depth(), 3);
        // column c, depth (row) d
        assert_eq!(packed.run(0, 1, 1), &[rhs.get(1, 0), rhs.get(1, 1)]);
        assert_eq!(packed.sums()[1], (2 + 18 + 34) as i32);
    }

    #[test]
    fn test_reuse_clears_previous_contents() {
        let format = KernelSideFormat::new(CellFormat::new(4, 2), 1);
        let mut packed = PackedSideBlock::new(format);
        pack_side(&mut packed, &numbered(4, 4, MapOrder::RowMajor).view());
        pack_side(&mut packed, &numbered(1, 1, MapOrder::RowMajor).view());
        assert_eq!(packed.data(), &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(packed.sums(), &[1]);
    }
}
