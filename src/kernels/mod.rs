//! Micro-kernels for the inner loop of the quantized GEMM.
//!
//! A kernel multiplies one packed LHS run (`rows x depth`) by one packed
//! RHS run (`cols x depth`) and adds the raw `u8 x u8` products into a
//! small tile of `i32` accumulators. Offsets are not the kernel's business:
//! they are applied when the block is unpacked.
//!
//! The shape a kernel consumes is described by a [`KernelFormat`]; the
//! packing code reads that description and lays bytes out so the kernel
//! streams through them with unit stride.
//!
//! Available kernels:
//! - [`reference::ReferenceKernel`]: scalar, works with any format
//! - [`kernel_12x4::Avx2Kernel12x4Depth2`]: 12×4 tile, AVX2 (GEMM)
//! - [`kernel_8x1::Avx2Kernel8x1Depth4`]: 8×1 tile, AVX2 (GEMV)
//! - [`kernel_20x1::Avx2Kernel20x1Depth4`]: 20×1 tile, AVX2 (tall GEMV)

#[cfg(target_arch = "x86_64")]
pub mod kernel_12x4;
#[cfg(target_arch = "x86_64")]
pub mod kernel_20x1;
#[cfg(target_arch = "x86_64")]
pub mod kernel_8x1;
pub mod reference;

use std::fmt;

use crate::error::{GemmError, Result};
use reference::ReferenceKernel;

/// Order of the `width x depth` values inside one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellOrder {
    /// All widths of depth 0, then all widths of depth 1, ...
    #[default]
    DepthMajor,
    /// All depths of line 0, then all depths of line 1, ...
    WidthMajor,
}

/// The smallest unit of packed data: `width` lines by `depth` levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellFormat {
    pub width: usize,
    pub depth: usize,
    pub order: CellOrder,
}

impl CellFormat {
    pub const fn new(width: usize, depth: usize) -> Self {
        Self {
            width,
            depth,
            order: CellOrder::DepthMajor,
        }
    }

    pub const fn with_order(self, order: CellOrder) -> Self {
        Self {
            width: self.width,
            depth: self.depth,
            order,
        }
    }

    pub const fn size(&self) -> usize {
        self.width * self.depth
    }

    /// Position of (`w`, `d`) inside the cell.
    #[inline]
    pub fn offset(&self, w: usize, d: usize) -> usize {
        match self.order {
            CellOrder::DepthMajor => d * self.width + w,
            CellOrder::WidthMajor => w * self.depth + d,
        }
    }
}

/// One side of a kernel: `cells` cells stacked along the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelSideFormat {
    pub cell: CellFormat,
    pub cells: usize,
}

impl KernelSideFormat {
    pub const fn new(cell: CellFormat, cells: usize) -> Self {
        Self { cell, cells }
    }

    /// Lines covered by one kernel invocation.
    pub const fn width(&self) -> usize {
        self.cell.width * self.cells
    }

    /// Offset of (`line`, `d`) inside one packed run of this side.
    ///
    /// A run stores depth in steps of `cell.depth`; each step holds the
    /// cells back to back, each cell contiguous.
    #[inline]
    pub fn packed_offset(&self, line: usize, d: usize) -> usize {
        let step = d / self.cell.depth;
        let cell = line / self.cell.width;
        step * self.width() * self.cell.depth
            + cell * self.cell.size()
            + self.cell.offset(line % self.cell.width, d % self.cell.depth)
    }
}

/// Shapes of both sides of a kernel. The output tile is
/// `lhs.width() x rhs.width()`, advancing `lhs.cell.depth` per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelFormat {
    pub lhs: KernelSideFormat,
    pub rhs: KernelSideFormat,
}

impl KernelFormat {
    pub fn new(lhs: KernelSideFormat, rhs: KernelSideFormat) -> Result<Self> {
        if lhs.cell.depth != rhs.cell.depth {
            return Err(GemmError::InvalidFormat(format!(
                "LHS cell depth {} differs from RHS cell depth {}",
                lhs.cell.depth, rhs.cell.depth
            )));
        }
        let sides = [lhs, rhs];
        if sides
            .iter()
            .any(|s| s.cell.width == 0 || s.cell.depth == 0 || s.cells == 0)
        {
            return Err(GemmError::InvalidFormat(
                "cell dimensions and cell counts must be non-zero".to_string(),
            ));
        }
        Ok(Self { lhs, rhs })
    }

    /// Output tile rows.
    pub const fn rows(&self) -> usize {
        self.lhs.width()
    }

    /// Output tile columns.
    pub const fn cols(&self) -> usize {
        self.rhs.width()
    }

    /// Depth consumed per step.
    pub const fn depth(&self) -> usize {
        self.lhs.cell.depth
    }
}

impl fmt::Display for KernelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} depth {} (lhs {}x{}x{}, rhs {}x{}x{})",
            self.rows(),
            self.cols(),
            self.depth(),
            self.lhs.cells,
            self.lhs.cell.width,
            self.lhs.cell.depth,
            self.rhs.cells,
            self.rhs.cell.width,
            self.rhs.cell.depth
        )
    }
}

/// A micro-kernel: the innermost loop of the blocked GEMM.
pub trait Kernel: Send + Sync {
    fn name(&self) -> String;

    fn format(&self) -> KernelFormat;

    /// Adds `lhs_run * rhs_run` into `dst`.
    ///
    /// - `lhs` holds `format().rows() * depth` packed bytes
    /// - `rhs` holds `format().cols() * depth` packed bytes
    /// - `depth` is a multiple of `format().depth()`
    /// - `dst[r * dst_stride + c]` receives output (r, c); arithmetic wraps
    ///
    /// # Panics
    ///
    /// Panics if the slices are shorter than stated above.
    fn run(&self, dst: &mut [i32], dst_stride: usize, lhs: &[u8], rhs: &[u8], depth: usize);
}

/// 12×4 tile, depth 2. Format of the default GEMM kernel.
pub const GEMM_FORMAT: KernelFormat = KernelFormat {
    lhs: KernelSideFormat::new(CellFormat::new(4, 2).with_order(CellOrder::WidthMajor), 3),
    rhs: KernelSideFormat::new(CellFormat::new(4, 2).with_order(CellOrder::WidthMajor), 1),
};

/// 8×1 tile, depth 4. Format of the default GEMV kernel.
pub const GEMV_FORMAT: KernelFormat = KernelFormat {
    lhs: KernelSideFormat::new(CellFormat::new(8, 4).with_order(CellOrder::WidthMajor), 1),
    rhs: KernelSideFormat::new(CellFormat::new(1, 4).with_order(CellOrder::WidthMajor), 1),
};

/// 20×1 tile, depth 4: five 4×4 LHS cells against one column.
pub const GEMV_20X1_FORMAT: KernelFormat = KernelFormat {
    lhs: KernelSideFormat::new(CellFormat::new(4, 4).with_order(CellOrder::WidthMajor), 5),
    rhs: KernelSideFormat::new(CellFormat::new(1, 4).with_order(CellOrder::WidthMajor), 1),
};

static GEMM_FALLBACK: ReferenceKernel = ReferenceKernel::from_format(GEMM_FORMAT);
static GEMV_FALLBACK: ReferenceKernel = ReferenceKernel::from_format(GEMV_FORMAT);

/// Fastest kernel for general products on this CPU (AVX2 > scalar).
pub fn default_kernel_for_gemm() -> &'static dyn Kernel {
    #[cfg(target_arch = "x86_64")]
    {
        if let Some(kernel) = kernel_12x4::Avx2Kernel12x4Depth2::detect() {
            return kernel;
        }
    }
    &GEMM_FALLBACK
}

/// Fastest kernel for single-column results on this CPU (AVX2 > scalar).
pub fn default_kernel_for_gemv() -> &'static dyn Kernel {
    #[cfg(target_arch = "x86_64")]
    {
        if let Some(kernel) = kernel_8x1::Avx2Kernel8x1Depth4::detect() {
            return kernel;
        }
    }
    &GEMV_FALLBACK
}
