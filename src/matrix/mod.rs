//! Strided matrix views and the owning matrix type.
//!
//! Every GEMM entry point reads its operands through [`MatrixView`] and
//! writes through [`MatrixViewMut`]. Both carry the storage order as a
//! runtime [`MapOrder`], so one code path serves all order combinations.
//!
//! The reference implementation of the quantized product lives in
//! [`reference`] and is the oracle every optimised path is tested against.

pub mod reference;

use std::marker::PhantomData;
use std::ops::Index;
use std::ptr::NonNull;

use crate::error::{GemmError, Result};

/// How a matrix is laid out in its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapOrder {
    /// Element (r, c) lives at `r * stride + c`.
    RowMajor,
    /// Element (r, c) lives at `c * stride + r`.
    ColMajor,
}

impl MapOrder {
    /// The order that describes the same buffer read as the transpose.
    pub fn transposed(self) -> Self {
        match self {
            MapOrder::RowMajor => MapOrder::ColMajor,
            MapOrder::ColMajor => MapOrder::RowMajor,
        }
    }
}

#[inline]
fn offset_of(order: MapOrder, stride: usize, row: usize, col: usize) -> usize {
    match order {
        MapOrder::RowMajor => row * stride + col,
        MapOrder::ColMajor => col * stride + row,
    }
}

/// Length of one contiguous line (a row for row-major, a column otherwise).
#[inline]
fn line_len(order: MapOrder, rows: usize, cols: usize) -> usize {
    match order {
        MapOrder::RowMajor => cols,
        MapOrder::ColMajor => rows,
    }
}

/// Number of elements a view must be able to address.
fn required_len(rows: usize, cols: usize, stride: usize, order: MapOrder) -> usize {
    if rows == 0 || cols == 0 {
        return 0;
    }
    offset_of(order, stride, rows - 1, cols - 1) + 1
}

fn check_layout(len: usize, rows: usize, cols: usize, stride: usize, order: MapOrder) -> Result<()> {
    let min = line_len(order, rows, cols);
    if stride < min {
        return Err(GemmError::InvalidStride { stride, min });
    }
    let required = required_len(rows, cols, stride, order);
    if required > len {
        return Err(GemmError::BufferTooSmall { len, required });
    }
    Ok(())
}

/// Read-only rectangular view over a borrowed buffer.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a, T> {
    data: &'a [T],
    rows: usize,
    cols: usize,
    stride: usize,
    order: MapOrder,
}

impl<'a, T: Copy> MatrixView<'a, T> {
    /// Wraps `data` as a `rows x cols` matrix with the given stride.
    ///
    /// Fails if the stride is shorter than a line or the buffer does not
    /// reach the last element.
    pub fn new(
        data: &'a [T],
        rows: usize,
        cols: usize,
        stride: usize,
        order: MapOrder,
    ) -> Result<Self> {
        check_layout(data.len(), rows, cols, stride, order)?;
        Ok(Self {
            data,
            rows,
            cols,
            stride,
            order,
        })
    }

    /// Like [`MatrixView::new`] with lines packed back to back.
    pub fn contiguous(data: &'a [T], rows: usize, cols: usize, order: MapOrder) -> Result<Self> {
        Self::new(data, rows, cols, line_len(order, rows, cols), order)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn order(&self) -> MapOrder {
        self.order
    }

    /// The underlying buffer, starting at element (0, 0).
    pub fn data(&self) -> &'a [T] {
        self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[offset_of(self.order, self.stride, row, col)]
    }

    /// Sub-view of `rows x cols` elements starting at (`row`, `col`).
    ///
    /// # Panics
    ///
    /// Panics if the block does not fit inside this view.
    pub fn block(&self, row: usize, col: usize, rows: usize, cols: usize) -> Self {
        assert!(
            row + rows <= self.rows && col + cols <= self.cols,
            "block {}x{} at ({}, {}) outside {}x{} view",
            rows,
            cols,
            row,
            col,
            self.rows,
            self.cols
        );
        let data = if rows == 0 || cols == 0 {
            &self.data[..0]
        } else {
            &self.data[offset_of(self.order, self.stride, row, col)..]
        };
        Self {
            data,
            rows,
            cols,
            stride: self.stride,
            order: self.order,
        }
    }

    /// The same buffer seen as the transposed matrix. No data moves.
    pub fn transposed(&self) -> Self {
        Self {
            data: self.data,
            rows: self.cols,
            cols: self.rows,
            stride: self.stride,
            order: self.order.transposed(),
        }
    }
}

/// Mutable rectangular view over a borrowed buffer.
///
/// Unlike [`MatrixView`] this is pointer based, so a view can be split
/// along either dimension into two disjoint views even when their
/// elements interleave in memory (e.g. splitting the rows of a
/// column-major matrix). That is how worker threads get their slabs.
#[derive(Debug)]
pub struct MatrixViewMut<'a, T> {
    ptr: NonNull<T>,
    rows: usize,
    cols: usize,
    stride: usize,
    order: MapOrder,
    _marker: PhantomData<&'a mut [T]>,
}

// The view is an exclusive borrow of its element set; it can move to
// another thread exactly when `&mut [T]` could.
unsafe impl<T: Send> Send for MatrixViewMut<'_, T> {}
unsafe impl<T: Sync> Sync for MatrixViewMut<'_, T> {}

impl<'a, T: Copy> MatrixViewMut<'a, T> {
    pub fn new(
        data: &'a mut [T],
        rows: usize,
        cols: usize,
        stride: usize,
        order: MapOrder,
    ) -> Result<Self> {
        check_layout(data.len(), rows, cols, stride, order)?;
        Ok(Self {
            ptr: NonNull::from(data).cast(),
            rows,
            cols,
            stride,
            order,
            _marker: PhantomData,
        })
    }

    pub fn contiguous(data: &'a mut [T], rows: usize, cols: usize, order: MapOrder) -> Result<Self> {
        let stride = line_len(order, rows, cols);
        Self::new(data, rows, cols, stride, order)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn order(&self) -> MapOrder {
        self.order
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        assert!(row < self.rows && col < self.cols);
        // SAFETY: in bounds of the element set this view owns.
        unsafe { self.ptr.add(offset_of(self.order, self.stride, row, col)).read() }
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        assert!(row < self.rows && col < self.cols);
        // SAFETY: in bounds, and `&mut self` makes the write exclusive.
        unsafe {
            self.ptr
                .add(offset_of(self.order, self.stride, row, col))
                .write(value)
        }
    }

    /// Shorter-lived view over the same elements.
    pub fn reborrow(&mut self) -> MatrixViewMut<'_, T> {
        MatrixViewMut {
            ptr: self.ptr,
            rows: self.rows,
            cols: self.cols,
            stride: self.stride,
            order: self.order,
            _marker: PhantomData,
        }
    }

    /// Mutable sub-view of `rows x cols` elements starting at (`row`, `col`).
    pub fn block_mut(
        &mut self,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> MatrixViewMut<'_, T> {
        assert!(row + rows <= self.rows && col + cols <= self.cols);
        let ptr = self.ptr_at(row, col, rows, cols);
        MatrixViewMut {
            ptr,
            rows,
            cols,
            stride: self.stride,
            order: self.order,
            _marker: PhantomData,
        }
    }

    /// Splits into rows `0..at` and `at..rows`.
    pub fn split_rows(self, at: usize) -> (Self, Self) {
        assert!(at <= self.rows, "split at row {} of {}", at, self.rows);
        let bottom_rows = self.rows - at;
        let bottom = Self {
            ptr: self.ptr_at(at, 0, bottom_rows, self.cols),
            rows: bottom_rows,
            ..self.shallow()
        };
        let top = Self { rows: at, ..self };
        (top, bottom)
    }

    /// Splits into columns `0..at` and `at..cols`.
    pub fn split_cols(self, at: usize) -> (Self, Self) {
        assert!(at <= self.cols, "split at col {} of {}", at, self.cols);
        let right_cols = self.cols - at;
        let right = Self {
            ptr: self.ptr_at(0, at, self.rows, right_cols),
            cols: right_cols,
            ..self.shallow()
        };
        let left = Self { cols: at, ..self };
        (left, right)
    }

    fn shallow(&self) -> Self {
        Self {
            ptr: self.ptr,
            rows: self.rows,
            cols: self.cols,
            stride: self.stride,
            order: self.order,
            _marker: PhantomData,
        }
    }

    /// Pointer to (`row`, `col`), or the base pointer for an empty block
    /// so no pointer ever leaves the allocation.
    fn ptr_at(&self, row: usize, col: usize, rows: usize, cols: usize) -> NonNull<T> {
        if rows == 0 || cols == 0 {
            return self.ptr;
        }
        // SAFETY: the block is non-empty and inside this view, so the
        // offset addresses an element of the original buffer.
        unsafe { self.ptr.add(offset_of(self.order, self.stride, row, col)) }
    }
}

/// Matrix that owns its (contiguous) storage.
#[derive(Debug, Clone)]
pub struct Matrix<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
    order: MapOrder,
}

impl<T: Copy + Default> Matrix<T> {
    /// Zero-initialised (`T::default()`) matrix.
    pub fn new(rows: usize, cols: usize, order: MapOrder) -> Self {
        Self {
            data: vec![T::default(); rows * cols],
            rows,
            cols,
            order,
        }
    }

    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize, order: MapOrder) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(GemmError::BufferTooSmall {
                len: data.len(),
                required: rows * cols,
            });
        }
        Ok(Self {
            data,
            rows,
            cols,
            order,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn order(&self) -> MapOrder {
        self.order
    }

    pub fn stride(&self) -> usize {
        line_len(self.order, self.rows, self.cols)
    }

    /// Number of coefficients.
    pub fn size(&self) -> usize {
        self.rows * self.cols
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self[(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        assert!(row < self.rows && col < self.cols);
        let stride = self.stride();
        self.data[offset_of(self.order, stride, row, col)] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Read-only view over the whole matrix.
    pub fn view(&self) -> MatrixView<'_, T> {
        MatrixView {
            data: &self.data,
            rows: self.rows,
            cols: self.cols,
            stride: self.stride(),
            order: self.order,
        }
    }

    pub fn view_mut(&mut self) -> MatrixViewMut<'_, T> {
        let stride = self.stride();
        MatrixViewMut {
            ptr: NonNull::from(self.data.as_mut_slice()).cast(),
            rows: self.rows,
            cols: self.cols,
            stride,
            order: self.order,
            _marker: PhantomData,
        }
    }
}

impl<T: Copy + Default> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        assert!(row < self.rows && col < self.cols);
        &self.data[offset_of(self.order, self.stride(), row, col)]
    }
}

/// Logical equality: same shape and same coefficients, whatever the
/// storage orders.
impl<T: Copy + Default + PartialEq> PartialEq for Matrix<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.rows != other.rows || self.cols != other.cols {
            return false;
        }
        if self.order == other.order {
            return self.data == other.data;
        }
        (0..self.cols).all(|c| (0..self.rows).all(|r| self[(r, c)] == other[(r, c)]))
    }
}

impl<T: Copy + Default + Eq> Eq for Matrix<T> {}
