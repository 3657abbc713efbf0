//! Padded row storage carved from a single allocation.
//!
//! Every row starts at a multiple of the padded stride, so row kernels can run
//! over whole vector registers. Padding lanes are filled once at allocation
//! and never exposed through [`AlignedRows::row`].

use std::mem;
use crate::error::QmcError;

/// Width in bytes of the widest vector register rows are padded for.
pub const SIMD_ALIGNMENT_BYTES: usize = 64;

/// Round `n` up to a whole number of vector registers holding `T`.
pub fn aligned_size<T>(n: usize) -> usize {
    let lanes = (SIMD_ALIGNMENT_BYTES / mem::size_of::<T>().max(1)).max(1);
    n.div_ceil(lanes) * lanes
}

/// Dense `rows x cols` container whose rows are padded to `stride` elements.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRows<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
    stride: usize,
}

impl<T> Default for AlignedRows<T> {
    fn default() -> Self {
        Self { data: Vec::new(), rows: 0, cols: 0, stride: 0 }
    }
}

impl<T: Copy> AlignedRows<T> {
    /// Allocate `rows x cols` values set to `fill`.
    ///
    /// Either dimension being zero gives an empty container.
    pub fn new(rows: usize, cols: usize, fill: T) -> Result<Self, QmcError> {
        if rows == 0 || cols == 0 {
            return Ok(Self::default());
        }
        let stride = aligned_size::<T>(cols);
        let elements = rows
            .checked_mul(stride)
            .ok_or(QmcError::Allocation { elements: usize::MAX })?;

        let mut data = Vec::new();
        data.try_reserve_exact(elements)
            .map_err(|_| QmcError::Allocation { elements })?;
        data.resize(elements, fill);

        Ok(Self { data, rows, cols, stride })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Distance in elements between the starts of two consecutive rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The `cols` valid values of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[T] {
        debug_assert!(i < self.rows, "row {i} out of range ({} rows)", self.rows);
        let start = i * self.stride;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [T] {
        debug_assert!(i < self.rows, "row {i} out of range ({} rows)", self.rows);
        let start = i * self.stride;
        &mut self.data[start..start + self.cols]
    }

    /// `count` consecutive padded rows starting at `first`, as one slice.
    #[inline]
    pub fn block(&self, first: usize, count: usize) -> &[T] {
        let start = first * self.stride;
        &self.data[start..start + count * self.stride]
    }

    #[inline]
    pub fn block_mut(&mut self, first: usize, count: usize) -> &mut [T] {
        let start = first * self.stride;
        &mut self.data[start..start + count * self.stride]
    }

    /// Copy `src` into the valid part of row `i`.
    #[inline]
    pub fn copy_row_from(&mut self, i: usize, src: &[T]) {
        let cols = self.cols;
        self.row_mut(i).copy_from_slice(&src[..cols]);
    }

    /// Whole backing buffer, padding included.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}
