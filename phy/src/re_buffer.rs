//! Resource Element Buffers and Views
//!
//! Owned multi-slice RE buffers and non-owning windows over them, used to
//! move blocks of resource elements between the layer mapping, precoding and
//! grid writing stages without copying.

use num_complex::Complex32;
use num_traits::Zero;

/// Read access to an RE buffer organized as one contiguous slice per layer
/// or antenna port.
pub trait ReBufferReader {
    /// Number of slices (layers or ports) in the buffer.
    fn nof_slices(&self) -> usize;

    /// Number of resource elements per slice.
    fn nof_re(&self) -> usize;

    /// RE sequence of one slice.
    fn slice(&self, i_slice: usize) -> &[Complex32];
}

/// Owned RE buffer backed by a single flat allocation.
#[derive(Debug, Clone, Default)]
pub struct ReBuffer {
    data: Vec<Complex32>,
    nof_slices: usize,
    nof_re: usize,
}

impl ReBuffer {
    /// Create a zero-initialized buffer of `nof_slices` slices with `nof_re`
    /// resource elements each.
    pub fn new(nof_slices: usize, nof_re: usize) -> Self {
        Self {
            data: vec![Complex32::zero(); nof_slices * nof_re],
            nof_slices,
            nof_re,
        }
    }

    /// Change the buffer dimensions in place, growing the allocation only
    /// when the new dimensions do not fit.
    pub fn resize(&mut self, nof_slices: usize, nof_re: usize) {
        let required = nof_slices * nof_re;
        if required > self.data.len() {
            self.data.resize(required, Complex32::zero());
        }
        self.nof_slices = nof_slices;
        self.nof_re = nof_re;
    }

    /// Mutable RE sequence of one slice.
    pub fn slice_mut(&mut self, i_slice: usize) -> &mut [Complex32] {
        assert!(
            i_slice < self.nof_slices,
            "Slice index (i.e., {}) is out of range (i.e., {}).",
            i_slice,
            self.nof_slices
        );
        &mut self.data[i_slice * self.nof_re..(i_slice + 1) * self.nof_re]
    }
}

impl ReBufferReader for ReBuffer {
    fn nof_slices(&self) -> usize {
        self.nof_slices
    }

    fn nof_re(&self) -> usize {
        self.nof_re
    }

    fn slice(&self, i_slice: usize) -> &[Complex32] {
        assert!(
            i_slice < self.nof_slices,
            "Slice index (i.e., {}) is out of range (i.e., {}).",
            i_slice,
            self.nof_slices
        );
        &self.data[i_slice * self.nof_re..(i_slice + 1) * self.nof_re]
    }
}

/// Non-owning window over a contiguous RE range of another buffer.
///
/// The view borrows the backing buffer for its whole lifetime; it is meant
/// for call-scoped use while mapping one symbol or one PRG.
pub struct ReBufferView<'a> {
    inner: &'a dyn ReBufferReader,
    offset: usize,
    count: usize,
}

impl<'a> ReBufferView<'a> {
    /// Window of `count` REs per slice starting at `offset`.
    pub fn new(inner: &'a dyn ReBufferReader, offset: usize, count: usize) -> Self {
        assert!(
            offset + count <= inner.nof_re(),
            "View range (i.e., {}..{}) exceeds the buffer size (i.e., {}).",
            offset,
            offset + count,
            inner.nof_re()
        );
        Self {
            inner,
            offset,
            count,
        }
    }
}

impl ReBufferReader for ReBufferView<'_> {
    fn nof_slices(&self) -> usize {
        self.inner.nof_slices()
    }

    fn nof_re(&self) -> usize {
        self.count
    }

    fn slice(&self, i_slice: usize) -> &[Complex32] {
        &self.inner.slice(i_slice)[self.offset..self.offset + self.count]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_slices_are_disjoint() {
        let mut buffer = ReBuffer::new(2, 4);
        buffer.slice_mut(0).fill(Complex32::new(1.0, 0.0));
        buffer.slice_mut(1).fill(Complex32::new(2.0, 0.0));

        assert_eq!(buffer.slice(0)[3], Complex32::new(1.0, 0.0));
        assert_eq!(buffer.slice(1)[0], Complex32::new(2.0, 0.0));
    }

    #[test]
    fn test_resize_reuses_allocation() {
        let mut buffer = ReBuffer::new(4, 100);
        buffer.resize(2, 10);
        assert_eq!(buffer.nof_slices(), 2);
        assert_eq!(buffer.nof_re(), 10);
        assert_eq!(buffer.slice(1).len(), 10);

        buffer.resize(8, 100);
        assert_eq!(buffer.slice(7).len(), 100);
    }

    #[test]
    fn test_view_windows_every_slice() {
        let mut buffer = ReBuffer::new(2, 8);
        for i_slice in 0..2 {
            for (i_re, value) in buffer.slice_mut(i_slice).iter_mut().enumerate() {
                *value = Complex32::new((i_slice * 8 + i_re) as f32, 0.0);
            }
        }

        let view = ReBufferView::new(&buffer, 3, 2);
        assert_eq!(view.nof_slices(), 2);
        assert_eq!(view.nof_re(), 2);
        assert_eq!(view.slice(0)[0], Complex32::new(3.0, 0.0));
        assert_eq!(view.slice(1)[1], Complex32::new(12.0, 0.0));
    }

    #[test]
    #[should_panic(expected = "exceeds the buffer size")]
    fn test_view_out_of_range_panics() {
        let buffer = ReBuffer::new(1, 4);
        let _ = ReBufferView::new(&buffer, 2, 3);
    }
}
