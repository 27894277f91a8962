//! Strided vector and matrix views over device buffers.
//!
//! Views never own storage: they borrow a buffer and describe which of its elements form the
//! operand. Every view asserts at construction that all the elements it addresses lie inside
//! the buffer.

use std::fmt;
use wgblas_core::host::HostBuffer;
use wgblas_core::shapes::ViewShape;
use wgblas_core::{DeviceBuffer, Scalar};

fn assert_in_bounds(buffer_len: u32, first: u32, stride: i64, len: u32) {
    if len == 0 {
        return;
    }

    let last = first as i64 + (len as i64 - 1) * stride;
    assert!(
        first < buffer_len && last >= 0 && last < buffer_len as i64,
        "view out of bounds: elements {first}..={last} of a buffer of length {buffer_len}"
    );
}

/// A strided view of `len` elements of a buffer.
///
/// Logical element `i` is `buffer[disp + i * stride]`. The stride may be negative, or zero for
/// a broadcast view where every element aliases `buffer[disp]`.
pub struct VectorView<'a, B> {
    buffer: &'a B,
    disp: u32,
    stride: i32,
    len: u32,
}

impl<B> Clone for VectorView<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for VectorView<'_, B> {}

impl<B> fmt::Debug for VectorView<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorView")
            .field("disp", &self.disp)
            .field("stride", &self.stride)
            .field("len", &self.len)
            .finish()
    }
}

impl<'a, B: DeviceBuffer> From<&'a B> for VectorView<'a, B> {
    fn from(buffer: &'a B) -> Self {
        Self::new(buffer, 0, 1, buffer.len())
    }
}

impl<'a, B: DeviceBuffer> VectorView<'a, B> {
    /// A view of the `len` elements `buffer[disp + i * stride]`.
    ///
    /// Panics if any of them is outside of the buffer.
    pub fn new(buffer: &'a B, disp: u32, stride: i32, len: u32) -> Self {
        assert_in_bounds(buffer.len(), disp, stride as i64, len);
        Self {
            buffer,
            disp,
            stride,
            len,
        }
    }

    /// The viewed buffer.
    pub fn buffer(&self) -> &'a B {
        self.buffer
    }

    /// Index of the first element in the buffer.
    pub fn disp(&self) -> u32 {
        self.disp
    }

    /// Buffer distance between two consecutive elements.
    pub fn stride(&self) -> i32 {
        self.stride
    }

    /// The number of elements.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Is this view empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Is this a broadcast view with more than one element?
    pub fn is_broadcast(&self) -> bool {
        self.stride == 0 && self.len > 1
    }

    /// The buffer index of logical element `i`.
    pub fn address(&self, i: u32) -> u32 {
        (self.disp as i64 + i as i64 * self.stride as i64) as u32
    }

    /// A view with the same first element, but a different stride and length.
    pub fn restride(&self, stride: i32, len: u32) -> Self {
        Self::new(self.buffer, self.disp, stride, len)
    }

    /// The `len` elements starting at logical element `first`.
    pub fn sub(&self, first: u32, len: u32) -> Self {
        assert!(
            first as u64 + len as u64 <= self.len as u64,
            "sub-view {first}..{} out of a view of {} elements",
            first as u64 + len as u64,
            self.len
        );
        if len == 0 {
            return Self { len: 0, ..*self };
        }
        Self::new(self.buffer, self.address(first), self.stride, len)
    }

    /// A single-element view of logical element `i`.
    pub fn element(&self, i: u32) -> Self {
        self.sub(i, 1)
    }

    /// A view repeating logical element `i` `len` times.
    pub fn broadcast(&self, i: u32, len: u32) -> Self {
        assert!(i < self.len, "broadcast element {i} out of {}", self.len);
        Self::new(self.buffer, self.address(i), 0, len)
    }

    /// The shape of this view, as seen by kernels.
    pub fn shape(&self) -> ViewShape {
        ViewShape::vector(self.disp, self.stride, self.len)
    }
}

impl<T: Scalar> VectorView<'_, HostBuffer<T>> {
    /// Reads logical element `i`.
    pub fn eval(&self, i: u32) -> T {
        assert!(i < self.len);
        self.buffer.get(self.address(i) as usize)
    }

    /// Overwrites logical element `i`.
    pub fn set(&self, i: u32, value: T) {
        assert!(i < self.len);
        self.buffer.set(self.address(i) as usize, value)
    }

    /// Copies the viewed elements into a vector.
    pub fn to_vec(&self) -> Vec<T> {
        (0..self.len).map(|i| self.eval(i)).collect()
    }
}

/// A dense matrix view of a buffer.
///
/// In row-major order, element `(r, c)` is `buffer[disp + r * ld + c]`; in column-major order it
/// is `buffer[disp + c * ld + r]`.
pub struct MatrixView<'a, B> {
    buffer: &'a B,
    rows: u32,
    cols: u32,
    row_major: bool,
    ld: u32,
    disp: u32,
}

impl<B> Clone for MatrixView<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for MatrixView<'_, B> {}

impl<B> fmt::Debug for MatrixView<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixView")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("row_major", &self.row_major)
            .field("ld", &self.ld)
            .field("disp", &self.disp)
            .finish()
    }
}

impl<'a, B: DeviceBuffer> MatrixView<'a, B> {
    /// A `rows x cols` view with leading dimension `ld`, starting at `buffer[disp]`.
    ///
    /// Panics if `ld` is smaller than the length of a row (row-major) or column (column-major),
    /// or if the last element is outside of the buffer.
    pub fn new(buffer: &'a B, rows: u32, cols: u32, row_major: bool, ld: u32, disp: u32) -> Self {
        let (major, minor) = if row_major { (rows, cols) } else { (cols, rows) };
        assert!(
            ld >= minor,
            "leading dimension {ld} smaller than the minor dimension {minor}"
        );
        if major > 0 && minor > 0 {
            let last = disp as u64 + (major as u64 - 1) * ld as u64 + minor as u64 - 1;
            assert!(
                last < buffer.len() as u64,
                "matrix view out of bounds: element {last} of a buffer of length {}",
                buffer.len()
            );
        }

        Self {
            buffer,
            rows,
            cols,
            row_major,
            ld,
            disp,
        }
    }

    /// A dense `rows x cols` view of the beginning of `buffer`, without padding.
    pub fn from_buffer(buffer: &'a B, rows: u32, cols: u32, row_major: bool) -> Self {
        let ld = if row_major { cols } else { rows };
        Self::new(buffer, rows, cols, row_major, ld, 0)
    }

    /// The viewed buffer.
    pub fn buffer(&self) -> &'a B {
        self.buffer
    }

    /// Number of rows.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Are the elements of a row contiguous?
    pub fn is_row_major(&self) -> bool {
        self.row_major
    }

    /// Buffer distance between two consecutive rows (row-major) or columns (column-major).
    pub fn ld(&self) -> u32 {
        self.ld
    }

    /// Index of element `(0, 0)` in the buffer.
    pub fn disp(&self) -> u32 {
        self.disp
    }

    /// The buffer index of element `(r, c)`.
    pub fn address(&self, r: u32, c: u32) -> u32 {
        if self.row_major {
            self.disp + r * self.ld + c
        } else {
            self.disp + c * self.ld + r
        }
    }

    /// The `rows x cols` block starting at element `(row_off, col_off)`.
    pub fn sub_view(&self, row_off: u32, col_off: u32, rows: u32, cols: u32) -> Self {
        assert!(
            row_off + rows <= self.rows && col_off + cols <= self.cols,
            "block ({row_off}, {col_off}) + ({rows}, {cols}) out of a {}x{} view",
            self.rows,
            self.cols
        );
        let disp = if rows > 0 && cols > 0 {
            self.address(row_off, col_off)
        } else {
            self.disp
        };
        Self::new(self.buffer, rows, cols, self.row_major, self.ld, disp)
    }

    /// The block remaining after skipping the first `row_off` rows and `col_off` columns.
    pub fn shifted(&self, row_off: u32, col_off: u32) -> Self {
        self.sub_view(row_off, col_off, self.rows - row_off, self.cols - col_off)
    }

    /// The transposed matrix, over the same storage.
    pub fn transposed(&self) -> Self {
        Self {
            rows: self.cols,
            cols: self.rows,
            row_major: !self.row_major,
            ..*self
        }
    }

    /// Row `i`, as a vector of `cols` elements.
    pub fn row(&self, i: u32) -> VectorView<'a, B> {
        assert!(i < self.rows, "row {i} out of {}", self.rows);
        let stride = if self.row_major { 1 } else { self.ld as i32 };
        VectorView::new(self.buffer, self.address(i, 0), stride, self.cols)
    }

    /// Column `j`, as a vector of `rows` elements.
    pub fn column(&self, j: u32) -> VectorView<'a, B> {
        assert!(j < self.cols, "column {j} out of {}", self.cols);
        let stride = if self.row_major { self.ld as i32 } else { 1 };
        VectorView::new(self.buffer, self.address(0, j), stride, self.rows)
    }

    /// The shape of this view, as seen by kernels.
    pub fn shape(&self) -> ViewShape {
        ViewShape::matrix(self.disp, self.rows, self.row_major, self.ld)
    }
}

impl<T: Scalar> MatrixView<'_, HostBuffer<T>> {
    /// Reads element `(r, c)`.
    pub fn eval(&self, r: u32, c: u32) -> T {
        assert!(r < self.rows && c < self.cols);
        self.buffer.get(self.address(r, c) as usize)
    }
}

#[cfg(test)]
mod test {
    use super::{MatrixView, VectorView};
    use wgblas_core::host::HostBuffer;

    fn iota(len: u32) -> HostBuffer<f64> {
        HostBuffer::from_slice(&(0..len).map(|i| i as f64).collect::<Vec<_>>())
    }

    #[test]
    fn vector_addressing() {
        let buffer = iota(20);
        for (disp, stride, len) in [(0, 1, 20), (3, 2, 8), (19, -3, 7), (5, 0, 4)] {
            let v = VectorView::new(&buffer, disp, stride, len);
            for i in 0..len {
                let expected = (disp as i64 + i as i64 * stride as i64) as f64;
                assert_eq!(v.eval(i), expected);
                assert_eq!(v.shape().index(i), expected as i64);
            }
        }

        let v = VectorView::from(&buffer).restride(3, 5);
        assert_eq!(v.to_vec(), [0.0, 3.0, 6.0, 9.0, 12.0]);
        assert_eq!(v.sub(2, 2).to_vec(), [6.0, 9.0]);
        assert_eq!(v.element(4).to_vec(), [12.0]);
        assert_eq!(v.broadcast(1, 3).to_vec(), [3.0, 3.0, 3.0]);
    }

    #[test]
    fn set_writes_through() {
        let buffer = iota(6);
        let v = VectorView::new(&buffer, 5, -2, 3);
        v.set(1, -1.0);
        assert_eq!(buffer.to_vec(), [0.0, 1.0, 2.0, -1.0, 4.0, 5.0]);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_view() {
        let buffer = iota(10);
        let _ = VectorView::new(&buffer, 1, 3, 4);
    }

    #[test]
    #[should_panic]
    fn negative_stride_underflow() {
        let buffer = iota(10);
        let _ = VectorView::new(&buffer, 2, -1, 4);
    }

    #[test]
    fn matrix_decomposition() {
        let buffer = iota(40);
        for row_major in [true, false] {
            // 4x5 matrix with padding, starting at element 2.
            let m = MatrixView::new(&buffer, 4, 5, row_major, 7, 2);
            for r in 0..4 {
                let row = m.row(r);
                for c in 0..5 {
                    let expected = m.eval(r, c);
                    assert_eq!(row.eval(c), expected);
                    assert_eq!(m.column(c).eval(r), expected);
                    assert_eq!(m.transposed().eval(c, r), expected);
                    assert_eq!(m.shape().index(r + c * 4), expected as i64);
                }
            }
            assert_eq!(m.row(0).stride(), if row_major { 1 } else { 7 });
            assert_eq!(m.column(0).stride(), if row_major { 7 } else { 1 });
        }
    }

    #[test]
    fn shifted_blocks() {
        let buffer = iota(30);
        let m = MatrixView::from_buffer(&buffer, 5, 6, false);
        let s = m.shifted(3, 5);
        assert_eq!((s.rows(), s.cols()), (2, 1));
        assert_eq!(s.eval(0, 0), m.eval(3, 5));
        assert_eq!(s.eval(1, 0), 29.0);
        let b = m.sub_view(1, 2, 2, 3);
        assert_eq!(b.eval(1, 2), m.eval(2, 4));
        assert!(b.transposed().is_row_major());
    }

    #[test]
    #[should_panic]
    fn leading_dimension_too_small() {
        let buffer = iota(30);
        let _ = MatrixView::new(&buffer, 5, 6, true, 5, 0);
    }
}
