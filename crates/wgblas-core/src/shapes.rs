//! Strided operand shapes and the uniform buffers carrying them to the gpu.

use dashmap::DashMap;
use std::sync::Arc;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{Buffer, BufferUsages, Device, Queue};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
/// The shape of a strided vector or matrix operand over a device buffer.
///
/// Logical element `i` of a `rows x cols` operand is `(r, c) = (i % rows, i / rows)` and lives at
/// `offset + r * row_stride + c * col_stride` in the underlying buffer.
pub struct ViewShape {
    /// Index of the operand’s first element in the underlying buffer.
    pub offset: u32,
    /// Number of logical rows (the vector length for vectors).
    pub rows: u32,
    /// Buffer distance between two consecutive rows.
    pub row_stride: i32,
    /// Buffer distance between two consecutive columns.
    pub col_stride: i32,
}

impl ViewShape {
    /// The shape of a vector of `len` elements starting at `offset` and spaced by `stride`.
    pub fn vector(offset: u32, stride: i32, len: u32) -> Self {
        Self {
            offset,
            rows: len,
            row_stride: stride,
            col_stride: 0,
        }
    }

    /// The shape of a dense matrix with `rows` rows, stored with the leading dimension `ld`.
    pub fn matrix(offset: u32, rows: u32, row_major: bool, ld: u32) -> Self {
        let (row_stride, col_stride) = if row_major {
            (ld as i32, 1)
        } else {
            (1, ld as i32)
        };

        Self {
            offset,
            rows,
            row_stride,
            col_stride,
        }
    }

    /// The buffer index of the logical element `i`.
    ///
    /// The result may be negative or past the end of the buffer if the shape is inconsistent
    /// with it; device backends decide how such accesses are reported.
    pub fn index(&self, i: u32) -> i64 {
        let rows = self.rows.max(1);
        let (r, c) = (i % rows, i / rows);
        self.offset as i64 + r as i64 * self.row_stride as i64 + c as i64 * self.col_stride as i64
    }

    /// Packs this shape into one slot of a kernel parameter buffer.
    pub fn to_param(self) -> [u32; 4] {
        bytemuck::cast(self)
    }
}

/// A pool of uniform buffers holding kernel parameters.
///
/// Uniforms are used instead of push-constants because the latter is an optional extension.
/// Buffers are recycled by size once the kernel using them has been submitted: a later
/// `Queue::write_buffer` only takes effect at the next submission, after the previous one.
#[derive(Default)]
pub struct UniformPool {
    recycled: DashMap<u64, Vec<Arc<Buffer>>>,
}

impl UniformPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a uniform buffer containing `params`, reusing a recycled one if possible.
    pub fn acquire(&self, device: &Device, queue: &Queue, params: &[[u32; 4]]) -> Arc<Buffer> {
        let contents: &[u8] = bytemuck::cast_slice(params);
        let size = contents.len() as u64;
        let recycled = self
            .recycled
            .get_mut(&size)
            .and_then(|mut buffers| buffers.pop());

        if let Some(buffer) = recycled {
            queue.write_buffer(&buffer, 0, contents);
            buffer
        } else {
            Arc::new(device.create_buffer_init(&BufferInitDescriptor {
                label: Some("wgblas kernel params"),
                contents,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            }))
        }
    }

    /// Gives `buffer` back to the pool.
    pub fn release(&self, buffer: Arc<Buffer>) {
        self.recycled.entry(buffer.size()).or_default().push(buffer);
    }

    /// The number of buffers waiting to be reused.
    pub fn num_recycled(&self) -> usize {
        self.recycled.iter().map(|entry| entry.len()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::ViewShape;

    #[test]
    fn vector_indices() {
        let shape = ViewShape::vector(10, -3, 4);
        let indices: Vec<_> = (0..4).map(|i| shape.index(i)).collect();
        assert_eq!(indices, [10, 7, 4, 1]);
        assert_eq!(ViewShape::vector(5, 0, 3).index(2), 5);
    }

    #[test]
    fn matrix_indices() {
        // 2x3 column-major block with ld 4, starting at 1.
        let shape = ViewShape::matrix(1, 2, false, 4);
        assert_eq!(shape.index(0), 1);
        assert_eq!(shape.index(1), 2);
        assert_eq!(shape.index(2), 5);
        assert_eq!(shape.index(5), 10);

        // Same block, row-major with ld 3.
        let shape = ViewShape::matrix(0, 2, true, 3);
        let indices: Vec<_> = (0..6).map(|i| shape.index(i)).collect();
        assert_eq!(indices, [0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn params_layout() {
        let shape = ViewShape::vector(7, -2, 9);
        assert_eq!(shape.to_param(), [7, 9, (-2i32) as u32, 0]);
    }
}
