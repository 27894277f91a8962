//! Gpu storage buffers.

use crate::device::DeviceBuffer;
use crate::gpu::GpuInstance;
use bytemuck::Pod;
use std::marker::PhantomData;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{Buffer, BufferDescriptor, BufferUsages, CommandEncoder, Device, Queue};

/// Helper struct for creating gpu storage buffers.
///
/// It is generally more convenient to call [`GpuBuffer::init`] or [`GpuBuffer::uninit`].
pub struct BufferBuilder {
    len: u32,
    usage: BufferUsages,
    label: Option<String>,
}

impl BufferBuilder {
    /// Starts building a buffer of `len` elements.
    pub fn new(len: u32, usage: BufferUsages) -> Self {
        Self {
            len,
            usage,
            label: None,
        }
    }

    /// Sets the debug label of this buffer.
    pub fn label(mut self, label: String) -> Self {
        self.label = Some(label);
        self
    }

    /// Builds a zero-initialized buffer.
    pub fn build<T: Pod>(self, device: &Device) -> GpuBuffer<T> {
        let buffer = device.create_buffer(&BufferDescriptor {
            label: self.label.as_deref(),
            size: std::mem::size_of::<T>() as u64 * self.len as u64,
            usage: self.usage,
            mapped_at_creation: false,
        });

        GpuBuffer {
            len: self.len,
            buffer,
            phantom: PhantomData,
        }
    }

    /// Builds this buffer with the first `len` elements of `data` as its initial value.
    pub fn build_init<T: Pod>(self, device: &Device, data: &[T]) -> GpuBuffer<T> {
        assert!(
            data.len() >= self.len as usize,
            "Incorrect number of elements provided for initializing a buffer. \
            Expected at least {}, found {}",
            self.len,
            data.len()
        );

        let buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: self.label.as_deref(),
            contents: bytemuck::cast_slice(&data[..self.len as usize]),
            usage: self.usage,
        });

        GpuBuffer {
            len: self.len,
            buffer,
            phantom: PhantomData,
        }
    }
}

/// A typed storage buffer on the gpu.
pub struct GpuBuffer<T> {
    len: u32,
    buffer: Buffer,
    phantom: PhantomData<T>,
}

impl<T: Pod> GpuBuffer<T> {
    /// Usage flags of buffers readable and writable by kernels and transfers.
    pub const STORAGE: BufferUsages = BufferUsages::STORAGE
        .union(BufferUsages::COPY_SRC)
        .union(BufferUsages::COPY_DST);

    /// Creates a storage buffer initialized with `data`.
    pub fn init(device: &Device, data: &[T]) -> Self {
        BufferBuilder::new(data.len() as u32, Self::STORAGE).build_init(device, data)
    }

    /// Creates a zero-initialized storage buffer of `len` elements.
    pub fn uninit(device: &Device, len: u32) -> Self {
        BufferBuilder::new(len, Self::STORAGE).build(device)
    }

    /// The number of elements in this buffer.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Is this buffer empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The size, in bytes, of this buffer’s content.
    pub fn bytes_len(&self) -> u64 {
        std::mem::size_of::<T>() as u64 * self.len as u64
    }

    /// The underlying wgpu buffer.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Queues a buffer-to-buffer copy from `source` to `self`.
    ///
    /// Panics if the lengths do not match.
    pub fn copy_from(&self, encoder: &mut CommandEncoder, source: &GpuBuffer<T>) {
        assert_eq!(self.len, source.len);
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &self.buffer, 0, self.bytes_len())
    }

    /// Queues the overwrite of the first `data.len()` elements of this buffer.
    pub fn write(&self, queue: &Queue, data: &[T]) {
        assert!(data.len() <= self.len as usize);
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
    }

    /// Reads the buffer’s content into a vector, once every submitted kernel completed.
    pub async fn read(&self, gpu: &GpuInstance) -> anyhow::Result<Vec<T>> {
        if self.is_empty() {
            return Ok(vec![]);
        }

        let device = gpu.device();
        let staging = device.create_buffer(&BufferDescriptor {
            label: Some("wgblas staging"),
            size: self.bytes_len(),
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, self.bytes_len());
        gpu.queue().submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = async_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = sender.force_send(v);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        receiver.recv().await??;

        let data = slice.get_mapped_range();
        let result = bytemuck::try_cast_slice(&data)?.to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }
}

impl DeviceBuffer for GpuBuffer<f32> {
    type Scalar = f32;

    fn len(&self) -> u32 {
        self.len
    }
}
