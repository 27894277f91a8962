//! The `wgpu` device backend.

use crate::codegen;
use crate::device::{AsyncHandler, Device, DeviceLimits, ErrorChannel, Queue};
use crate::error::DeviceError;
use crate::kernel::{split_workgroups, CommandEncoderExt, Kernel, KernelBody, KernelDispatch};
use crate::shapes::UniformPool;
use crate::tensor::GpuBuffer;
use crate::utils;
use dashmap::DashMap;
use std::sync::Arc;
use wgpu::{Adapter, Buffer, ComputePipeline, Instance};

/// Helper struct to initialize a device and its queue.
pub struct GpuInstance {
    _instance: Instance,
    adapter: Adapter,
    device: Arc<wgpu::Device>,
    queue: wgpu::Queue,
}

impl GpuInstance {
    /// Initializes a wgpu instance and create its queue.
    ///
    /// The device is requested with the adapter’s own limits, so that kernels may bind as many
    /// storage buffers as the hardware allows.
    pub async fn new() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("Failed to initialize gpu adapter."))?;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("wgblas"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        Ok(Self {
            _instance: instance,
            adapter,
            device: Arc::new(device),
            queue,
        })
    }

    /// The `wgpu` device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The shared `wgpu` device.
    pub fn device_arc(&self) -> Arc<wgpu::Device> {
        self.device.clone()
    }

    /// The `wgpu` queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The `wgpu` adapter the device was created from.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

/// A gpu device running generated WGSL kernels.
///
/// Pipelines are cached by generated source, so kernels with the same structure are compiled
/// once whatever their parameter values.
pub struct GpuDevice {
    instance: GpuInstance,
    limits: DeviceLimits,
    pipelines: DashMap<String, Arc<ComputePipeline>>,
    uniforms: UniformPool,
    errors: ErrorChannel,
}

impl GpuDevice {
    /// Preferred work-group size of elementwise kernels.
    pub const WORKGROUP_SIZE: u32 = 64;
    /// Preferred work-group size of reduction kernels.
    pub const REDUCTION_WORKGROUP_SIZE: u32 = 256;

    /// Initializes a gpu device.
    pub async fn new() -> anyhow::Result<Self> {
        Ok(Self::from_instance(GpuInstance::new().await?, None))
    }

    /// Initializes a gpu device reporting asynchronous errors to `handler`.
    pub async fn with_handler(handler: AsyncHandler) -> anyhow::Result<Self> {
        Ok(Self::from_instance(GpuInstance::new().await?, Some(handler)))
    }

    /// Wraps an already initialized instance.
    pub fn from_instance(instance: GpuInstance, handler: Option<AsyncHandler>) -> Self {
        let errors = match handler {
            Some(handler) => ErrorChannel::with_handler(handler),
            None => ErrorChannel::new(),
        };
        let sender = errors.sender();
        instance
            .device()
            .on_uncaptured_error(Box::new(move |error: wgpu::Error| {
                tracing::warn!(%error, "uncaptured gpu error");
                let _ = sender.try_send(DeviceError::Gpu(error.to_string()));
            }));

        let hw = instance.device().limits();
        let max_workgroup_size = hw
            .max_compute_workgroup_size_x
            .min(hw.max_compute_invocations_per_workgroup);
        let limits = DeviceLimits {
            max_workgroup_size,
            max_workgroups_per_dimension: hw.max_compute_workgroups_per_dimension,
            max_bindings: hw.max_storage_buffers_per_shader_stage,
            workgroup_size: Self::WORKGROUP_SIZE.min(max_workgroup_size),
            reduction_workgroup_size: Self::REDUCTION_WORKGROUP_SIZE.min(max_workgroup_size),
        };

        Self {
            instance,
            limits,
            pipelines: DashMap::new(),
            uniforms: UniformPool::new(),
            errors,
        }
    }

    /// The underlying instance.
    pub fn instance(&self) -> &GpuInstance {
        &self.instance
    }

    /// The `wgpu` device.
    pub fn device(&self) -> &wgpu::Device {
        self.instance.device()
    }

    /// The `wgpu` queue.
    pub fn queue(&self) -> &wgpu::Queue {
        self.instance.queue()
    }

    /// The number of compiled pipelines.
    pub fn num_cached_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    /// Reads back the content of `buffer`.
    pub async fn read(&self, buffer: &GpuBuffer<f32>) -> anyhow::Result<Vec<f32>> {
        buffer.read(&self.instance).await
    }

    fn pipeline(
        &self,
        kernel: &Kernel<'_, GpuBuffer<f32>>,
    ) -> Result<Arc<ComputePipeline>, DeviceError> {
        let src = codegen::generate(kernel);
        if let Some(pipeline) = self.pipelines.get(&src) {
            return Ok(pipeline.clone());
        }

        tracing::debug!(label = kernel.label, "compiling kernel");
        let module = codegen::compose(&src)?;
        let pipeline = Arc::new(utils::load_module(
            self.device(),
            kernel.label,
            codegen::ENTRY_POINT,
            module,
        ));
        self.pipelines.insert(src, pipeline.clone());
        Ok(pipeline)
    }
}

impl Queue for GpuDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn wait(&self) -> Result<(), DeviceError> {
        let _ = self.device().poll(wgpu::Maintain::Wait);
        self.errors.throw()
    }
}

impl Device<GpuBuffer<f32>> for GpuDevice {
    fn create_buffer(&self, data: &[f32]) -> GpuBuffer<f32> {
        GpuBuffer::init(self.device(), data)
    }

    fn create_scratch(&self, len: u32) -> Result<GpuBuffer<f32>, DeviceError> {
        Ok(GpuBuffer::uninit(self.device(), len))
    }

    fn submit(&self, kernel: &Kernel<'_, GpuBuffer<f32>>) -> Result<(), DeviceError> {
        if kernel.num_workgroups == 0 {
            return Ok(());
        }

        let max_per_dim = self.limits.max_workgroups_per_dimension;
        let workgroups = match &kernel.body {
            KernelBody::Elementwise(_) => split_workgroups(kernel.num_workgroups, max_per_dim),
            KernelBody::Reduce(_) if kernel.num_workgroups <= max_per_dim => {
                [kernel.num_workgroups, 1, 1]
            }
            KernelBody::Reduce(_) => {
                return Err(DeviceError::UnsupportedLaunch(format!(
                    "{} reduction work-groups exceed the device limit of {max_per_dim}",
                    kernel.num_workgroups
                )))
            }
        };

        let pipeline = self.pipeline(kernel)?;
        let params = self
            .uniforms
            .acquire(self.device(), self.queue(), &kernel.params());

        tracing::trace!(
            label = kernel.label,
            ?workgroups,
            workgroup_size = kernel.workgroup_size,
            "gpu dispatch"
        );

        let mut encoder = self.device().create_command_encoder(&Default::default());
        {
            let mut inputs: Vec<&Buffer> = vec![params.as_ref()];
            inputs.extend(kernel.bindings.iter().map(|b| b.buffer.buffer()));
            let mut pass = encoder.compute_pass(kernel.label);
            KernelDispatch::new(self.device(), &mut pass, &pipeline)
                .bind0(&inputs)
                .dispatch(workgroups);
        }
        self.queue().submit(Some(encoder.finish()));
        self.uniforms.release(params);

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::GpuDevice;
    use crate::device::{Device, Queue};
    use crate::kernel::{
        Access, BinaryOp, Binding, Kernel, KernelBody, KernelExpr, ReduceBody, ReduceOp,
        ReduceOperand, Store,
    };
    use crate::shapes::ViewShape;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    #[futures_test::test]
    #[serial_test::serial]
    async fn gpu_elementwise_and_reduction() {
        let Ok(gpu) = GpuDevice::new().await else {
            // No adapter available.
            return;
        };

        const LEN: u32 = 10_000;
        let x = DVector::<f32>::new_random(LEN as usize);
        let y = DVector::<f32>::new_random(LEN as usize);
        let gpu_x = gpu.create_buffer(x.as_slice());
        let gpu_y = gpu.create_buffer(y.as_slice());
        let gpu_out = gpu.create_scratch(2).unwrap();

        let axpy = Kernel {
            label: "axpy",
            bindings: vec![
                Binding {
                    buffer: &gpu_y,
                    access: Access::ReadWrite,
                },
                Binding {
                    buffer: &gpu_x,
                    access: Access::Read,
                },
            ],
            shapes: vec![ViewShape::vector(0, 1, LEN)],
            lens: vec![LEN],
            scalars: vec![1.5],
            body: KernelBody::Elementwise(vec![Store {
                binding: 0,
                shape: 0,
                len: 0,
                value: KernelExpr::Binary(
                    BinaryOp::Add,
                    Box::new(KernelExpr::Load {
                        binding: 0,
                        shape: 0,
                    }),
                    Box::new(KernelExpr::Binary(
                        BinaryOp::Mul,
                        Box::new(KernelExpr::Scalar(0)),
                        Box::new(KernelExpr::Load {
                            binding: 1,
                            shape: 0,
                        }),
                    )),
                ),
            }]),
            workgroup_size: 64,
            num_workgroups: LEN.div_ceil(64),
        };
        gpu.submit(&axpy).unwrap();

        let asum = Kernel {
            label: "asum",
            bindings: vec![
                Binding {
                    buffer: &gpu_y,
                    access: Access::Read,
                },
                Binding {
                    buffer: &gpu_out,
                    access: Access::ReadWrite,
                },
            ],
            shapes: vec![ViewShape::vector(0, 1, LEN), ViewShape::vector(0, 1, 2)],
            lens: vec![LEN],
            scalars: vec![],
            body: KernelBody::Reduce(ReduceBody {
                op: ReduceOp::AbsSum,
                len: 0,
                map_source: true,
                accumulate: false,
                operands: vec![ReduceOperand {
                    source: KernelExpr::Load {
                        binding: 0,
                        shape: 0,
                    },
                    output: 1,
                    output_shape: 1,
                }],
            }),
            workgroup_size: 256,
            num_workgroups: 2,
        };
        gpu.submit(&asum).unwrap();
        gpu.wait().unwrap();

        let expected_y = &y + &x * 1.5;
        let result_y = DVector::from(gpu.read(&gpu_y).await.unwrap());
        assert_relative_eq!(result_y, expected_y, epsilon = 1.0e-5);

        let partials = gpu.read(&gpu_out).await.unwrap();
        let expected = expected_y.iter().map(|e| e.abs()).sum::<f32>();
        assert_relative_eq!(partials[0] + partials[1], expected, max_relative = 1.0e-4);
        assert_eq!(gpu.num_cached_pipelines(), 2);
    }
}
