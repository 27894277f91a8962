//! A host device emulating work-groups on the rayon thread pool.
//!
//! Each work-group runs on one rayon task; its work-items run one after the other, with
//! work-group memory and barriers emulated by running every lane up to the barrier before the
//! next phase. This gives the exact summation order of a gpu tree reduction.

use crate::device::{AsyncHandler, Device, DeviceBuffer, DeviceLimits, ErrorChannel, Queue};
use crate::error::DeviceError;
use crate::kernel::{Kernel, KernelBody, KernelExpr, ReduceBody, Store};
use crate::scalar::Scalar;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// A buffer in host memory.
pub struct HostBuffer<T: Scalar> {
    cells: Box<[T::Cell]>,
}

impl<T: Scalar> HostBuffer<T> {
    /// Creates a buffer containing a copy of `data`.
    pub fn from_slice(data: &[T]) -> Self {
        Self {
            cells: data.iter().map(|x| T::new_cell(*x)).collect(),
        }
    }

    /// Creates a buffer of `len` zeros.
    pub fn zeros(len: u32) -> Self {
        Self {
            cells: (0..len).map(|_| T::new_cell(T::zero())).collect(),
        }
    }

    /// Reads the element at `index`.
    ///
    /// Panics if `index` is out of bounds.
    pub fn get(&self, index: usize) -> T {
        T::load(&self.cells[index])
    }

    /// Overwrites the element at `index`.
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&self, index: usize, value: T) {
        T::store(&self.cells[index], value)
    }

    /// Copies the buffer’s content into a vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.cells.iter().map(T::load).collect()
    }

    /// Overwrites the first `data.len()` elements of this buffer.
    ///
    /// Panics if `data` is longer than the buffer.
    pub fn write(&self, data: &[T]) {
        assert!(
            data.len() <= self.cells.len(),
            "cannot write {} elements into a buffer of {}",
            data.len(),
            self.cells.len()
        );
        for (cell, x) in self.cells.iter().zip(data) {
            T::store(cell, *x);
        }
    }

    fn try_get(&self, index: i64) -> Option<T> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.cells.get(i))
            .map(T::load)
    }

    fn try_set(&self, index: i64, value: T) -> bool {
        match usize::try_from(index).ok().and_then(|i| self.cells.get(i)) {
            Some(cell) => {
                T::store(cell, value);
                true
            }
            None => false,
        }
    }
}

impl<T: Scalar> DeviceBuffer for HostBuffer<T> {
    type Scalar = T;

    fn len(&self) -> u32 {
        self.cells.len() as u32
    }
}

/// A device running kernels on the host.
///
/// Submissions are synchronous: [`Device::submit`] returns once every work-group completed.
pub struct HostDevice {
    limits: DeviceLimits,
    errors: ErrorChannel,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    /// The default limits of the host emulator.
    pub const DEFAULT_LIMITS: DeviceLimits = DeviceLimits {
        max_workgroup_size: 1024,
        max_workgroups_per_dimension: u32::MAX,
        max_bindings: 16,
        workgroup_size: 64,
        reduction_workgroup_size: 8,
    };

    /// Creates a host device with the default limits.
    pub fn new() -> Self {
        Self::with_limits(Self::DEFAULT_LIMITS)
    }

    /// Creates a host device with custom limits.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            errors: ErrorChannel::new(),
        }
    }

    /// Creates a host device reporting asynchronous errors to `handler`.
    pub fn with_handler(handler: AsyncHandler) -> Self {
        Self {
            limits: Self::DEFAULT_LIMITS,
            errors: ErrorChannel::with_handler(handler),
        }
    }
}

impl Queue for HostDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn wait(&self) -> Result<(), DeviceError> {
        self.errors.throw()
    }
}

impl<T: Scalar> Device<HostBuffer<T>> for HostDevice {
    fn create_buffer(&self, data: &[T]) -> HostBuffer<T> {
        HostBuffer::from_slice(data)
    }

    fn create_scratch(&self, len: u32) -> Result<HostBuffer<T>, DeviceError> {
        Ok(HostBuffer::zeros(len))
    }

    fn submit(&self, kernel: &Kernel<'_, HostBuffer<T>>) -> Result<(), DeviceError> {
        if kernel.workgroup_size == 0 {
            return Err(DeviceError::UnsupportedLaunch(format!(
                "kernel `{}` has an empty work-group",
                kernel.label
            )));
        }

        tracing::trace!(
            label = kernel.label,
            workgroup_size = kernel.workgroup_size,
            num_workgroups = kernel.num_workgroups,
            "host dispatch"
        );

        let invocation = Invocation {
            kernel,
            out_of_bounds: AtomicBool::new(false),
            errors: &self.errors,
        };

        match &kernel.body {
            KernelBody::Elementwise(stores) => invocation.run_elementwise(stores),
            KernelBody::Reduce(body) => invocation.run_reduce(body),
        }

        Ok(())
    }
}

/// The state shared by all the work-groups of one launch.
struct Invocation<'k, 'a, T: Scalar> {
    kernel: &'k Kernel<'a, HostBuffer<T>>,
    out_of_bounds: AtomicBool,
    errors: &'k ErrorChannel,
}

impl<T: Scalar> Invocation<'_, '_, T> {
    fn report_out_of_bounds(&self, binding: u32, index: i64) {
        // Only the first faulty access of a launch is reported.
        if !self.out_of_bounds.swap(true, Ordering::Relaxed) {
            let len = self.kernel.bindings[binding as usize].buffer.len();
            self.errors.report(DeviceError::OutOfBounds {
                binding,
                index,
                len,
            });
        }
    }

    fn load(&self, binding: u32, shape: u32, i: u32) -> T {
        let index = self.kernel.shapes[shape as usize].index(i);
        let buffer = self.kernel.bindings[binding as usize].buffer;
        buffer.try_get(index).unwrap_or_else(|| {
            self.report_out_of_bounds(binding, index);
            T::zero()
        })
    }

    fn store(&self, binding: u32, shape: u32, i: u32, value: T) {
        let index = self.kernel.shapes[shape as usize].index(i);
        let buffer = self.kernel.bindings[binding as usize].buffer;
        if !buffer.try_set(index, value) {
            self.report_out_of_bounds(binding, index);
        }
    }

    fn eval(&self, expr: &KernelExpr, i: u32) -> T {
        match expr {
            KernelExpr::Load { binding, shape } => self.load(*binding, *shape, i),
            KernelExpr::Scalar(k) => self.kernel.scalars[*k as usize],
            KernelExpr::Unary(op, a) => op.apply(self.eval(a, i)),
            KernelExpr::Binary(op, a, b) => op.apply(self.eval(a, i), self.eval(b, i)),
        }
    }

    fn len(&self, len: u32) -> u32 {
        self.kernel.lens[len as usize]
    }

    fn run_elementwise(&self, stores: &[Store]) {
        let workgroup_size = self.kernel.workgroup_size as u64;
        (0..self.kernel.num_workgroups)
            .into_par_iter()
            .for_each(|group| {
                let first = group as u64 * workgroup_size;
                for i in first..first + workgroup_size {
                    for store in stores {
                        if i < self.len(store.len) as u64 {
                            let value = self.eval(&store.value, i as u32);
                            self.store(store.binding, store.shape, i as u32, value);
                        }
                    }
                }
            });
    }

    fn run_reduce(&self, body: &ReduceBody) {
        let local_size = self.kernel.workgroup_size as usize;
        let num_groups = self.kernel.num_workgroups as u64;
        let len = self.len(body.len) as u64;
        let step = num_groups * local_size as u64;
        let num_operands = body.operands.len();
        let op = body.op;

        (0..self.kernel.num_workgroups)
            .into_par_iter()
            .for_each(|group| {
                // Work-group memory: one region of `local_size` partials per operand.
                let mut partials = vec![op.init::<T>(); num_operands * local_size];

                for lane in 0..local_size {
                    let mut i = group as u64 * local_size as u64 + lane as u64;
                    while i < len {
                        for (k, operand) in body.operands.iter().enumerate() {
                            let mut x = self.eval(&operand.source, i as u32);
                            if body.map_source {
                                x = op.map(x);
                            }
                            let acc = &mut partials[k * local_size + lane];
                            *acc = op.combine(*acc, x);
                        }
                        i += step;
                    }
                }

                let mut s = local_size / 2;
                while s > 0 {
                    for region in partials.chunks_mut(local_size) {
                        for lane in 0..s {
                            region[lane] = op.combine(region[lane], region[lane + s]);
                        }
                    }
                    s /= 2;
                }

                for (k, operand) in body.operands.iter().enumerate() {
                    let mut result = partials[k * local_size];
                    if body.accumulate {
                        let prior = self.load(operand.output, operand.output_shape, group);
                        result = op.combine(prior, result);
                    }
                    self.store(operand.output, operand.output_shape, group, result);
                }
            });
    }
}

#[cfg(test)]
mod test {
    use super::{HostBuffer, HostDevice};
    use crate::device::{Device, Queue};
    use crate::error::DeviceError;
    use crate::kernel::{
        Access, BinaryOp, Binding, Kernel, KernelBody, KernelExpr, ReduceBody, ReduceOp,
        ReduceOperand, Store,
    };
    use crate::shapes::ViewShape;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn elementwise_axpy() {
        let device = HostDevice::new();
        let x = HostBuffer::from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let y = HostBuffer::from_slice(&[10.0, 20.0, 30.0, 40.0]);
        // y[0..2] += 2 * x[1..4 step 2]
        let kernel = Kernel {
            label: "axpy",
            bindings: vec![
                Binding {
                    buffer: &y,
                    access: Access::ReadWrite,
                },
                Binding {
                    buffer: &x,
                    access: Access::Read,
                },
            ],
            shapes: vec![ViewShape::vector(0, 1, 2), ViewShape::vector(1, 2, 2)],
            lens: vec![2],
            scalars: vec![2.0],
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
                            shape: 1,
                        }),
                    )),
                ),
            }]),
            workgroup_size: 64,
            num_workgroups: 1,
        };

        device.submit(&kernel).unwrap();
        device.wait().unwrap();
        assert_eq!(y.to_vec(), [14.0, 28.0, 30.0, 40.0]);
    }

    #[test]
    fn tree_reduction_per_group() {
        let device = HostDevice::new();
        let data: Vec<f64> = (0..1000).map(|i| (i as f64 - 500.0) / 7.0).collect();
        let x = HostBuffer::from_slice(&data);
        let out = HostBuffer::<f64>::zeros(3);
        let kernel = Kernel {
            label: "asum",
            bindings: vec![
                Binding {
                    buffer: &x,
                    access: Access::Read,
                },
                Binding {
                    buffer: &out,
                    access: Access::ReadWrite,
                },
            ],
            shapes: vec![ViewShape::vector(0, 1, 1000), ViewShape::vector(0, 1, 3)],
            lens: vec![1000],
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
            workgroup_size: 8,
            num_workgroups: 3,
        };

        device.submit(&kernel).unwrap();
        let total: f64 = out.to_vec().iter().sum();
        let expected: f64 = data.iter().map(|x| x.abs()).sum();
        assert_relative_eq!(total, expected, epsilon = 1.0e-9);
    }

    #[test]
    fn out_of_bounds_is_reported_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = calls.clone();
        let device = HostDevice::with_handler(Box::new(move |errors| {
            calls_in_handler.fetch_add(errors.len(), Ordering::SeqCst);
        }));
        let x = HostBuffer::from_slice(&[1.0f32, 2.0]);
        let kernel = Kernel {
            label: "oob",
            bindings: vec![Binding {
                buffer: &x,
                access: Access::ReadWrite,
            }],
            shapes: vec![ViewShape::vector(0, 1, 5)],
            lens: vec![5],
            scalars: vec![0.0],
            body: KernelBody::Elementwise(vec![Store {
                binding: 0,
                shape: 0,
                len: 0,
                value: KernelExpr::Scalar(0),
            }]),
            workgroup_size: 4,
            num_workgroups: 2,
        };

        device.submit(&kernel).unwrap();
        match device.wait() {
            Err(DeviceError::Async(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(errors[0], DeviceError::OutOfBounds { len: 2, .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(x.to_vec(), [0.0, 0.0]);
    }
}
