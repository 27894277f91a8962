//! The backend-neutral kernel IR, and utilities for dispatching compiled kernels.
//!
//! A [`Kernel`] is the flat form of a lowered operation: a table of buffer bindings, a table of
//! parameters (operand shapes, trip counts and scalars) and a body made of expressions over
//! them. Devices either interpret it (the host emulator) or generate a shader from it.

use crate::device::DeviceBuffer;
use crate::scalar::Scalar;
use crate::shapes::ViewShape;
use wgpu::{Buffer, CommandEncoder, ComputePass, ComputePassDescriptor, ComputePipeline, Device};

/// An elementwise binary operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `|a| + |b|`
    AbsAdd,
    /// `max(a, b)`
    Max,
    /// `min(a, b)`
    Min,
}

impl BinaryOp {
    /// Applies this operator.
    pub fn apply<T: Scalar>(self, a: T, b: T) -> T {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::AbsAdd => a.abs() + b.abs(),
            Self::Max => a.max(b),
            Self::Min => a.min(b),
        }
    }

    /// The WGSL expression applying this operator to `a` and `b`.
    pub fn wgsl(self, a: &str, b: &str) -> String {
        match self {
            Self::Add => format!("({a} + {b})"),
            Self::Sub => format!("({a} - {b})"),
            Self::Mul => format!("({a} * {b})"),
            Self::Div => format!("({a} / {b})"),
            Self::AbsAdd => format!("(abs({a}) + abs({b}))"),
            Self::Max => format!("max({a}, {b})"),
            Self::Min => format!("min({a}, {b})"),
        }
    }
}

/// An elementwise unary operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `|a|`
    Abs,
    /// `-a`
    Neg,
    /// `sqrt(a)`
    Sqrt,
}

impl UnaryOp {
    /// Applies this operator.
    pub fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Self::Abs => a.abs(),
            Self::Neg => -a,
            Self::Sqrt => a.sqrt(),
        }
    }

    /// The WGSL expression applying this operator to `a`.
    pub fn wgsl(self, a: &str) -> String {
        match self {
            Self::Abs => format!("abs({a})"),
            Self::Neg => format!("(-{a})"),
            Self::Sqrt => format!("sqrt({a})"),
        }
    }
}

/// A reduction operator.
///
/// Each operator is described by an identity value, a transform applied to the raw source
/// elements, and a commutative and associative combination of two partial results.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Sum of the elements.
    Sum,
    /// Sum of the absolute values of the elements.
    AbsSum,
    /// Sum of the squared elements.
    SqNorm,
    /// Largest element.
    Max,
    /// Smallest element.
    Min,
}

impl ReduceOp {
    /// The identity of [`Self::combine`].
    pub fn init<T: Scalar>(self) -> T {
        match self {
            Self::Sum | Self::AbsSum | Self::SqNorm => T::zero(),
            Self::Max => T::neg_infinity(),
            Self::Min => T::infinity(),
        }
    }

    /// Transforms a raw source element before it is accumulated.
    pub fn map<T: Scalar>(self, x: T) -> T {
        match self {
            Self::Sum | Self::Max | Self::Min => x,
            Self::AbsSum => x.abs(),
            Self::SqNorm => x * x,
        }
    }

    /// Combines two partial results.
    pub fn combine<T: Scalar>(self, a: T, b: T) -> T {
        match self {
            Self::Sum | Self::AbsSum | Self::SqNorm => a + b,
            Self::Max => a.max(b),
            Self::Min => a.min(b),
        }
    }

    /// Name of the `wgblas::reduce_ops` function returning the identity.
    pub fn init_fn(self) -> &'static str {
        match self {
            Self::Sum | Self::AbsSum | Self::SqNorm => "init_zero",
            Self::Max => "init_lowest",
            Self::Min => "init_highest",
        }
    }

    /// Name of the `wgblas::reduce_ops` function transforming source elements.
    pub fn map_fn(self) -> &'static str {
        match self {
            Self::Sum | Self::Max | Self::Min => "map_identity",
            Self::AbsSum => "map_abs",
            Self::SqNorm => "map_square",
        }
    }

    /// Name of the `wgblas::reduce_ops` function combining partial results.
    pub fn combine_fn(self) -> &'static str {
        match self {
            Self::Sum | Self::AbsSum | Self::SqNorm => "combine_sum",
            Self::Max => "combine_max",
            Self::Min => "combine_min",
        }
    }
}

/// An expression evaluated for one logical index of a kernel.
#[derive(Clone, Debug, PartialEq)]
pub enum KernelExpr {
    /// Reads element `i` of the operand with shape `shape` on binding `binding`.
    Load {
        /// Index into [`Kernel::bindings`].
        binding: u32,
        /// Index into [`Kernel::shapes`].
        shape: u32,
    },
    /// A scalar parameter, index into [`Kernel::scalars`].
    Scalar(u32),
    /// An elementwise unary operation.
    Unary(UnaryOp, Box<KernelExpr>),
    /// An elementwise binary operation.
    Binary(BinaryOp, Box<KernelExpr>, Box<KernelExpr>),
}

/// Writes `value` into element `i` of an operand, for every `i` below a trip count.
#[derive(Clone, Debug, PartialEq)]
pub struct Store {
    /// Index into [`Kernel::bindings`] of the destination buffer.
    pub binding: u32,
    /// Index into [`Kernel::shapes`] of the destination shape.
    pub shape: u32,
    /// Index into [`Kernel::lens`] of the number of elements written.
    pub len: u32,
    /// The value written.
    pub value: KernelExpr,
}

/// One stream of a (possibly fused) reduction.
#[derive(Clone, Debug, PartialEq)]
pub struct ReduceOperand {
    /// The reduced expression.
    pub source: KernelExpr,
    /// Index into [`Kernel::bindings`] of the buffer receiving one result per work-group.
    pub output: u32,
    /// Index into [`Kernel::shapes`] of the output shape: work-group `g` writes element `g`.
    pub output_shape: u32,
}

/// The body of a reduction kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct ReduceBody {
    /// The reduction operator.
    pub op: ReduceOp,
    /// Index into [`Kernel::lens`] of the number of reduced elements.
    pub len: u32,
    /// Whether [`ReduceOp::map`] is applied to source elements.
    pub map_source: bool,
    /// Whether each result is combined with the prior value of its output element.
    pub accumulate: bool,
    /// The fused operand streams; each one gets its own accumulators and work-group memory.
    pub operands: Vec<ReduceOperand>,
}

/// What a kernel computes.
#[derive(Clone, Debug, PartialEq)]
pub enum KernelBody {
    /// Each work-item performs every store, in order, for its global index.
    Elementwise(Vec<Store>),
    /// A work-group tree reduction.
    Reduce(ReduceBody),
}

/// Access mode of a kernel binding.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// The kernel only reads the buffer.
    Read,
    /// The kernel writes (and possibly reads) the buffer.
    ReadWrite,
}

/// A buffer bound to a kernel.
pub struct Binding<'a, B> {
    /// The bound buffer.
    pub buffer: &'a B,
    /// How the kernel accesses it.
    pub access: Access,
}

impl<B> Clone for Binding<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Binding<'_, B> {}

/// A lowered kernel, ready to be submitted to a device.
pub struct Kernel<'a, B: DeviceBuffer> {
    /// Debug label of the kernel.
    pub label: &'static str,
    /// Distinct buffers accessed by the kernel.
    pub bindings: Vec<Binding<'a, B>>,
    /// Operand shapes.
    pub shapes: Vec<ViewShape>,
    /// Trip counts.
    pub lens: Vec<u32>,
    /// Scalar parameters.
    pub scalars: Vec<B::Scalar>,
    /// What the kernel computes.
    pub body: KernelBody,
    /// Number of work-items per work-group.
    pub workgroup_size: u32,
    /// Number of work-groups launched.
    pub num_workgroups: u32,
}

impl<B: DeviceBuffer> Kernel<'_, B> {
    /// Index, in [`Self::params`], of the shape `shape`.
    pub fn shape_param(&self, shape: u32) -> u32 {
        shape
    }

    /// Index, in [`Self::params`], of the trip count `len`.
    pub fn len_param(&self, len: u32) -> u32 {
        self.shapes.len() as u32 + len
    }

    /// Index, in [`Self::params`], of the scalar `scalar`.
    pub fn scalar_param(&self, scalar: u32) -> u32 {
        (self.shapes.len() + self.lens.len()) as u32 + scalar
    }

    /// All the kernel parameters packed in 16-byte slots: shapes, then trip counts, then scalars.
    pub fn params(&self) -> Vec<[u32; 4]> {
        let shapes = self.shapes.iter().map(|shape| shape.to_param());
        let lens = self.lens.iter().map(|len| [*len, 0, 0, 0]);
        let scalars = self.scalars.iter().map(|s| s.to_param());
        shapes.chain(lens).chain(scalars).collect()
    }

    /// Total number of work-items launched.
    pub fn num_invocations(&self) -> u64 {
        self.workgroup_size as u64 * self.num_workgroups as u64
    }
}

/// Extension of `wgpu`’s command encoder.
pub trait CommandEncoderExt {
    /// Begins a labeled compute pass.
    fn compute_pass<'encoder>(&'encoder mut self, label: &str) -> ComputePass<'encoder>;
}

impl CommandEncoderExt for CommandEncoder {
    fn compute_pass<'encoder>(&'encoder mut self, label: &str) -> ComputePass<'encoder> {
        let desc = ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        };
        self.begin_compute_pass(&desc)
    }
}

/// Trait implemented for work-group counts in gpu kernel dispatches.
///
/// Allows passing both a single `u32` or an array `[u32; 3]` to [`KernelDispatch::dispatch`].
pub trait WorkgroupSize {
    /// Converts `self` into the actual work-group counts of the dispatch.
    fn into_workgroups_size(self) -> [u32; 3];
}

impl WorkgroupSize for u32 {
    fn into_workgroups_size(self) -> [u32; 3] {
        [self, 1, 1]
    }
}

impl WorkgroupSize for [u32; 3] {
    fn into_workgroups_size(self) -> [u32; 3] {
        self
    }
}

/// Splits `num_workgroups` over the first two dispatch dimensions when it exceeds the
/// per-dimension limit `max_per_dim`.
pub fn split_workgroups(num_workgroups: u32, max_per_dim: u32) -> [u32; 3] {
    if num_workgroups <= max_per_dim {
        [num_workgroups, 1, 1]
    } else {
        [max_per_dim, num_workgroups.div_ceil(max_per_dim), 1]
    }
}

/// Binds buffers to a compute pipeline and queues its dispatch.
pub struct KernelDispatch<'a, 'encoder> {
    device: &'a Device,
    pass: &'a mut ComputePass<'encoder>,
    pipeline: &'a ComputePipeline,
    queueable: bool,
}

impl<'a, 'encoder> KernelDispatch<'a, 'encoder> {
    /// Sets `pipeline` on `pass`.
    pub fn new(
        device: &'a Device,
        pass: &'a mut ComputePass<'encoder>,
        pipeline: &'a ComputePipeline,
    ) -> Self {
        pass.set_pipeline(pipeline);
        Self {
            device,
            pass,
            pipeline,
            queueable: true,
        }
    }

    /// Binds `inputs[i]` to the binding `i` of the bind group 0.
    pub fn bind0(self, inputs: &[&Buffer]) -> Self {
        self.bind(0, inputs)
    }

    /// Binds `inputs[i]` to the binding `i` of the bind group `bind_group_id`.
    ///
    /// Zero-sized buffers cannot be bound; the dispatch is then skipped.
    pub fn bind(mut self, bind_group_id: u32, inputs: &[&Buffer]) -> Self {
        if inputs.iter().any(|input| input.size() == 0) {
            self.queueable = false;
            return self;
        }

        let entries: Vec<_> = inputs
            .iter()
            .enumerate()
            .map(|(binding, input)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: input.as_entire_binding(),
            })
            .collect();
        let bind_group_layout = self.pipeline.get_bind_group_layout(bind_group_id);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &bind_group_layout,
            entries: &entries,
        });
        self.pass.set_bind_group(bind_group_id, &bind_group, &[]);
        self
    }

    /// Queues the dispatch of `workgroups` work-groups.
    pub fn dispatch(self, workgroups: impl WorkgroupSize) {
        let [x, y, z] = workgroups.into_workgroups_size();

        // NOTE: empty dispatches are skipped.
        if self.queueable && x * y * z > 0 {
            self.pass.dispatch_workgroups(x, y, z);
        }
    }
}
