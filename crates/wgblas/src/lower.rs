//! Lowering of operation trees into the kernel IR.

use crate::ops::{Expr, Leaf, Op, ReduceOp, ReductionLaunch};
use crate::view::VectorView;
use std::ptr;
use wgblas_core::kernel::{
    Access, Binding, Kernel, KernelBody, KernelExpr, ReduceBody, ReduceOperand, Store,
};
use wgblas_core::shapes::ViewShape;
use wgblas_core::DeviceBuffer;

/// Builds the binding and parameter tables of a kernel while its body is lowered.
///
/// Each distinct buffer gets exactly one binding, read-write as soon as one store targets it.
/// Shapes, trip counts and scalars get one slot per use, so that the kernel structure does not
/// depend on their values.
struct Lowering<'a, B: DeviceBuffer> {
    bindings: Vec<Binding<'a, B>>,
    shapes: Vec<ViewShape>,
    lens: Vec<u32>,
    scalars: Vec<B::Scalar>,
}

impl<'a, B: DeviceBuffer> Lowering<'a, B> {
    fn new() -> Self {
        Self {
            bindings: vec![],
            shapes: vec![],
            lens: vec![],
            scalars: vec![],
        }
    }

    fn bind(&mut self, buffer: &'a B, access: Access) -> u32 {
        let existing = self
            .bindings
            .iter()
            .position(|binding| ptr::eq(binding.buffer, buffer));

        match existing {
            Some(id) => {
                if access == Access::ReadWrite {
                    self.bindings[id].access = Access::ReadWrite;
                }
                id as u32
            }
            None => {
                self.bindings.push(Binding { buffer, access });
                self.bindings.len() as u32 - 1
            }
        }
    }

    fn shape(&mut self, shape: ViewShape) -> u32 {
        self.shapes.push(shape);
        self.shapes.len() as u32 - 1
    }

    fn len(&mut self, len: u32) -> u32 {
        self.lens.push(len);
        self.lens.len() as u32 - 1
    }

    fn scalar(&mut self, scalar: B::Scalar) -> u32 {
        self.scalars.push(scalar);
        self.scalars.len() as u32 - 1
    }

    fn leaf(&mut self, leaf: &Leaf<'a, B>, access: Access) -> (u32, u32) {
        (self.bind(leaf.buffer(), access), self.shape(leaf.shape()))
    }

    fn expr(&mut self, expr: &Expr<'a, B>) -> KernelExpr {
        match expr {
            Expr::Leaf(leaf) => {
                let (binding, shape) = self.leaf(leaf, Access::Read);
                KernelExpr::Load { binding, shape }
            }
            Expr::Scalar {
                op,
                scalar,
                operand,
            } => {
                let scalar = KernelExpr::Scalar(self.scalar(*scalar));
                KernelExpr::Binary(*op, Box::new(scalar), Box::new(self.expr(operand)))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs);
                KernelExpr::Binary(*op, Box::new(lhs), Box::new(self.expr(rhs)))
            }
            Expr::Unary { op, operand } => KernelExpr::Unary(*op, Box::new(self.expr(operand))),
        }
    }

    fn finish(
        self,
        label: &'static str,
        body: KernelBody,
        workgroup_size: u32,
        num_workgroups: u32,
    ) -> Kernel<'a, B> {
        Kernel {
            label,
            bindings: self.bindings,
            shapes: self.shapes,
            lens: self.lens,
            scalars: self.scalars,
            body,
            workgroup_size,
            num_workgroups,
        }
    }
}

/// Lowers `op` into one elementwise kernel: each work-item performs every assignment, in order,
/// for its global index.
pub(crate) fn elementwise<'a, B: DeviceBuffer>(
    op: &Op<'a, B>,
    workgroup_size: u32,
    num_workgroups: u32,
) -> Kernel<'a, B> {
    let mut lowering = Lowering::new();
    let stores = op
        .assignments()
        .into_iter()
        .map(|(dest, source)| {
            let value = lowering.expr(source);
            let (binding, shape) = lowering.leaf(dest, Access::ReadWrite);
            Store {
                binding,
                shape,
                len: lowering.len(dest.len()),
                value,
            }
        })
        .collect();

    lowering.finish(
        "wgblas_elementwise",
        KernelBody::Elementwise(stores),
        workgroup_size,
        num_workgroups,
    )
}

/// Parameters of one phase of a reduction.
pub(crate) struct ReductionPhase {
    pub op: ReduceOp,
    pub len: u32,
    pub map_source: bool,
    pub accumulate: bool,
    pub launch: ReductionLaunch,
}

/// Lowers one phase of a fused reduction: work-group `g` writes the reduction of its part of
/// each stream’s source into element `g` of the stream’s output.
pub(crate) fn reduction<'a, B: DeviceBuffer>(
    label: &'static str,
    phase: ReductionPhase,
    streams: &[(VectorView<'a, B>, &Expr<'a, B>)],
) -> Kernel<'a, B> {
    let mut lowering = Lowering::new();
    let len = lowering.len(phase.len);
    let operands = streams
        .iter()
        .map(|(output, source)| {
            let source = lowering.expr(source);
            let (output, output_shape) = lowering.leaf(&(*output).into(), Access::ReadWrite);
            ReduceOperand {
                source,
                output,
                output_shape,
            }
        })
        .collect();

    let body = ReduceBody {
        op: phase.op,
        len,
        map_source: phase.map_source,
        accumulate: phase.accumulate,
        operands,
    };
    lowering.finish(
        label,
        KernelBody::Reduce(body),
        phase.launch.local_size,
        phase.launch.num_groups,
    )
}
