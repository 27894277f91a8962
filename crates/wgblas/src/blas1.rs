//! Level 1 BLAS routines over strided vector views.
//!
//! The `*_many` variants run independent operations of the same kind, fused into one launch per
//! group of [`FusionLevel::width`](crate::FusionLevel::width) operations.

use crate::error::Result;
use crate::executor::Executor;
use crate::ops::{
    add_abs_reduction, assign, AssignReduction, BinaryOp, Expr, Op, ReduceOp, Reduction, UnaryOp,
};
use crate::view::VectorView;
use wgblas_core::{Device, DeviceBuffer};

/// The operation `y = y + alpha * x`.
pub fn axpy_op<'a, B: DeviceBuffer>(
    alpha: B::Scalar,
    x: VectorView<'a, B>,
    y: VectorView<'a, B>,
) -> Op<'a, B> {
    assign(y, Expr::binary_op(BinaryOp::Add, y, Expr::scaled(alpha, x)))
}

/// `y = x`.
pub fn copy<'a, D, B>(ex: &Executor<'_, D>, x: VectorView<'a, B>, y: VectorView<'a, B>) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    ex.execute(&assign(y, x), None)
}

/// `x = alpha * x`.
pub fn scal<D, B>(ex: &Executor<'_, D>, alpha: B::Scalar, x: VectorView<'_, B>) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    ex.execute(&assign(x, Expr::scaled(alpha, x)), None)
}

/// `y = y + alpha * x`.
pub fn axpy<'a, D, B>(
    ex: &Executor<'_, D>,
    alpha: B::Scalar,
    x: VectorView<'a, B>,
    y: VectorView<'a, B>,
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    ex.execute(&axpy_op(alpha, x, y), None)
}

/// `result[0] = sum(|x[i]|)`.
pub fn asum<'a, D, B>(
    ex: &Executor<'_, D>,
    x: VectorView<'a, B>,
    result: VectorView<'a, B>,
    scratch: Option<&VectorView<'_, B>>,
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    ex.reduce(&add_abs_reduction(result, x), scratch)
}

/// `result[0] = sum(x[i] * y[i])`.
pub fn dot<'a, D, B>(
    ex: &Executor<'_, D>,
    x: VectorView<'a, B>,
    y: VectorView<'a, B>,
    result: VectorView<'a, B>,
    scratch: Option<&VectorView<'_, B>>,
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    let source = Expr::binary_op(BinaryOp::Mul, x, y);
    ex.reduce(&Reduction::single(ReduceOp::Sum, result, source), scratch)
}

/// `result[0] = sqrt(sum(x[i]^2))`.
pub fn nrm2<'a, D, B>(
    ex: &Executor<'_, D>,
    x: VectorView<'a, B>,
    result: VectorView<'a, B>,
    scratch: Option<&VectorView<'_, B>>,
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    ex.reduce(&Reduction::single(ReduceOp::SqNorm, result, x), scratch)?;
    let norm = result.element(0);
    ex.execute(&assign(norm, Expr::unary_op(UnaryOp::Sqrt, norm)), None)
}

fn execute_fused<'a, D, B>(ex: &Executor<'_, D>, ops: impl Iterator<Item = Op<'a, B>>) -> Result<()>
where
    B: DeviceBuffer + 'a,
    D: Device<B>,
{
    match ops.reduce(Op::join) {
        Some(op) => ex.execute(&op, None),
        None => Ok(()),
    }
}

/// `y_k = x_k` for every pair `(x_k, y_k)`.
pub fn copy_many<D, B>(ex: &Executor<'_, D>, pairs: &[(VectorView<'_, B>, VectorView<'_, B>)]) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    for chunk in pairs.chunks(ex.config().fusion_level.width()) {
        execute_fused(ex, chunk.iter().map(|&(x, y)| assign(y, x)))?;
    }
    Ok(())
}

/// `y_k = y_k + alpha_k * x_k` for every triplet `(alpha_k, x_k, y_k)`.
pub fn axpy_many<D, B>(
    ex: &Executor<'_, D>,
    items: &[(B::Scalar, VectorView<'_, B>, VectorView<'_, B>)],
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    for chunk in items.chunks(ex.config().fusion_level.width()) {
        execute_fused(ex, chunk.iter().map(|&(alpha, x, y)| axpy_op(alpha, x, y)))?;
    }
    Ok(())
}

/// `result_k[0] = sum(|x_k[i]|)` for every pair `(x_k, result_k)`.
///
/// Fused reductions share `scratch`, which must then hold `width * nWG` partials.
pub fn asum_many<'a, D, B>(
    ex: &Executor<'_, D>,
    items: &[(VectorView<'a, B>, VectorView<'a, B>)],
    scratch: Option<&VectorView<'_, B>>,
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    let operand = |(x, result): (VectorView<'a, B>, VectorView<'a, B>)| (result, Expr::from(x));

    for chunk in items.chunks(ex.config().fusion_level.width()) {
        match *chunk {
            [a, b, c, d] => {
                let node = AssignReduction::new(ReduceOp::AbsSum, [a, b, c, d].map(operand));
                ex.reduce_4ops(&node, scratch)?;
            }
            [a, b, c] => {
                let node = AssignReduction::new(ReduceOp::AbsSum, [a, b].map(operand));
                ex.reduce_2ops(&node, scratch)?;
                ex.reduce(&AssignReduction::new(ReduceOp::AbsSum, [operand(c)]), scratch)?;
            }
            [a, b] => {
                let node = AssignReduction::new(ReduceOp::AbsSum, [a, b].map(operand));
                ex.reduce_2ops(&node, scratch)?;
            }
            [a] => ex.reduce(&AssignReduction::new(ReduceOp::AbsSum, [operand(a)]), scratch)?,
            _ => {}
        }
    }
    Ok(())
}
