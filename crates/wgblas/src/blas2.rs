//! Level 2 BLAS routines: matrix-vector product and rank-1 update.
//!
//! Both routines decompose the matrix into rows or columns so that the inner operation always
//! runs along the contiguous direction of the storage: one reduction per row when rows are
//! contiguous, one AXPY sweep per column otherwise.

use crate::error::{BlasError, Result};
use crate::executor::Executor;
use crate::ops::{assign, BinaryOp, Expr, ReduceOp, ReduceSeed, Reduction};
use crate::view::{MatrixView, VectorView};
use std::str::FromStr;
use wgblas_core::{Device, DeviceBuffer};

/// The operation applied to the matrix of a GEMV.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transpose {
    /// `op(A) = A`
    NoTrans,
    /// `op(A) = A^T`
    Trans,
    /// `op(A) = A^H`, which is `A^T` for real scalars.
    ConjTrans,
}

impl Transpose {
    /// Is `op(A)` the transpose of `A`?
    pub fn is_transposed(self) -> bool {
        self != Self::NoTrans
    }
}

impl FromStr for Transpose {
    type Err = BlasError;

    /// Parses the first character of `s`: one of `n`, `N`, `t`, `T`, `c`, `C`.
    fn from_str(s: &str) -> Result<Self> {
        match s.chars().next() {
            Some('n' | 'N') => Ok(Self::NoTrans),
            Some('t' | 'T') => Ok(Self::Trans),
            Some('c' | 'C') => Ok(Self::ConjTrans),
            _ => {
                tracing::warn!(trans = s, "erroneous transpose parameter");
                Err(BlasError::InvalidTranspose(s.to_string()))
            }
        }
    }
}

fn check_length<B: DeviceBuffer>(
    vector: &'static str,
    expected: u32,
    view: VectorView<'_, B>,
) -> Result<()> {
    if view.len() == expected {
        Ok(())
    } else {
        Err(BlasError::VectorLength {
            vector,
            expected,
            found: view.len(),
        })
    }
}

/// `y = alpha * op(A) * x + beta * y`.
///
/// `y` must have as many elements as `op(A)` has rows, and `x` as many as it has columns.
pub fn gemv<'a, D, B>(
    ex: &Executor<'_, D>,
    trans: Transpose,
    alpha: B::Scalar,
    a: MatrixView<'a, B>,
    x: VectorView<'a, B>,
    beta: B::Scalar,
    y: VectorView<'a, B>,
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    let op_a = if trans.is_transposed() {
        a.transposed()
    } else {
        a
    };
    let (rows, cols) = (op_a.rows(), op_a.cols());
    check_length("y", rows, y)?;
    check_length("x", cols, x)?;

    tracing::debug!(?trans, rows, cols, row_major = op_a.is_row_major(), "gemv");
    ex.execute(&assign(y, Expr::scaled(beta, y)), None)?;

    if rows == 0 || cols == 0 {
        return Ok(());
    }

    if op_a.is_row_major() {
        // An executor requiring external scratch gets one buffer shared by every row reduction.
        // Otherwise each reduction manages its own partials.
        let limits = ex.device().limits();
        let launch = ex
            .config()
            .reduction
            .plan(cols, limits.reduction_workgroup_size);
        let scratch_buffer =
            if ex.config().reduction_uses_external_scratch && launch.num_groups > 1 {
                Some(ex.device().create_scratch(launch.num_groups)?)
            } else {
                None
            };
        let scratch = scratch_buffer.as_ref().map(VectorView::from);

        for k in 0..rows {
            let source = Expr::scaled(alpha, Expr::binary_op(BinaryOp::Mul, op_a.row(k), x));
            let node = Reduction::single(ReduceOp::Sum, y.element(k), source)
                .with_seed(ReduceSeed::Destination);
            ex.reduce(&node, scratch.as_ref())?;
        }
    } else {
        for j in 0..cols {
            let update = Expr::binary_op(BinaryOp::Mul, x.broadcast(j, rows), op_a.column(j));
            let source = Expr::binary_op(BinaryOp::Add, y, Expr::scaled(alpha, update));
            ex.execute(&assign(y, source), None)?;
        }
    }

    Ok(())
}

/// [`gemv`] with the transpose given as a BLAS character argument.
pub fn gemv_str<'a, D, B>(
    ex: &Executor<'_, D>,
    trans: &str,
    alpha: B::Scalar,
    a: MatrixView<'a, B>,
    x: VectorView<'a, B>,
    beta: B::Scalar,
    y: VectorView<'a, B>,
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    gemv(ex, trans.parse()?, alpha, a, x, beta, y)
}

/// `A = A + alpha * x * y^T`.
///
/// `A` must have as many rows as `x` has elements, and as many columns as `y`.
pub fn ger<'a, D, B>(
    ex: &Executor<'_, D>,
    alpha: B::Scalar,
    x: VectorView<'a, B>,
    y: VectorView<'a, B>,
    a: MatrixView<'a, B>,
) -> Result<()>
where
    B: DeviceBuffer,
    D: Device<B>,
{
    let (rows, cols) = (a.rows(), a.cols());
    check_length("x", rows, x)?;
    check_length("y", cols, y)?;

    tracing::debug!(rows, cols, row_major = a.is_row_major(), "ger");
    if a.is_row_major() {
        for i in 0..rows {
            let row = a.row(i);
            let update = Expr::binary_op(BinaryOp::Mul, x.broadcast(i, cols), y);
            let source = Expr::binary_op(BinaryOp::Add, row, Expr::scaled(alpha, update));
            ex.execute(&assign(row, source), None)?;
        }
    } else {
        for j in 0..cols {
            let column = a.column(j);
            let update = Expr::binary_op(BinaryOp::Mul, y.broadcast(j, rows), x);
            let source = Expr::binary_op(BinaryOp::Add, column, Expr::scaled(alpha, update));
            ex.execute(&assign(column, source), None)?;
        }
    }

    Ok(())
}
