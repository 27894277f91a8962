//! The operation tree: lazy elementwise expressions, assignments and reductions.
//!
//! Nodes hold views (references to caller buffers) and never evaluate anything by themselves:
//! they are lowered into kernels by the [`Executor`](crate::Executor).

use crate::error::{BlasError, Result};
use crate::view::{MatrixView, VectorView};
use wgblas_core::shapes::ViewShape;
use wgblas_core::DeviceBuffer;

pub use wgblas_core::kernel::{BinaryOp, ReduceOp, UnaryOp};

/// A vector or matrix operand of an operation tree.
pub struct Leaf<'a, B> {
    buffer: &'a B,
    shape: ViewShape,
    rows: u32,
    cols: u32,
}

impl<B> Clone for Leaf<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Leaf<'_, B> {}

impl<'a, B: DeviceBuffer> From<VectorView<'a, B>> for Leaf<'a, B> {
    fn from(v: VectorView<'a, B>) -> Self {
        Self {
            buffer: v.buffer(),
            shape: v.shape(),
            rows: v.len(),
            cols: 1,
        }
    }
}

impl<'a, B: DeviceBuffer> From<MatrixView<'a, B>> for Leaf<'a, B> {
    fn from(m: MatrixView<'a, B>) -> Self {
        Self {
            buffer: m.buffer(),
            shape: m.shape(),
            rows: m.rows(),
            cols: m.cols(),
        }
    }
}

impl<'a, B> Leaf<'a, B> {
    /// The operand’s buffer.
    pub fn buffer(&self) -> &'a B {
        self.buffer
    }

    /// The operand’s shape, as seen by kernels.
    pub fn shape(&self) -> ViewShape {
        self.shape
    }

    /// Number of rows and columns (vectors are single columns).
    pub fn dims(&self) -> (u32, u32) {
        (self.rows, self.cols)
    }

    /// Number of elements.
    pub fn len(&self) -> u32 {
        self.rows * self.cols
    }

    /// Is this operand empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Do several logical elements alias the same buffer element?
    pub fn is_broadcast(&self) -> bool {
        (self.shape.row_stride == 0 && self.rows > 1) || (self.shape.col_stride == 0 && self.cols > 1)
    }
}

/// A lazy elementwise expression.
///
/// Element `i` of an expression depends only on element `i` of its children.
pub enum Expr<'a, B: DeviceBuffer> {
    /// A view.
    Leaf(Leaf<'a, B>),
    /// `scalar op operand[i]`.
    Scalar {
        /// The operator.
        op: BinaryOp,
        /// The left-hand side of every application.
        scalar: B::Scalar,
        /// The right-hand side.
        operand: Box<Expr<'a, B>>,
    },
    /// `lhs[i] op rhs[i]`.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// The left-hand side.
        lhs: Box<Expr<'a, B>>,
        /// The right-hand side.
        rhs: Box<Expr<'a, B>>,
    },
    /// `op(operand[i])`.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr<'a, B>>,
    },
}

impl<'a, B: DeviceBuffer> From<Leaf<'a, B>> for Expr<'a, B> {
    fn from(leaf: Leaf<'a, B>) -> Self {
        Self::Leaf(leaf)
    }
}

impl<'a, B: DeviceBuffer> From<VectorView<'a, B>> for Expr<'a, B> {
    fn from(v: VectorView<'a, B>) -> Self {
        Self::Leaf(v.into())
    }
}

impl<'a, B: DeviceBuffer> From<MatrixView<'a, B>> for Expr<'a, B> {
    fn from(m: MatrixView<'a, B>) -> Self {
        Self::Leaf(m.into())
    }
}

impl<'a, B: DeviceBuffer> Expr<'a, B> {
    /// `scalar op operand[i]`.
    pub fn scalar_op(op: BinaryOp, scalar: B::Scalar, operand: impl Into<Self>) -> Self {
        Self::Scalar {
            op,
            scalar,
            operand: Box::new(operand.into()),
        }
    }

    /// `lhs[i] op rhs[i]`.
    pub fn binary_op(op: BinaryOp, lhs: impl Into<Self>, rhs: impl Into<Self>) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs.into()),
            rhs: Box::new(rhs.into()),
        }
    }

    /// `op(operand[i])`.
    pub fn unary_op(op: UnaryOp, operand: impl Into<Self>) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand.into()),
        }
    }

    /// `alpha * x[i]`.
    pub fn scaled(alpha: B::Scalar, x: impl Into<Self>) -> Self {
        Self::scalar_op(BinaryOp::Mul, alpha, x)
    }

    /// The number of rows and columns of this expression.
    ///
    /// Fails if two operands of a binary node have different shapes.
    pub fn dims(&self) -> Result<(u32, u32)> {
        match self {
            Self::Leaf(leaf) => Ok(leaf.dims()),
            Self::Scalar { operand, .. } | Self::Unary { operand, .. } => operand.dims(),
            Self::Binary { lhs, rhs, .. } => {
                let (lhs, rhs) = (lhs.dims()?, rhs.dims()?);
                if lhs == rhs {
                    Ok(lhs)
                } else {
                    Err(BlasError::ShapeMismatch { lhs, rhs })
                }
            }
        }
    }

    /// The number of elements of this expression.
    pub fn len(&self) -> Result<u32> {
        self.dims().map(|(r, c)| r * c)
    }
}

/// An elementwise operation writing into views.
pub enum Op<'a, B: DeviceBuffer> {
    /// `dest[i] = source[i]`.
    Assign {
        /// The written view.
        dest: Leaf<'a, B>,
        /// The assigned expression.
        source: Expr<'a, B>,
    },
    /// Both operations in the same kernel: each work-item performs the first operation’s
    /// stores, then the second’s, for its index.
    Join(Box<Op<'a, B>>, Box<Op<'a, B>>),
}

impl<'a, B: DeviceBuffer> Op<'a, B> {
    /// `dest[i] = source[i]`.
    pub fn assign(dest: impl Into<Leaf<'a, B>>, source: impl Into<Expr<'a, B>>) -> Self {
        Self::Assign {
            dest: dest.into(),
            source: source.into(),
        }
    }

    /// Runs `self` then `other` in the same kernel.
    pub fn join(self, other: Self) -> Self {
        Self::Join(Box::new(self), Box::new(other))
    }

    /// The assignments of this operation, in store order.
    pub fn assignments(&self) -> Vec<(&Leaf<'a, B>, &Expr<'a, B>)> {
        let mut out = vec![];
        self.collect_assignments(&mut out);
        out
    }

    fn collect_assignments<'s>(&'s self, out: &mut Vec<(&'s Leaf<'a, B>, &'s Expr<'a, B>)>) {
        match self {
            Self::Assign { dest, source } => out.push((dest, source)),
            Self::Join(a, b) => {
                a.collect_assignments(out);
                b.collect_assignments(out);
            }
        }
    }
}

/// `dest[i] = source[i]`.
pub fn assign<'a, B: DeviceBuffer>(
    dest: impl Into<Leaf<'a, B>>,
    source: impl Into<Expr<'a, B>>,
) -> Op<'a, B> {
    Op::assign(dest, source)
}

/// Runs `a` then `b` in the same kernel.
pub fn join<'a, B: DeviceBuffer>(a: Op<'a, B>, b: Op<'a, B>) -> Op<'a, B> {
    a.join(b)
}

/// How a reduction result is combined with its destination.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ReduceSeed {
    /// The result overwrites the destination.
    #[default]
    Identity,
    /// The result is combined with the destination’s prior value.
    Destination,
}

/// An explicit reduction launch configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReductionLaunch {
    /// Work-items per work-group. Must be a power of two.
    pub local_size: u32,
    /// Number of work-groups of the first phase.
    pub num_groups: u32,
}

/// One `(destination, source)` stream of a reduction.
pub struct ReductionOperand<'a, B: DeviceBuffer> {
    /// The reduced value is written to element 0 of this view.
    pub dest: VectorView<'a, B>,
    /// The reduced expression.
    pub source: Expr<'a, B>,
}

/// `N` reductions with the same operator and trip count, fused into the same kernels.
pub struct AssignReduction<'a, B: DeviceBuffer, const N: usize> {
    /// The reduction operator.
    pub op: ReduceOp,
    /// The fused streams.
    pub operands: [ReductionOperand<'a, B>; N],
    /// How results are combined with the destinations.
    pub seed: ReduceSeed,
    /// Overrides the executor’s reduction policy.
    pub launch: Option<ReductionLaunch>,
}

/// A single reduction.
pub type Reduction<'a, B> = AssignReduction<'a, B, 1>;
/// Two fused reductions.
pub type AssignReduction2Ops<'a, B> = AssignReduction<'a, B, 2>;
/// Four fused reductions.
pub type AssignReduction4Ops<'a, B> = AssignReduction<'a, B, 4>;

impl<'a, B: DeviceBuffer, const N: usize> AssignReduction<'a, B, N> {
    /// Fuses the reductions `operands[k].0[0] = reduce(operands[k].1)`.
    pub fn new(op: ReduceOp, operands: [(VectorView<'a, B>, Expr<'a, B>); N]) -> Self {
        Self {
            op,
            operands: operands.map(|(dest, source)| ReductionOperand { dest, source }),
            seed: ReduceSeed::Identity,
            launch: None,
        }
    }

    /// Sets how results are combined with the destinations.
    pub fn with_seed(mut self, seed: ReduceSeed) -> Self {
        self.seed = seed;
        self
    }

    /// Forces the launch configuration.
    pub fn with_launch(mut self, local_size: u32, num_groups: u32) -> Self {
        self.launch = Some(ReductionLaunch {
            local_size,
            num_groups,
        });
        self
    }

    /// The common number of reduced elements.
    ///
    /// Fails if the sources have different lengths, or if a destination is empty.
    pub fn len(&self) -> Result<u32> {
        let mut len = None;
        for operand in &self.operands {
            if operand.dest.is_empty() {
                return Err(BlasError::EmptyDestination);
            }

            let source_len = operand.source.len()?;
            match len {
                None => len = Some(source_len),
                Some(len) if len != source_len => {
                    return Err(BlasError::LengthMismatch(len, source_len))
                }
                Some(_) => {}
            }
        }
        Ok(len.unwrap_or(0))
    }
}

impl<'a, B: DeviceBuffer> Reduction<'a, B> {
    /// `dest[0] = reduce(source)`.
    pub fn single(op: ReduceOp, dest: VectorView<'a, B>, source: impl Into<Expr<'a, B>>) -> Self {
        Self::new(op, [(dest, source.into())])
    }
}

/// `dest[0] = sum(|source[i]|)`.
pub fn add_abs_reduction<'a, B: DeviceBuffer>(
    dest: VectorView<'a, B>,
    source: impl Into<Expr<'a, B>>,
) -> Reduction<'a, B> {
    Reduction::single(ReduceOp::AbsSum, dest, source)
}

/// `dest[0] = sum(source[i])`.
pub fn add_reduction<'a, B: DeviceBuffer>(
    dest: VectorView<'a, B>,
    source: impl Into<Expr<'a, B>>,
) -> Reduction<'a, B> {
    Reduction::single(ReduceOp::Sum, dest, source)
}
