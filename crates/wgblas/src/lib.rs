#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod blas1;
pub mod blas2;
pub mod error;
pub mod executor;
mod lower;
pub mod ops;
pub mod reduce;
pub mod view;

pub use error::{BlasError, Result};
pub use executor::{Executor, ExecutorConfig, FusionLevel};
pub use ops::{
    add_abs_reduction, add_reduction, assign, join, AssignReduction, AssignReduction2Ops,
    AssignReduction4Ops, BinaryOp, Expr, Leaf, Op, ReduceOp, ReduceSeed, Reduction,
    ReductionLaunch, UnaryOp,
};
pub use reduce::ReductionPolicy;
pub use view::{MatrixView, VectorView};

pub use wgblas_core;
pub use wgblas_core::gpu::{GpuDevice, GpuInstance};
pub use wgblas_core::host::{HostBuffer, HostDevice};
pub use wgblas_core::tensor::GpuBuffer;
