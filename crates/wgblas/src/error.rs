//! Errors of the execution engine.

use wgblas_core::DeviceError;

/// An error raised while validating, lowering or running an operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BlasError {
    /// A transpose argument did not start with one of `n`, `N`, `t`, `T`, `c`, `C`.
    #[error("erroneous transpose parameter {0:?}, expected one of n, N, t, T, c, C")]
    InvalidTranspose(String),
    /// Two operands of an elementwise operation have different shapes.
    #[error("shape mismatch: {lhs:?} vs. {rhs:?} (rows, cols)")]
    ShapeMismatch {
        /// Shape of the first operand.
        lhs: (u32, u32),
        /// Shape of the second operand.
        rhs: (u32, u32),
    },
    /// A vector operand of a BLAS routine does not match the matrix dimension it multiplies.
    #[error("vector `{vector}` has {found} elements, {expected} expected")]
    VectorLength {
        /// Name of the vector argument.
        vector: &'static str,
        /// The matrix dimension.
        expected: u32,
        /// Length of the vector.
        found: u32,
    },
    /// A reduction destination has no element to receive the result.
    #[error("empty reduction destination")]
    EmptyDestination,
    /// The operands of a fused reduction do not share the same trip count.
    #[error("fused reduction operands have different lengths: {0} vs. {1}")]
    LengthMismatch(u32, u32),
    /// A work-group size is zero, above the device maximum, or not a power of two where one is
    /// required.
    #[error("invalid work-group size {size} (device maximum: {max})")]
    InvalidWorkGroupSize {
        /// The requested size.
        size: u32,
        /// The device maximum.
        max: u32,
    },
    /// A reduction launch requested zero work-groups, or more than the device supports.
    #[error("invalid number of work-groups {count} (device maximum: {max})")]
    InvalidWorkGroupCount {
        /// The requested count.
        count: u32,
        /// The device maximum.
        max: u32,
    },
    /// The scratch view cannot hold the per-group partial results.
    #[error("scratch view too small: {required} elements required, {available} available")]
    ScratchTooSmall {
        /// Number of partials written by the reduction.
        required: u32,
        /// Length of the scratch view.
        available: u32,
    },
    /// The executor requires caller-provided reduction scratch, and none was given.
    #[error("the executor is configured to use external reduction scratch, but none was given")]
    MissingScratch,
    /// An operation references more distinct buffers than one kernel can bind.
    #[error("the kernel needs {required} buffer bindings, the device supports {max}")]
    TooManyBindings {
        /// Number of distinct buffers.
        required: u32,
        /// The device maximum.
        max: u32,
    },
    /// A broadcast (stride 0) view was used as a destination.
    #[error("cannot store into a broadcast view of {0} elements")]
    BroadcastDestination(u32),
    /// The device failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result type of the execution engine.
pub type Result<T> = std::result::Result<T, BlasError>;
