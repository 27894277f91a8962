//! Errors reported by devices.

/// An error raised while compiling, launching or running a kernel.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// An error reported by the `wgpu` device.
    #[error("gpu device error: {0}")]
    Gpu(String),
    /// A generated kernel failed to compose or validate.
    #[error("kernel composition failed: {0}")]
    ShaderComposition(String),
    /// A kernel accessed a buffer element outside of its bounds.
    #[error("out-of-bounds access to binding {binding}: index {index} is not in 0..{len}")]
    OutOfBounds {
        /// The kernel binding that was accessed.
        binding: u32,
        /// The buffer index that was computed.
        index: i64,
        /// The length of the bound buffer.
        len: u32,
    },
    /// Errors collected asynchronously since the last fence.
    #[error("asynchronous device errors: {0:?}")]
    Async(Vec<DeviceError>),
    /// The device cannot run the requested launch configuration.
    #[error("unsupported launch: {0}")]
    UnsupportedLaunch(String),
}
