#![doc = include_str!("../README.md")]
//!
//! Device collaborators of the `wgblas` execution engine.
//!
//! This crate defines the backend-neutral [`kernel::Kernel`] IR that operation trees are lowered
//! into, the [`Device`] trait kernels are submitted to, and two devices: a host emulator running
//! work-groups on the rayon thread pool ([`host::HostDevice`]), and a `wgpu` device generating
//! WGSL from the IR ([`gpu::GpuDevice`]).

#![warn(missing_docs)]

pub mod codegen;
pub mod composer;
pub mod device;
pub mod error;
pub mod gpu;
pub mod host;
pub mod kernel;
pub mod scalar;
pub mod shader;
pub mod shapes;
pub mod tensor;
pub mod utils;

pub use bytemuck::Pod;

pub use device::{AsyncHandler, Device, DeviceBuffer, DeviceLimits, ErrorChannel, Queue};
pub use error::DeviceError;
pub use scalar::Scalar;
pub use shader::Shader;

/// Third-party modules re-exports.
pub mod re_exports {
    pub use bytemuck;
    pub use naga_oil::{
        self,
        compose::{ComposableModuleDescriptor, Composer, NagaModuleDescriptor},
    };
    pub use wgpu::{self, Device};
}
