//! Utilities for creating a ComputePipeline from a naga module.

use wgpu::naga::Module;
use wgpu::{ComputePipeline, ComputePipelineDescriptor, Device};

/// Creates a compute pipeline from the shader `module` and the name of its `entry_point`.
///
/// The pipeline layout is derived from the module’s bindings.
pub fn load_module(
    device: &Device,
    label: &str,
    entry_point: &str,
    module: Module,
) -> ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Naga(std::borrow::Cow::Owned(module)),
    });
    device.create_compute_pipeline(&ComputePipelineDescriptor {
        label: Some(label),
        layout: None,
        module: &shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}
