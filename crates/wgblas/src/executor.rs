//! The executor: validates operation trees, lowers them and submits the kernels to a device.

use crate::error::{BlasError, Result};
use crate::lower;
use crate::ops::Op;
use crate::reduce::ReductionPolicy;
use wgblas_core::kernel::Kernel;
use wgblas_core::{Device, DeviceBuffer, Queue};

/// How many independent operations the batched BLAS1 routines fuse into one launch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FusionLevel {
    /// One launch per operation.
    #[default]
    None,
    /// Operations are fused by pairs.
    Two,
    /// Operations are fused by groups of four.
    Four,
}

impl FusionLevel {
    /// The number of operations fused into one launch.
    pub fn width(self) -> usize {
        match self {
            Self::None => 1,
            Self::Two => 2,
            Self::Four => 4,
        }
    }
}

/// Runtime configuration of an [`Executor`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// If `true`, multi-group reductions must be given a scratch view by the caller instead of
    /// allocating one.
    pub reduction_uses_external_scratch: bool,
    /// Fusion width of the batched BLAS1 routines.
    pub fusion_level: FusionLevel,
    /// Work-group sizing of reductions.
    pub reduction: ReductionPolicy,
    /// Work-group size of elementwise kernels. Defaults to the device preference.
    pub workgroup_size: Option<u32>,
}

impl ExecutorConfig {
    /// Sets [`Self::reduction_uses_external_scratch`].
    pub fn external_scratch(mut self, enabled: bool) -> Self {
        self.reduction_uses_external_scratch = enabled;
        self
    }

    /// Sets [`Self::fusion_level`].
    pub fn fusion_level(mut self, level: FusionLevel) -> Self {
        self.fusion_level = level;
        self
    }

    /// Sets [`Self::reduction`].
    pub fn reduction(mut self, policy: ReductionPolicy) -> Self {
        self.reduction = policy;
        self
    }

    /// Sets [`Self::workgroup_size`].
    pub fn workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = Some(size);
        self
    }
}

/// Lowers operation trees into kernels and submits them to a device.
///
/// The executor holds no state besides its configuration: every call validates, lowers and
/// submits independently, and kernels run in submission order on the device.
pub struct Executor<'d, D> {
    device: &'d D,
    config: ExecutorConfig,
}

impl<'d, D: Queue> Executor<'d, D> {
    /// An executor with the default configuration.
    pub fn new(device: &'d D) -> Self {
        Self::with_config(device, ExecutorConfig::default())
    }

    /// An executor with a custom configuration.
    pub fn with_config(device: &'d D, config: ExecutorConfig) -> Self {
        Self { device, config }
    }

    /// The device kernels are submitted to.
    pub fn device(&self) -> &'d D {
        self.device
    }

    /// The configuration of this executor.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Blocks until every submitted kernel completed, and reports asynchronous device errors.
    pub fn wait(&self) -> Result<()> {
        self.device.wait()?;
        Ok(())
    }

    fn elementwise_workgroup_size(&self, requested: Option<u32>) -> Result<u32> {
        let limits = self.device.limits();
        let size = requested
            .or(self.config.workgroup_size)
            .unwrap_or(limits.workgroup_size);

        if size == 0 || size > limits.max_workgroup_size {
            return Err(BlasError::InvalidWorkGroupSize {
                size,
                max: limits.max_workgroup_size,
            });
        }

        Ok(size)
    }

    pub(crate) fn submit<B>(&self, kernel: &Kernel<'_, B>) -> Result<()>
    where
        B: DeviceBuffer,
        D: Device<B>,
    {
        let max = self.device.limits().max_bindings;
        let required = kernel.bindings.len() as u32;
        if required > max {
            return Err(BlasError::TooManyBindings { required, max });
        }

        tracing::trace!(
            label = kernel.label,
            bindings = required,
            workgroup_size = kernel.workgroup_size,
            num_workgroups = kernel.num_workgroups,
            "submitting kernel"
        );
        self.device.submit(kernel)?;
        Ok(())
    }

    /// Runs the elementwise operation `op` as a single kernel.
    ///
    /// The kernel is launched with `workgroup_size` work-items per group (or the configured or
    /// device default), and enough groups to cover the longest assignment of `op`.
    pub fn execute<B>(&self, op: &Op<'_, B>, workgroup_size: Option<u32>) -> Result<()>
    where
        B: DeviceBuffer,
        D: Device<B>,
    {
        let mut global_len = 0;
        for (dest, source) in op.assignments() {
            let dims = source.dims()?;
            if dims != dest.dims() {
                return Err(BlasError::ShapeMismatch {
                    lhs: dest.dims(),
                    rhs: dims,
                });
            }
            if dest.is_broadcast() {
                return Err(BlasError::BroadcastDestination(dest.len()));
            }
            global_len = global_len.max(dest.len());
        }

        let workgroup_size = self.elementwise_workgroup_size(workgroup_size)?;
        if global_len == 0 {
            return Ok(());
        }

        let num_workgroups = global_len.div_ceil(workgroup_size);
        tracing::debug!(global_len, workgroup_size, num_workgroups, "elementwise launch");
        let kernel = lower::elementwise(op, workgroup_size, num_workgroups);
        self.submit(&kernel)
    }
}
