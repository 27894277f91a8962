//! The two-phase reduction engine.
//!
//! The first phase launches `nWG` work-groups of `L` work-items: work-item `(g, l)` accumulates
//! the elements `g * L + l + j * nWG * L` of each source, then every group combines its `L`
//! partials with a tree in work-group memory and writes one result per operand into scratch.
//! A second, single-group launch combines the `nWG` partials of each operand into its
//! destination. When `nWG == 1` the first phase writes the destination directly.

use crate::error::{BlasError, Result};
use crate::executor::Executor;
use crate::lower::{self, ReductionPhase};
use crate::ops::{AssignReduction, AssignReduction2Ops, AssignReduction4Ops, Expr};
use crate::ops::{ReduceSeed, Reduction, ReductionLaunch};
use crate::view::VectorView;
use wgblas_core::{Device, DeviceBuffer, DeviceLimits, Queue};

/// Chooses the launch configuration of reductions without an explicit one.
///
/// Work-items load one element per step of their strided loop: the policy has no per-work-item
/// unroll factor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReductionPolicy {
    /// Work-items per work-group. Defaults to the device preference. Must be a power of two.
    pub local_size: Option<u32>,
    /// Inputs of at most `jumps_init_block * local_size` elements are reduced by one group.
    pub jumps_init_block: u32,
    /// Larger inputs use at most `group_multiplier * local_size` groups.
    pub group_multiplier: u32,
}

impl Default for ReductionPolicy {
    fn default() -> Self {
        Self {
            local_size: None,
            jumps_init_block: 16,
            group_multiplier: 2,
        }
    }
}

impl ReductionPolicy {
    /// Sets [`Self::local_size`].
    pub fn local_size(mut self, local_size: u32) -> Self {
        self.local_size = Some(local_size);
        self
    }

    /// The launch configuration reducing `len` elements.
    pub fn plan(&self, len: u32, device_local_size: u32) -> ReductionLaunch {
        let local_size = self.local_size.unwrap_or(device_local_size).max(1);
        let num_groups = if len as u64 <= self.jumps_init_block as u64 * local_size as u64 {
            1
        } else {
            self.group_multiplier
                .saturating_mul(local_size)
                .min(len.div_ceil(local_size))
                .max(1)
        };

        ReductionLaunch {
            local_size,
            num_groups,
        }
    }
}

fn check_launch(launch: ReductionLaunch, limits: &DeviceLimits) -> Result<()> {
    let max = limits.max_workgroup_size;
    let size = launch.local_size;
    if size == 0 || !size.is_power_of_two() || size > max {
        return Err(BlasError::InvalidWorkGroupSize { size, max });
    }

    let max = limits.max_workgroups_per_dimension;
    let count = launch.num_groups;
    if count == 0 || count > max {
        return Err(BlasError::InvalidWorkGroupCount { count, max });
    }

    Ok(())
}

impl<D: Queue> Executor<'_, D> {
    /// Runs the reduction `node`.
    ///
    /// Multi-group reductions write their per-group partials into `scratch`, or into a transient
    /// buffer if `scratch` is `None` and the executor does not require external scratch.
    pub fn reduce<B>(
        &self,
        node: &Reduction<'_, B>,
        scratch: Option<&VectorView<'_, B>>,
    ) -> Result<()>
    where
        B: DeviceBuffer,
        D: Device<B>,
    {
        self.reduce_fused(node, scratch)
    }

    /// Runs two fused reductions.
    pub fn reduce_2ops<B>(
        &self,
        node: &AssignReduction2Ops<'_, B>,
        scratch: Option<&VectorView<'_, B>>,
    ) -> Result<()>
    where
        B: DeviceBuffer,
        D: Device<B>,
    {
        self.reduce_fused(node, scratch)
    }

    /// Runs four fused reductions.
    pub fn reduce_4ops<B>(
        &self,
        node: &AssignReduction4Ops<'_, B>,
        scratch: Option<&VectorView<'_, B>>,
    ) -> Result<()>
    where
        B: DeviceBuffer,
        D: Device<B>,
    {
        self.reduce_fused(node, scratch)
    }

    /// Runs `N` fused reductions: one launch per phase, whatever `N`.
    ///
    /// Operand `k` owns the scratch elements `k * nWG .. (k + 1) * nWG`.
    pub fn reduce_fused<B, const N: usize>(
        &self,
        node: &AssignReduction<'_, B, N>,
        scratch: Option<&VectorView<'_, B>>,
    ) -> Result<()>
    where
        B: DeviceBuffer,
        D: Device<B>,
    {
        let len = node.len()?;
        let limits = self.device().limits();
        let launch = node.launch.unwrap_or_else(|| {
            self.config()
                .reduction
                .plan(len, limits.reduction_workgroup_size)
        });
        check_launch(launch, &limits)?;

        let accumulate = node.seed == ReduceSeed::Destination;
        tracing::debug!(
            op = ?node.op,
            fused = N,
            len,
            local_size = launch.local_size,
            num_groups = launch.num_groups,
            "reduction launch"
        );

        if launch.num_groups == 1 {
            let streams: Vec<_> = node.operands.iter().map(|o| (o.dest, &o.source)).collect();
            let phase = ReductionPhase {
                op: node.op,
                len,
                map_source: true,
                accumulate,
                launch,
            };
            return self.submit(&lower::reduction("wgblas_reduce", phase, &streams));
        }

        let groups = launch.num_groups;
        let required = N as u64 * groups as u64;
        let owned: B;
        let scratch = match scratch {
            Some(view) if (view.len() as u64) < required => {
                return Err(BlasError::ScratchTooSmall {
                    required: required.min(u32::MAX as u64) as u32,
                    available: view.len(),
                })
            }
            Some(view) => *view,
            None if self.config().reduction_uses_external_scratch => {
                return Err(BlasError::MissingScratch)
            }
            None => {
                owned = self.device().create_scratch(required as u32)?;
                VectorView::from(&owned)
            }
        };

        let partials: Vec<_> = (0..N as u32)
            .map(|k| scratch.sub(k * groups, groups))
            .collect();
        let streams: Vec<_> = partials
            .iter()
            .zip(&node.operands)
            .map(|(partial, o)| (*partial, &o.source))
            .collect();
        let phase = ReductionPhase {
            op: node.op,
            len,
            map_source: true,
            accumulate: false,
            launch,
        };
        self.submit(&lower::reduction("wgblas_reduce_local", phase, &streams))?;

        let sources: Vec<Expr<'_, B>> = partials.iter().map(|p| Expr::from(*p)).collect();
        let streams: Vec<_> = node
            .operands
            .iter()
            .zip(&sources)
            .map(|(o, source)| (o.dest, source))
            .collect();
        let phase = ReductionPhase {
            op: node.op,
            len: groups,
            map_source: false,
            accumulate,
            launch: ReductionLaunch {
                local_size: launch.local_size,
                num_groups: 1,
            },
        };
        self.submit(&lower::reduction("wgblas_reduce_combine", phase, &streams))
    }
}
