//! Host implementations of the wavefront kernels.
//!
//! Each function follows the buffer contract of the WGSL program with the same
//! entry point name, so the host backend can run the full pipeline on the CPU.

#[cfg(test)]
mod bench;
mod extend;
mod generate;
mod logic;
mod math;
pub mod queue;
mod shade;
mod shadow;

use tracer_shared::{PathState, SceneInfo};

use crate::device::host::{HostBuffer, HostKernelRegistry};
use crate::error::{TracerError, TracerResult};
use crate::wavefront::PhaseKind;

/// Registry with every wavefront entry point.
pub fn registry() -> HostKernelRegistry {
    let mut registry = HostKernelRegistry::new();
    registry
        .register(PhaseKind::Logic.entry_point(), logic::logic)
        .register(PhaseKind::Generate.entry_point(), generate::generate)
        .register(PhaseKind::ShadeDiffuse.entry_point(), shade::shade_diffuse)
        .register(PhaseKind::ShadeReflective.entry_point(), shade::shade_reflective)
        .register(PhaseKind::Extend.entry_point(), extend::extend)
        .register(PhaseKind::Shadow.entry_point(), shadow::shadow)
        .register(queue::RETIRE_ENTRY_POINT, queue::retire);
    registry
}

fn scene_info(buffer: &HostBuffer) -> TracerResult<SceneInfo> {
    buffer
        .view::<SceneInfo>()?
        .first()
        .copied()
        .ok_or_else(|| TracerError::dispatch(buffer.label(), "scene info buffer is empty"))
}

fn path_mut(paths: &mut [PathState], index: u32) -> TracerResult<&mut PathState> {
    let count = paths.len();
    paths
        .get_mut(index as usize)
        .ok_or_else(|| TracerError::dispatch("path states", format!("path {index} out of range ({count} paths)")))
}
