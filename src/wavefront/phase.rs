use std::fmt;

use log::debug;

use super::queue::QueueKind;
use crate::device::{BufferHandle, ComputeBackend, KernelHandle, LaunchGeometry, ProgramLibrary};
use crate::error::TracerResult;

/// One stage of a wavefront iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Logic,
    Generate,
    ShadeDiffuse,
    ShadeReflective,
    Extend,
    Shadow,
}

impl PhaseKind {
    /// Execution order within an iteration.
    pub const ORDER: [PhaseKind; 6] = [
        PhaseKind::Logic,
        PhaseKind::Generate,
        PhaseKind::ShadeDiffuse,
        PhaseKind::ShadeReflective,
        PhaseKind::Extend,
        PhaseKind::Shadow,
    ];

    /// Program files appended to the prelude; the last one declares the entry point.
    pub fn program_files(self) -> &'static [&'static str] {
        match self {
            PhaseKind::Logic => &["logic.wgsl"],
            PhaseKind::Generate => &["generate.wgsl"],
            PhaseKind::ShadeDiffuse => &["shade_common.wgsl", "shade_diffuse.wgsl"],
            PhaseKind::ShadeReflective => &["shade_common.wgsl", "shade_reflective.wgsl"],
            PhaseKind::Extend => &["extend.wgsl"],
            PhaseKind::Shadow => &["shadow.wgsl"],
        }
    }

    pub fn entry_point(self) -> &'static str {
        match self {
            PhaseKind::Logic => "logic",
            PhaseKind::Generate => "generate",
            PhaseKind::ShadeDiffuse => "shade_diffuse",
            PhaseKind::ShadeReflective => "shade_reflective",
            PhaseKind::Extend => "extend",
            PhaseKind::Shadow => "shadow",
        }
    }

    /// Queue whose length sizes the launch; `None` for the per-pixel Logic phase.
    pub fn queue(self) -> Option<QueueKind> {
        match self {
            PhaseKind::Logic => None,
            PhaseKind::Generate => Some(QueueKind::NewRay),
            PhaseKind::ShadeDiffuse => Some(QueueKind::ShadeDiffuse),
            PhaseKind::ShadeReflective => Some(QueueKind::ShadeReflective),
            PhaseKind::Extend => Some(QueueKind::ExtendRay),
            PhaseKind::Shadow => Some(QueueKind::ShadowRay),
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_point())
    }
}

/// Compile `prelude + files`, create the `entry_point` kernel and bind `arguments`.
pub(crate) fn build_kernel<B: ComputeBackend + ?Sized>(
    backend: &mut B,
    library: &ProgramLibrary,
    files: &[&str],
    entry_point: &str,
    arguments: &[BufferHandle],
) -> TracerResult<KernelHandle> {
    let units = library.program(files)?;
    let label = files.last().copied().unwrap_or(entry_point);
    let program = backend.compile_program(label, &units)?;
    let kernel = backend.create_kernel(program, entry_point)?;
    backend.bind_arguments(kernel, arguments)?;
    debug!("Kernel `{entry_point}` ready with {} arguments", arguments.len());
    Ok(kernel)
}

/// A kernel bound once to its buffers; launches only supply the geometry.
#[derive(Clone, Debug)]
pub struct Phase {
    kind: PhaseKind,
    kernel: KernelHandle,
    arguments: Vec<BufferHandle>,
}

impl Phase {
    pub fn new<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        library: &ProgramLibrary,
        kind: PhaseKind,
        arguments: Vec<BufferHandle>,
    ) -> TracerResult<Self> {
        let kernel = build_kernel(backend, library, kind.program_files(), kind.entry_point(), &arguments)?;
        Ok(Self {
            kind,
            kernel,
            arguments,
        })
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    pub fn arguments(&self) -> &[BufferHandle] {
        &self.arguments
    }

    pub fn launch<B: ComputeBackend + ?Sized>(&self, backend: &mut B, geometry: LaunchGeometry) -> TracerResult<()> {
        debug!(
            "{}: {} work items, local size {}",
            self.kind, geometry.work_items, geometry.local_size
        );
        backend.enqueue_launch(self.kernel, geometry)
    }
}
