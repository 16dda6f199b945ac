//! Device Resource Manager: the compute API the wavefront scheduler drives.
//!
//! A backend owns every buffer, program and kernel it hands out and releases
//! them exactly once, either through [`ComputeBackend::release`] or on drop.

pub mod host;
pub mod source;
pub mod wgpu_backend;

use bytemuck::Pod;

use crate::error::{TracerError, TracerResult};

pub use host::{HostBackend, HostStats};
pub use source::{ProgramLibrary, SourceUnit};
pub use wgpu_backend::WgpuBackend;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub(crate) usize);

/// How kernels may touch a buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Debug)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: u64,
    pub initial: Option<&'a [u8]>,
    pub access: BufferAccess,
}

impl<'a> BufferDesc<'a> {
    /// Buffer initialised with `contents`, sized to fit them.
    pub fn with_contents(label: &'a str, contents: &'a [u8], access: BufferAccess) -> Self {
        Self {
            label,
            size: contents.len() as u64,
            initial: Some(contents),
            access,
        }
    }

    /// Zero-initialised buffer of `size` bytes.
    pub fn zeroed(label: &'a str, size: u64, access: BufferAccess) -> Self {
        Self {
            label,
            size,
            initial: None,
            access,
        }
    }

    pub(crate) fn validate(&self) -> TracerResult<()> {
        let fail = |reason: &str| TracerError::BufferAllocation {
            label: self.label.to_string(),
            size: self.size,
            reason: reason.to_string(),
        };
        if self.size == 0 {
            return Err(fail("zero-sized buffers are not allowed"));
        }
        if let Some(initial) = self.initial {
            if initial.len() as u64 > self.size {
                return Err(fail("initial contents exceed the buffer size"));
            }
        }
        Ok(())
    }
}

/// One-dimensional launch geometry.
///
/// `work_items` is always a multiple of `local_size`.
///
/// Only the host backend honours `local_size`, where it partitions the kernel
/// loop. The WGSL kernels are compiled with a fixed
/// `@workgroup_size(TracerConfig::KERNEL_WORKGROUP_SIZE)` because wgpu has no
/// pipeline-overridable constants, so on wgpu the local size is forwarded in
/// the launch push constants for logging and nothing reads it. The dispatch
/// grid there depends on `work_items` alone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub work_items: u32,
    pub local_size: u32,
}

impl LaunchGeometry {
    pub(crate) fn validate(&self, kernel: &str) -> TracerResult<()> {
        if self.work_items == 0 || self.local_size == 0 {
            return Err(TracerError::dispatch(kernel, format!("empty launch {self:?}")));
        }
        if self.work_items % self.local_size != 0 {
            return Err(TracerError::dispatch(
                kernel,
                format!(
                    "{} work items are not a multiple of the local size {}",
                    self.work_items, self.local_size
                ),
            ));
        }
        Ok(())
    }
}

/// Compute API shared by the GPU and host backends.
pub trait ComputeBackend {
    /// Human-readable device name for logs.
    fn name(&self) -> String;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> TracerResult<BufferHandle>;

    /// Overwrite a buffer from offset zero.
    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> TracerResult<()>;

    /// Compile the concatenation of `units` into one program.
    fn compile_program(&mut self, label: &str, units: &[SourceUnit]) -> TracerResult<ProgramHandle>;

    fn create_kernel(&mut self, program: ProgramHandle, entry_point: &str) -> TracerResult<KernelHandle>;

    /// Bind `buffers` to the kernel; binding index = position in the slice.
    fn bind_arguments(&mut self, kernel: KernelHandle, buffers: &[BufferHandle]) -> TracerResult<()>;

    fn enqueue_launch(&mut self, kernel: KernelHandle, geometry: LaunchGeometry) -> TracerResult<()>;

    /// Blocking readback of the whole buffer.
    fn read_buffer(&mut self, buffer: BufferHandle) -> TracerResult<Vec<u8>>;

    /// Release every resource. Calling it again is a no-op.
    fn release(&mut self);
}

/// Read a buffer back as a vector of `T`.
pub fn read_typed<T: Pod, B: ComputeBackend + ?Sized>(backend: &mut B, buffer: BufferHandle) -> TracerResult<Vec<T>> {
    let bytes = backend.read_buffer(buffer)?;
    let stride = std::mem::size_of::<T>();
    if bytes.len() % stride != 0 {
        return Err(TracerError::Readback(format!(
            "{} bytes do not divide into records of {stride} bytes",
            bytes.len()
        )));
    }
    Ok(bytes.chunks_exact(stride).map(bytemuck::pod_read_unaligned).collect())
}
