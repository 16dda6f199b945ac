use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use log::{debug, trace};

use super::source::{check_structure, compute_entry_points, concatenate, SourceUnit};
use super::{BufferAccess, BufferDesc, BufferHandle, ComputeBackend, KernelHandle, LaunchGeometry, ProgramHandle};
use crate::error::{TracerError, TracerResult};

/// Host implementation of a kernel entry point.
pub type HostKernelFn = fn(&mut KernelContext<'_>) -> TracerResult<()>;

/// Host kernels available to [`HostBackend`], keyed by entry point name
#[derive(Clone, Default)]
pub struct HostKernelRegistry {
    kernels: HashMap<String, HostKernelFn>,
}

impl HostKernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry_point: &str, kernel: HostKernelFn) -> &mut Self {
        self.kernels.insert(entry_point.to_string(), kernel);
        self
    }

    pub fn get(&self, entry_point: &str) -> Option<HostKernelFn> {
        self.kernels.get(entry_point).copied()
    }
}

/// Word-aligned host memory standing in for a device buffer
#[derive(Debug)]
pub struct HostBuffer {
    label: String,
    access: BufferAccess,
    size: usize,
    words: Vec<u32>,
}

impl HostBuffer {
    fn new(desc: &BufferDesc<'_>) -> Self {
        let size = desc.size as usize;
        let mut words = vec![0u32; size.div_ceil(4)];
        if let Some(initial) = desc.initial {
            bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..initial.len()].copy_from_slice(initial);
        }
        Self {
            label: desc.label.to_string(),
            access: desc.access,
            size,
            words,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.size]
    }

    pub fn view<T: Pod>(&self) -> TracerResult<&[T]> {
        bytemuck::try_cast_slice(self.bytes()).map_err(|e| {
            TracerError::dispatch(&self.label, format!("cannot view buffer as {}: {e}", std::any::type_name::<T>()))
        })
    }

    pub fn view_mut<T: Pod>(&mut self) -> TracerResult<&mut [T]> {
        if self.access == BufferAccess::ReadOnly {
            return Err(TracerError::dispatch(&self.label, "kernel wrote to a read-only buffer"));
        }
        let size = self.size;
        let label = &self.label;
        bytemuck::try_cast_slice_mut(&mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..size]).map_err(|e| {
            TracerError::dispatch(label, format!("cannot view buffer as {}: {e}", std::any::type_name::<T>()))
        })
    }
}

/// Arguments and geometry of one host launch.
pub struct KernelContext<'a> {
    pub entry_point: &'a str,
    pub geometry: LaunchGeometry,
    args: &'a mut [HostBuffer],
}

impl<'a> KernelContext<'a> {
    /// Borrow all `N` bound buffers at once, in binding order.
    pub fn bind<const N: usize>(&mut self) -> TracerResult<[&mut HostBuffer; N]> {
        let entry_point = self.entry_point;
        let bound = self.args.len();
        let refs: Vec<&mut HostBuffer> = self.args.iter_mut().collect();
        refs.try_into()
            .map_err(|_| TracerError::binding(entry_point, format!("kernel expects {} arguments, {} bound", N, bound)))
    }

    pub fn work_items(&self) -> u32 {
        self.geometry.work_items
    }
}

/// Counters shared with observers of a [`HostBackend`]
#[derive(Debug, Default)]
pub struct HostStats {
    launches: AtomicU64,
    readbacks: AtomicU64,
    releases: AtomicU64,
}

impl HostStats {
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    pub fn readbacks(&self) -> u64 {
        self.readbacks.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

struct HostProgram {
    label: String,
    entry_points: Vec<String>,
}

struct HostKernel {
    entry_point: String,
    function: HostKernelFn,
    args: Option<Vec<BufferHandle>>,
}

/// CPU backend: executes registered host kernels work item by work item.
pub struct HostBackend {
    registry: HostKernelRegistry,
    buffers: Vec<Option<HostBuffer>>,
    programs: Vec<Option<HostProgram>>,
    kernels: Vec<Option<HostKernel>>,
    stats: Arc<HostStats>,
    released: bool,
}

impl HostBackend {
    pub fn new(registry: HostKernelRegistry) -> Self {
        Self {
            registry,
            buffers: Vec::new(),
            programs: Vec::new(),
            kernels: Vec::new(),
            stats: Arc::new(HostStats::default()),
            released: false,
        }
    }

    /// Backend serving the wavefront kernels shipped with the crate.
    pub fn with_wavefront_kernels() -> Self {
        Self::new(crate::kernels::registry())
    }

    pub fn stats(&self) -> Arc<HostStats> {
        Arc::clone(&self.stats)
    }

    fn ensure_live(&self) -> TracerResult<()> {
        if self.released {
            return Err(TracerError::DeviceNotFound("host backend was released".into()));
        }
        Ok(())
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> TracerResult<&mut HostBuffer> {
        self.buffers
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| TracerError::Readback(format!("unknown buffer {handle:?}")))
    }

    fn kernel_name(&self, handle: KernelHandle) -> String {
        self.kernels
            .get(handle.0)
            .and_then(Option::as_ref)
            .map(|k| k.entry_point.clone())
            .unwrap_or_else(|| format!("{handle:?}"))
    }

    /// Move the bound buffers out of the table for the duration of a launch.
    fn take_args(&mut self, kernel: &str, handles: &[BufferHandle]) -> TracerResult<Vec<HostBuffer>> {
        let mut taken = Vec::with_capacity(handles.len());
        for (position, handle) in handles.iter().enumerate() {
            match self.buffers.get_mut(handle.0).and_then(Option::take) {
                Some(buffer) => taken.push(buffer),
                None => {
                    self.restore_args(&handles[..position], taken);
                    return Err(TracerError::dispatch(
                        kernel,
                        format!("argument {position} ({handle:?}) is missing or bound twice"),
                    ));
                }
            }
        }
        Ok(taken)
    }

    fn restore_args(&mut self, handles: &[BufferHandle], buffers: Vec<HostBuffer>) {
        for (handle, buffer) in handles.iter().zip(buffers) {
            self.buffers[handle.0] = Some(buffer);
        }
    }
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> String {
        "host".to_string()
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> TracerResult<BufferHandle> {
        self.ensure_live()?;
        desc.validate()?;
        trace!("host: buffer `{}` ({} bytes)", desc.label, desc.size);
        self.buffers.push(Some(HostBuffer::new(desc)));
        Ok(BufferHandle(self.buffers.len() - 1))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> TracerResult<()> {
        self.ensure_live()?;
        let target = self.buffer_mut(buffer)?;
        if data.len() > target.size {
            return Err(TracerError::BufferAllocation {
                label: target.label.clone(),
                size: target.size as u64,
                reason: format!("write of {} bytes does not fit", data.len()),
            });
        }
        bytemuck::cast_slice_mut::<u32, u8>(&mut target.words)[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn compile_program(&mut self, label: &str, units: &[SourceUnit]) -> TracerResult<ProgramHandle> {
        self.ensure_live()?;
        check_structure(units).map_err(|log| TracerError::Compile {
            program: label.to_string(),
            log,
        })?;
        let entry_points = compute_entry_points(&concatenate(units));
        debug!("host: compiled `{label}` with entry points {entry_points:?}");
        self.programs.push(Some(HostProgram {
            label: label.to_string(),
            entry_points,
        }));
        Ok(ProgramHandle(self.programs.len() - 1))
    }

    fn create_kernel(&mut self, program: ProgramHandle, entry_point: &str) -> TracerResult<KernelHandle> {
        self.ensure_live()?;
        let program = self
            .programs
            .get(program.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| TracerError::KernelCreation {
                program: format!("{program:?}"),
                entry_point: entry_point.to_string(),
                reason: "unknown program".into(),
            })?;
        let fail = |reason: &str| TracerError::KernelCreation {
            program: program.label.clone(),
            entry_point: entry_point.to_string(),
            reason: reason.to_string(),
        };
        if !program.entry_points.iter().any(|e| e == entry_point) {
            return Err(fail("entry point not declared in program"));
        }
        let function = self
            .registry
            .get(entry_point)
            .ok_or_else(|| fail("no host implementation registered"))?;
        self.kernels.push(Some(HostKernel {
            entry_point: entry_point.to_string(),
            function,
            args: None,
        }));
        Ok(KernelHandle(self.kernels.len() - 1))
    }

    fn bind_arguments(&mut self, kernel: KernelHandle, buffers: &[BufferHandle]) -> TracerResult<()> {
        self.ensure_live()?;
        for (position, handle) in buffers.iter().enumerate() {
            if buffers[..position].contains(handle) {
                return Err(TracerError::binding(
                    self.kernel_name(kernel),
                    format!("buffer {handle:?} bound twice"),
                ));
            }
            if !matches!(self.buffers.get(handle.0), Some(Some(_))) {
                return Err(TracerError::binding(self.kernel_name(kernel), format!("unknown buffer {handle:?}")));
            }
        }
        let slot = self
            .kernels
            .get_mut(kernel.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| TracerError::binding(format!("{kernel:?}"), "unknown kernel"))?;
        slot.args = Some(buffers.to_vec());
        Ok(())
    }

    fn enqueue_launch(&mut self, kernel: KernelHandle, geometry: LaunchGeometry) -> TracerResult<()> {
        self.ensure_live()?;
        let (entry_point, function, handles) = {
            let slot = self
                .kernels
                .get(kernel.0)
                .and_then(Option::as_ref)
                .ok_or_else(|| TracerError::dispatch(format!("{kernel:?}"), "unknown kernel"))?;
            let handles = slot
                .args
                .clone()
                .ok_or_else(|| TracerError::dispatch(&slot.entry_point, "arguments were never bound"))?;
            (slot.entry_point.clone(), slot.function, handles)
        };
        geometry.validate(&entry_point)?;

        let mut args = self.take_args(&entry_point, &handles)?;
        let result = {
            let mut context = KernelContext {
                entry_point: &entry_point,
                geometry,
                args: &mut args,
            };
            function(&mut context)
        };
        self.restore_args(&handles, args);
        self.stats.launches.fetch_add(1, Ordering::Relaxed);
        trace!("host: {entry_point} x{} (local {})", geometry.work_items, geometry.local_size);
        result
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> TracerResult<Vec<u8>> {
        self.ensure_live()?;
        let bytes = self.buffer_mut(buffer)?.bytes().to_vec();
        self.stats.readbacks.fetch_add(1, Ordering::Relaxed);
        Ok(bytes)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let (kernels, programs, buffers) = (self.kernels.len(), self.programs.len(), self.buffers.len());
        self.kernels.clear();
        self.programs.clear();
        self.buffers.clear();
        self.stats.releases.fetch_add(1, Ordering::Relaxed);
        debug!("host: released {kernels} kernels, {programs} programs, {buffers} buffers");
    }
}

impl Drop for HostBackend {
    fn drop(&mut self) {
        self.release();
    }
}
