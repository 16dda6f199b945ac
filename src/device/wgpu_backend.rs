use std::sync::mpsc;

use bytemuck::bytes_of;
use log::{debug, error, info, trace};
use tracer_shared::{LaunchParams, TracerConfig};
use wgpu::util::DeviceExt;

use super::source::{compute_entry_points, concatenate, SourceUnit};
use super::{BufferAccess, BufferDesc, BufferHandle, ComputeBackend, KernelHandle, LaunchGeometry, ProgramHandle};
use crate::error::{TracerError, TracerResult};

struct GpuBuffer {
    label: String,
    buffer: wgpu::Buffer,
    access: BufferAccess,
    size: u64,
}

struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    entry_points: Vec<String>,
}

/// Pipeline and bind group are built when arguments are bound, since the
/// layout follows the access mode of the bound buffers.
struct GpuKernel {
    program: usize,
    entry_point: String,
    bound: Option<(wgpu::ComputePipeline, wgpu::BindGroup)>,
}

/// Compute backend on top of wgpu. Kernels are WGSL entry points with a fixed
/// workgroup size of [`TracerConfig::KERNEL_WORKGROUP_SIZE`].
pub struct WgpuBackend {
    adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: Vec<Option<GpuBuffer>>,
    programs: Vec<Option<GpuProgram>>,
    kernels: Vec<Option<GpuKernel>>,
    released: bool,
}

/// Scopes pushed around every fallible device call, outermost first.
const ERROR_SCOPES: [wgpu::ErrorFilter; 2] = [wgpu::ErrorFilter::OutOfMemory, wgpu::ErrorFilter::Validation];

/// Fold the errors popped from nested scopes into one result.
fn scope_outcome<T, E: std::fmt::Display>(value: T, captured: impl IntoIterator<Item = Option<E>>) -> Result<T, String> {
    let errors: Vec<String> = captured.into_iter().flatten().map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors.join("; "))
    }
}

fn align4(size: u64) -> u64 {
    (size + 3) & !3
}

impl WgpuBackend {
    pub async fn new() -> TracerResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| TracerError::DeviceNotFound("no compatible adapter".into()))?;

        let adapter_info = adapter.get_info();
        if !adapter.features().contains(wgpu::Features::PUSH_CONSTANTS) {
            return Err(TracerError::DeviceNotFound(format!(
                "{} does not support push constants",
                adapter_info.name
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Wavefront Device"),
                    required_features: wgpu::Features::PUSH_CONSTANTS,
                    required_limits: wgpu::Limits {
                        max_push_constant_size: TracerConfig::MAX_PUSH_CONSTANT_SIZE,
                        max_storage_buffers_per_shader_stage: adapter.limits().max_storage_buffers_per_shader_stage,
                        ..Default::default()
                    },
                },
                None,
            )
            .await
            .map_err(|e| TracerError::DeviceNotFound(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|e| error!("wgpu: {e}")));
        info!("Using {} ({:?})", adapter_info.name, adapter_info.backend);

        Ok(Self {
            adapter_name: adapter_info.name,
            device,
            queue,
            buffers: Vec::new(),
            programs: Vec::new(),
            kernels: Vec::new(),
            released: false,
        })
    }

    /// Blocking variant of [`WgpuBackend::new`].
    pub fn request() -> TracerResult<Self> {
        pollster::block_on(Self::new())
    }

    fn ensure_live(&self) -> TracerResult<()> {
        if self.released {
            return Err(TracerError::DeviceNotFound(format!("{} was released", self.adapter_name)));
        }
        Ok(())
    }

    fn buffer(&self, handle: BufferHandle) -> Option<&GpuBuffer> {
        self.buffers.get(handle.0).and_then(Option::as_ref)
    }

    /// Run `f` inside out-of-memory and validation error scopes and surface
    /// whatever they captured.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        for filter in ERROR_SCOPES {
            self.device.push_error_scope(filter);
        }
        let value = f(&self.device);
        let captured: Vec<Option<wgpu::Error>> = ERROR_SCOPES
            .iter()
            .map(|_| pollster::block_on(self.device.pop_error_scope()))
            .collect();
        scope_outcome(value, captured)
    }

    fn build_binding(
        &self,
        kernel: &GpuKernel,
        program: &GpuProgram,
        buffers: &[&GpuBuffer],
    ) -> Result<(wgpu::ComputePipeline, wgpu::BindGroup), String> {
        let label = kernel.entry_point.as_str();
        self.scoped(|device| {
            let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = buffers
                .iter()
                .enumerate()
                .map(|(binding, buffer)| wgpu::BindGroupLayoutEntry {
                    binding: binding as u32,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage {
                            read_only: buffer.access == BufferAccess::ReadOnly,
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &layout_entries,
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[wgpu::PushConstantRange {
                    stages: wgpu::ShaderStages::COMPUTE,
                    range: 0..std::mem::size_of::<LaunchParams>() as u32,
                }],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &program.module,
                entry_point: label,
            });
            let group_entries: Vec<wgpu::BindGroupEntry> = buffers
                .iter()
                .enumerate()
                .map(|(binding, buffer)| wgpu::BindGroupEntry {
                    binding: binding as u32,
                    resource: buffer.buffer.as_entire_binding(),
                })
                .collect();
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bind_group_layout,
                entries: &group_entries,
            });
            (pipeline, bind_group)
        })
    }
}

/// Workgroup grid covering `work_items`, folded into two dimensions once it
/// exceeds the per-dimension limit.
fn workgroup_grid(work_items: u32) -> (u32, u32) {
    let groups = work_items.div_ceil(TracerConfig::KERNEL_WORKGROUP_SIZE);
    let max = TracerConfig::MAX_WORKGROUPS_PER_DIMENSION;
    if groups <= max {
        (groups, 1)
    } else {
        (max, groups.div_ceil(max))
    }
}

/// Push constants and workgroup grid for a launch. The workgroup size is fixed
/// in WGSL, so only `work_items` shapes the grid.
fn dispatch_shape(geometry: LaunchGeometry) -> (LaunchParams, (u32, u32)) {
    let params = LaunchParams {
        global_size: geometry.work_items,
        local_size: geometry.local_size,
    };
    (params, workgroup_grid(geometry.work_items))
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> String {
        self.adapter_name.clone()
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> TracerResult<BufferHandle> {
        self.ensure_live()?;
        desc.validate()?;
        let size = align4(desc.size);
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let created = self.scoped(|device| match desc.initial {
            Some(initial) => {
                let mut contents = initial.to_vec();
                contents.resize(size as usize, 0);
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(desc.label),
                    contents: &contents,
                    usage,
                })
            }
            None => device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size,
                usage,
                mapped_at_creation: false,
            }),
        });
        let buffer = created.map_err(|reason| TracerError::BufferAllocation {
            label: desc.label.to_string(),
            size: desc.size,
            reason,
        })?;
        trace!("wgpu: buffer `{}` ({size} bytes)", desc.label);
        self.buffers.push(Some(GpuBuffer {
            label: desc.label.to_string(),
            buffer,
            access: desc.access,
            size,
        }));
        Ok(BufferHandle(self.buffers.len() - 1))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> TracerResult<()> {
        self.ensure_live()?;
        let target = self
            .buffer(buffer)
            .ok_or_else(|| TracerError::Readback(format!("unknown buffer {buffer:?}")))?;
        if align4(data.len() as u64) > target.size {
            return Err(TracerError::BufferAllocation {
                label: target.label.clone(),
                size: target.size,
                reason: format!("write of {} bytes does not fit", data.len()),
            });
        }
        let mut padded = data.to_vec();
        padded.resize(align4(data.len() as u64) as usize, 0);
        self.scoped(|_| self.queue.write_buffer(&target.buffer, 0, &padded))
            .map_err(|reason| TracerError::BufferAllocation {
                label: target.label.clone(),
                size: target.size,
                reason,
            })
    }

    fn compile_program(&mut self, label: &str, units: &[SourceUnit]) -> TracerResult<ProgramHandle> {
        self.ensure_live()?;
        let source = concatenate(units);
        let entry_points = compute_entry_points(&source);
        let module = self
            .scoped(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
                })
            })
            .map_err(|log| TracerError::Compile {
                program: label.to_string(),
                log,
            })?;
        debug!("wgpu: compiled `{label}` with entry points {entry_points:?}");
        self.programs.push(Some(GpuProgram {
            label: label.to_string(),
            module,
            entry_points,
        }));
        Ok(ProgramHandle(self.programs.len() - 1))
    }

    fn create_kernel(&mut self, program: ProgramHandle, entry_point: &str) -> TracerResult<KernelHandle> {
        self.ensure_live()?;
        let source = self
            .programs
            .get(program.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| TracerError::KernelCreation {
                program: format!("{program:?}"),
                entry_point: entry_point.to_string(),
                reason: "unknown program".into(),
            })?;
        if !source.entry_points.iter().any(|e| e == entry_point) {
            return Err(TracerError::KernelCreation {
                program: source.label.clone(),
                entry_point: entry_point.to_string(),
                reason: "entry point not declared in program".into(),
            });
        }
        self.kernels.push(Some(GpuKernel {
            program: program.0,
            entry_point: entry_point.to_string(),
            bound: None,
        }));
        Ok(KernelHandle(self.kernels.len() - 1))
    }

    fn bind_arguments(&mut self, kernel: KernelHandle, buffers: &[BufferHandle]) -> TracerResult<()> {
        self.ensure_live()?;
        let slot = self
            .kernels
            .get(kernel.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| TracerError::binding(format!("{kernel:?}"), "unknown kernel"))?;
        let program = self
            .programs
            .get(slot.program)
            .and_then(Option::as_ref)
            .ok_or_else(|| TracerError::binding(&slot.entry_point, "program was released"))?;
        let mut bound = Vec::with_capacity(buffers.len());
        for handle in buffers {
            let buffer = self
                .buffer(*handle)
                .ok_or_else(|| TracerError::binding(&slot.entry_point, format!("unknown buffer {handle:?}")))?;
            bound.push(buffer);
        }
        let binding = self
            .build_binding(slot, program, &bound)
            .map_err(|reason| TracerError::binding(&slot.entry_point, reason))?;
        if let Some(Some(slot)) = self.kernels.get_mut(kernel.0) {
            slot.bound = Some(binding);
        }
        Ok(())
    }

    fn enqueue_launch(&mut self, kernel: KernelHandle, geometry: LaunchGeometry) -> TracerResult<()> {
        self.ensure_live()?;
        let slot = self
            .kernels
            .get(kernel.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| TracerError::dispatch(format!("{kernel:?}"), "unknown kernel"))?;
        geometry.validate(&slot.entry_point)?;
        let (pipeline, bind_group) = slot
            .bound
            .as_ref()
            .ok_or_else(|| TracerError::dispatch(&slot.entry_point, "arguments were never bound"))?;

        let (params, (groups_x, groups_y)) = dispatch_shape(geometry);

        let label = slot.entry_point.as_str();
        let queue = &self.queue;
        self.scoped(|device| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.set_push_constants(0, bytes_of(&params));
                pass.dispatch_workgroups(groups_x, groups_y, 1);
            }
            queue.submit(std::iter::once(encoder.finish()));
        })
        .map_err(|reason| TracerError::dispatch(label, reason))?;
        trace!(
            "wgpu: {} x{} (local {}, {groups_x}x{groups_y} groups)",
            slot.entry_point,
            geometry.work_items,
            geometry.local_size
        );
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> TracerResult<Vec<u8>> {
        self.ensure_live()?;
        let source = self
            .buffer(buffer)
            .ok_or_else(|| TracerError::Readback(format!("unknown buffer {buffer:?}")))?;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size: source.size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, source.size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| TracerError::Readback(format!("`{}`: {e}", source.label)))?
            .map_err(|e| TracerError::Readback(format!("`{}`: {e}", source.label)))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        staging.destroy();
        Ok(bytes)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let (kernels, programs) = (self.kernels.len(), self.programs.len());
        self.kernels.clear();
        self.programs.clear();
        let buffers = self
            .buffers
            .drain(..)
            .flatten()
            .map(|b| b.buffer.destroy())
            .count();
        debug!("wgpu: released {kernels} kernels, {programs} programs, {buffers} buffers");
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        self.release();
    }
}
