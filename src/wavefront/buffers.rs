use log::debug;
use tracer_shared::{self as gpu, PathState, QueueStates};

use super::phase::PhaseKind;
use super::queue::QueueKind;
use crate::device::{BufferAccess, BufferDesc, BufferHandle, ComputeBackend};
use crate::error::TracerResult;
use crate::scene_buffers::{device_bytes, SceneBuffers};

/// Role of a pipeline buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Immutable scene data.
    Scene,
    /// Queue index arrays and the shared queue states.
    Queue,
    /// Path states and the output image.
    State,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BufferEntry {
    pub label: String,
    pub kind: BufferKind,
    pub access: BufferAccess,
    pub size: u64,
    pub handle: BufferHandle,
}

/// Every buffer the pipeline owns, in allocation order
#[derive(Clone, Debug, Default)]
pub struct BufferTable {
    entries: Vec<BufferEntry>,
}

impl BufferTable {
    fn allocate<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        kind: BufferKind,
        desc: &BufferDesc<'_>,
    ) -> TracerResult<BufferHandle> {
        let handle = backend.create_buffer(desc)?;
        self.entries.push(BufferEntry {
            label: desc.label.to_string(),
            kind,
            access: desc.access,
            size: desc.size,
            handle,
        });
        Ok(handle)
    }

    pub fn entries(&self) -> &[BufferEntry] {
        &self.entries
    }

    pub fn get(&self, handle: BufferHandle) -> Option<&BufferEntry> {
        self.entries.iter().find(|e| e.handle == handle)
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Handles of the buffers shared by the phases.
#[derive(Clone, Debug)]
pub struct PipelineBuffers {
    pub scene_info: BufferHandle,
    pub spheres: BufferHandle,
    pub triangles: BufferHandle,
    pub materials: BufferHandle,
    pub lights: BufferHandle,
    pub queue_states: BufferHandle,
    pub queues: [BufferHandle; 5],
    pub path_states: BufferHandle,
    pub image: BufferHandle,
}

impl PipelineBuffers {
    /// Upload the scene and allocate queues, path states and image.
    pub fn allocate<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        scene: &SceneBuffers,
        queue_capacity: u32,
    ) -> TracerResult<(Self, BufferTable)> {
        use BufferAccess::{ReadOnly, ReadWrite};

        let mut table = BufferTable::default();
        let pixels = scene.info.pixel_count() as u64;

        let scene_info = table.allocate(
            backend,
            BufferKind::Scene,
            &BufferDesc::with_contents("scene info", bytemuck::bytes_of(&scene.info), ReadOnly),
        )?;
        let spheres_bytes = device_bytes(&scene.spheres);
        let spheres = table.allocate(
            backend,
            BufferKind::Scene,
            &BufferDesc::with_contents("spheres", &spheres_bytes, ReadOnly),
        )?;
        let triangles_bytes = device_bytes(&scene.triangles);
        let triangles = table.allocate(
            backend,
            BufferKind::Scene,
            &BufferDesc::with_contents("triangles", &triangles_bytes, ReadOnly),
        )?;
        let materials_bytes = device_bytes(&scene.materials);
        let materials = table.allocate(
            backend,
            BufferKind::Scene,
            &BufferDesc::with_contents("materials", &materials_bytes, ReadOnly),
        )?;
        let lights_bytes = device_bytes(&scene.lights);
        let lights = table.allocate(
            backend,
            BufferKind::Scene,
            &BufferDesc::with_contents("lights", &lights_bytes, ReadOnly),
        )?;

        let initial_states = QueueStates::with_capacity(queue_capacity);
        let queue_states = table.allocate(
            backend,
            BufferKind::Queue,
            &BufferDesc::with_contents("queue states", bytemuck::bytes_of(&initial_states), ReadWrite),
        )?;
        let queue_bytes = queue_capacity as u64 * std::mem::size_of::<u32>() as u64;
        let mut queues = [queue_states; 5];
        for kind in QueueKind::ALL {
            queues[kind.index()] = table.allocate(
                backend,
                BufferKind::Queue,
                &BufferDesc::zeroed(kind.label(), queue_bytes, ReadWrite),
            )?;
        }

        let path_states = table.allocate(
            backend,
            BufferKind::State,
            &BufferDesc::zeroed("path states", pixels * std::mem::size_of::<PathState>() as u64, ReadWrite),
        )?;
        let image = table.allocate(
            backend,
            BufferKind::State,
            &BufferDesc::zeroed("image", pixels * std::mem::size_of::<u32>() as u64, ReadWrite),
        )?;

        debug!(
            "Allocated {} buffers ({} bytes), queue capacity {queue_capacity}",
            table.entries().len(),
            table.total_size()
        );

        let buffers = Self {
            scene_info,
            spheres,
            triangles,
            materials,
            lights,
            queue_states,
            queues,
            path_states,
            image,
        };
        Ok((buffers, table))
    }

    pub fn queue(&self, kind: QueueKind) -> BufferHandle {
        self.queues[kind.index()]
    }

    /// Ordered kernel arguments of `phase`, matching the bindings of its program.
    pub fn phase_arguments(&self, phase: PhaseKind) -> Vec<BufferHandle> {
        use QueueKind::*;
        match phase {
            PhaseKind::Logic => vec![
                self.scene_info,
                self.queue_states,
                self.queue(NewRay),
                self.path_states,
                self.image,
            ],
            PhaseKind::Generate => vec![
                self.scene_info,
                self.queue_states,
                self.queue(NewRay),
                self.queue(ExtendRay),
                self.path_states,
            ],
            PhaseKind::ShadeDiffuse | PhaseKind::ShadeReflective => {
                let own = if phase == PhaseKind::ShadeDiffuse { ShadeDiffuse } else { ShadeReflective };
                vec![
                    self.scene_info,
                    self.materials,
                    self.lights,
                    self.queue_states,
                    self.queue(own),
                    self.queue(ExtendRay),
                    self.queue(ShadowRay),
                    self.path_states,
                ]
            }
            PhaseKind::Extend => vec![
                self.scene_info,
                self.materials,
                self.spheres,
                self.triangles,
                self.queue_states,
                self.queue(ExtendRay),
                self.queue(ShadeDiffuse),
                self.queue(ShadeReflective),
                self.path_states,
            ],
            PhaseKind::Shadow => vec![
                self.scene_info,
                self.spheres,
                self.triangles,
                self.queue_states,
                self.queue(ShadowRay),
                self.path_states,
            ],
        }
    }

    /// Arguments of the queue retirement kernel.
    pub fn retire_arguments(&self) -> Vec<BufferHandle> {
        vec![self.queue_states]
    }

    /// Clear progressive state: path states, image and queues.
    pub fn clear_state<B: ComputeBackend + ?Sized>(
        &self,
        backend: &mut B,
        table: &BufferTable,
        queue_capacity: u32,
    ) -> TracerResult<()> {
        for handle in [self.path_states, self.image] {
            if let Some(entry) = table.get(handle) {
                backend.write_buffer(handle, &vec![0u8; entry.size as usize])?;
            }
        }
        let states = QueueStates::with_capacity(queue_capacity);
        backend.write_buffer(self.queue_states, bytemuck::bytes_of(&states))
    }

    pub fn write_scene_info<B: ComputeBackend + ?Sized>(&self, backend: &mut B, info: &gpu::SceneInfo) -> TracerResult<()> {
        backend.write_buffer(self.scene_info, bytemuck::bytes_of(info))
    }
}
