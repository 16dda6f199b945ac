//! One-launch harness for the host kernels: uploads a hand-built scene and
//! pipeline state, runs a single phase through the shipped programs and reads
//! everything back.

use tracer_shared::{self as gpu, queue_index, status, PathState, QueueStates, SceneInfo, SimpleRng};

use super::queue::{push, retire_all};
use crate::config::DEFAULT_PROGRAM_DIR;
use crate::device::{
    read_typed, BufferAccess, BufferDesc, BufferHandle, ComputeBackend, HostBackend, LaunchGeometry, ProgramLibrary,
};
use crate::error::TracerResult;
use crate::scene_buffers::device_bytes;
use crate::wavefront::{Phase, PhaseKind, PipelineBuffers};

pub(crate) struct Bench {
    pub info: SceneInfo,
    pub spheres: Vec<gpu::Sphere>,
    pub triangles: Vec<gpu::Triangle>,
    pub materials: Vec<gpu::Material>,
    pub lights: Vec<gpu::Light>,
    pub states: QueueStates,
    pub queues: [Vec<u32>; queue_index::COUNT],
    pub paths: Vec<PathState>,
    pub image: Vec<u32>,
}

impl Bench {
    /// `pixels` paths in a one-row image, every queue holding `capacity` entries.
    pub fn new(pixels: u32, capacity: u32) -> Self {
        let info = SceneInfo {
            image_width: pixels,
            image_height: 1,
            max_depth: 8,
            ..SceneInfo::default()
        };
        let paths = (0..pixels)
            .map(|pixel| PathState {
                rng_state: SimpleRng::seed_for_pixel(pixel),
                throughput: [1.0; 3],
                ..PathState::default()
            })
            .collect();
        Self {
            info,
            spheres: Vec::new(),
            triangles: Vec::new(),
            materials: Vec::new(),
            lights: Vec::new(),
            states: QueueStates::with_capacity(capacity),
            queues: std::array::from_fn(|_| vec![0; capacity as usize]),
            paths,
            image: vec![0; pixels as usize],
        }
    }

    pub fn set_capacity(&mut self, queue: usize, capacity: u32) {
        self.states.queues[queue].capacity = capacity;
        self.queues[queue] = vec![0; capacity as usize];
    }

    pub fn enqueue(&mut self, queue: usize, paths: &[u32]) {
        for &path in paths {
            assert!(push(&mut self.states.queues, &mut self.queues[queue], queue, path));
        }
    }

    /// Path `index` sitting on a surface hit `t` along `direction` from `origin`.
    pub fn place_hit(
        &mut self,
        index: usize,
        origin: [f32; 3],
        direction: [f32; 3],
        t: f32,
        normal: [f32; 3],
        material: u32,
    ) {
        let path = &mut self.paths[index];
        path.origin = origin;
        path.direction = direction;
        path.t = t;
        path.normal = normal;
        path.material_id = material;
        path.status = status::SHADING;
    }

    pub fn length(&self, queue: usize) -> u32 {
        self.states.length(queue)
    }

    pub fn dropped(&self, queue: usize) -> u32 {
        self.states.dropped(queue)
    }

    /// Launch `kind` over `work_items` items, then retire what it consumed.
    pub fn run(&mut self, kind: PhaseKind, work_items: u32) -> TracerResult<()> {
        self.info.num_spheres = self.spheres.len() as u32;
        self.info.num_triangles = self.triangles.len() as u32;
        self.info.num_materials = self.materials.len() as u32;
        self.info.num_lights = self.lights.len() as u32;

        let mut host = HostBackend::with_wavefront_kernels();
        let library = ProgramLibrary::load(DEFAULT_PROGRAM_DIR)?;
        let buffers = self.upload(&mut host)?;
        let phase = Phase::new(&mut host, &library, kind, buffers.phase_arguments(kind))?;
        phase.launch(&mut host, LaunchGeometry { work_items, local_size: 1 })?;

        let states: Vec<QueueStates> = read_typed(&mut host, buffers.queue_states)?;
        self.states = states[0];
        for (queue, handle) in self.queues.iter_mut().zip(buffers.queues) {
            *queue = read_typed(&mut host, handle)?;
        }
        self.paths = read_typed(&mut host, buffers.path_states)?;
        self.image = read_typed(&mut host, buffers.image)?;
        retire_all(&mut self.states.queues);
        Ok(())
    }

    fn upload(&self, host: &mut HostBackend) -> TracerResult<PipelineBuffers> {
        use BufferAccess::{ReadOnly, ReadWrite};

        let mut create = |label: &str, bytes: Vec<u8>, access| -> TracerResult<BufferHandle> {
            host.create_buffer(&BufferDesc::with_contents(label, &bytes, access))
        };
        let scene_info = create("scene info", bytemuck::bytes_of(&self.info).to_vec(), ReadOnly)?;
        let spheres = create("spheres", device_bytes(&self.spheres), ReadOnly)?;
        let triangles = create("triangles", device_bytes(&self.triangles), ReadOnly)?;
        let materials = create("materials", device_bytes(&self.materials), ReadOnly)?;
        let lights = create("lights", device_bytes(&self.lights), ReadOnly)?;
        let queue_states = create("queue states", bytemuck::bytes_of(&self.states).to_vec(), ReadWrite)?;
        let mut queues = [queue_states; queue_index::COUNT];
        for (handle, slots) in queues.iter_mut().zip(&self.queues) {
            *handle = create("queue", device_bytes(slots), ReadWrite)?;
        }
        let path_states = create("path states", device_bytes(&self.paths), ReadWrite)?;
        let image = create("image", device_bytes(&self.image), ReadWrite)?;

        Ok(PipelineBuffers {
            scene_info,
            spheres,
            triangles,
            materials,
            lights,
            queue_states,
            queues,
            path_states,
            image,
        })
    }
}
