use log::{debug, info, trace, warn};
use tracer_shared::{queue_index, PathState, QueueStates};

use super::buffers::{BufferTable, PipelineBuffers};
use super::launch::size_launch;
use super::phase::{build_kernel, Phase, PhaseKind};
use super::queue::{next_scan_offset, DropTracker, QueueKind};
use crate::camera::Camera;
use crate::config::PipelineConfig;
use crate::device::{read_typed, ComputeBackend, KernelHandle, LaunchGeometry, ProgramLibrary};
use crate::error::{TracerError, TracerResult};
use crate::kernels::queue::RETIRE_ENTRY_POINT;
use crate::scene::Scene;
use crate::scene_buffers::SceneBuffers;

const QUEUE_PROGRAM: &[&str] = &["queue.wgsl"];

/// What one phase saw and did during an iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseRecord {
    pub phase: PhaseKind,
    /// Queue length observed before launching; `None` for Logic.
    pub queue_length: Option<u32>,
    /// `None` when the launch was skipped.
    pub launch: Option<LaunchGeometry>,
    /// Length of the same queue once the phase finished.
    pub remaining: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IterationReport {
    pub iteration: u64,
    pub phases: Vec<PhaseRecord>,
    /// Queue states after the final synchronisation.
    pub queue_states: QueueStates,
    /// Entries dropped during this iteration, per queue.
    pub dropped: [u32; queue_index::COUNT],
}

impl IterationReport {
    pub fn phase(&self, kind: PhaseKind) -> Option<&PhaseRecord> {
        self.phases.iter().find(|r| r.phase == kind)
    }
}

/// Counters accumulated over the lifetime of a pipeline
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub iterations: u64,
    pub launches: u64,
    pub skipped_launches: u64,
    pub dropped: [u64; queue_index::COUNT],
}

impl PipelineStats {
    pub fn total_dropped(&self) -> u64 {
        self.dropped.iter().sum()
    }
}

/// Six-phase wavefront scheduler driving a [`ComputeBackend`].
///
/// Construction uploads the scene, allocates queues and path states and binds
/// every phase once. Each [`execute`](Self::execute) runs one iteration and
/// returns the progressive image as packed `0x00BBGGRR` pixels.
pub struct WavefrontPipeline<B: ComputeBackend> {
    backend: B,
    config: PipelineConfig,
    camera: Camera,
    scene: SceneBuffers,
    buffers: PipelineBuffers,
    table: BufferTable,
    phases: Vec<Phase>,
    retire: KernelHandle,
    queue_capacity: u32,
    /// NewRay length left over at the end of the previous iteration.
    new_ray_backlog: u32,
    drops: DropTracker,
    stats: PipelineStats,
    last_report: Option<IterationReport>,
}

impl<B: ComputeBackend> WavefrontPipeline<B> {
    /// Build the pipeline on `backend`. On failure the backend is dropped,
    /// releasing whatever was already created.
    pub fn new(mut backend: B, scene: &Scene, camera: Camera, config: PipelineConfig) -> TracerResult<Self> {
        config.validate()?;
        camera.checked_pixel_count()?;
        let scene_buffers = SceneBuffers::build(scene, &camera)?;
        let library = ProgramLibrary::load(&config.program_dir)?;
        let queue_capacity = config.capacity_for(camera.pixel_count());

        info!(
            "Building wavefront pipeline on {}: {}x{}, warp size {}, queue capacity {queue_capacity}",
            backend.name(),
            camera.width,
            camera.height,
            config.warp_size
        );

        let (buffers, table) = PipelineBuffers::allocate(&mut backend, &scene_buffers, queue_capacity)?;
        let phases = PhaseKind::ORDER
            .into_iter()
            .map(|kind| Phase::new(&mut backend, &library, kind, buffers.phase_arguments(kind)))
            .collect::<TracerResult<Vec<_>>>()?;
        let retire = build_kernel(
            &mut backend,
            &library,
            QUEUE_PROGRAM,
            RETIRE_ENTRY_POINT,
            &buffers.retire_arguments(),
        )?;

        Ok(Self {
            backend,
            config,
            camera,
            scene: scene_buffers,
            buffers,
            table,
            phases,
            retire,
            queue_capacity,
            new_ray_backlog: 0,
            drops: DropTracker::default(),
            stats: PipelineStats::default(),
            last_report: None,
        })
    }

    /// Run one iteration of all six phases and read back the image.
    pub fn execute(&mut self) -> TracerResult<Vec<u32>> {
        let warp_size = self.config.warp_size;
        let pixels = self.camera.pixel_count();
        let mut records: Vec<PhaseRecord> = Vec::with_capacity(self.phases.len());

        for index in 0..self.phases.len() {
            let kind = self.phases[index].kind();
            let (queue_length, launch) = match kind.queue() {
                None => (None, LaunchGeometry::covering(pixels, warp_size)),
                Some(queue) => {
                    let states = self.sync_queues()?;
                    settle_previous(&mut records, &states);
                    let length = states.length(queue.index());
                    (Some(length), size_launch(length, warp_size))
                }
            };

            match launch {
                Some(geometry) => {
                    self.phases[index].launch(&mut self.backend, geometry)?;
                    self.stats.launches += 1;
                }
                None => {
                    debug!("{kind}: queue empty, launch skipped");
                    self.stats.skipped_launches += 1;
                }
            }
            records.push(PhaseRecord {
                phase: kind,
                queue_length,
                launch,
                remaining: None,
            });
        }

        let states = self.sync_queues()?;
        settle_previous(&mut records, &states);
        let dropped = self.record_drops(&states);
        let new_rays = records
            .iter()
            .find(|r| r.phase == PhaseKind::Generate)
            .and_then(|r| r.queue_length);
        self.rotate_admission(new_rays, dropped[queue_index::NEW_RAY], states.length(queue_index::NEW_RAY))?;

        let image: Vec<u32> = read_typed(&mut self.backend, self.buffers.image)?;
        trace!("Read back {} pixels", image.len());

        self.stats.iterations += 1;
        self.last_report = Some(IterationReport {
            iteration: self.stats.iterations,
            phases: records,
            queue_states: states,
            dropped,
        });
        Ok(image)
    }

    /// Retire consumed queue entries, then read the queue states back.
    fn sync_queues(&mut self) -> TracerResult<QueueStates> {
        self.backend.enqueue_launch(
            self.retire,
            LaunchGeometry {
                work_items: 1,
                local_size: 1,
            },
        )?;
        let states = read_typed::<QueueStates, _>(&mut self.backend, self.buffers.queue_states)?
            .first()
            .copied()
            .ok_or_else(|| TracerError::Readback("queue states buffer is empty".into()))?;
        trace!("Queue lengths {:?}", states.queues.map(|q| q.length));
        Ok(states)
    }

    fn record_drops(&mut self, states: &QueueStates) -> [u32; queue_index::COUNT] {
        let dropped = self.drops.observe(states);
        for kind in QueueKind::ALL {
            let count = dropped[kind.index()];
            if count > 0 {
                warn!(
                    "{kind} overflowed: {count} entries dropped (capacity {})",
                    self.queue_capacity
                );
                self.stats.dropped[kind.index()] += count as u64;
            }
        }
        dropped
    }

    /// Move the next Logic scan past the paths NewRay accepted this iteration,
    /// whenever it had to reject some.
    fn rotate_admission(&mut self, new_rays: Option<u32>, rejected: u32, backlog: u32) -> TracerResult<()> {
        let admitted = new_rays.unwrap_or(0).saturating_sub(self.new_ray_backlog);
        self.new_ray_backlog = backlog;
        if rejected == 0 || admitted == 0 {
            return Ok(());
        }
        let info = &mut self.scene.info;
        info.scan_offset = next_scan_offset(info.scan_offset, admitted, info.pixel_count());
        debug!("NewRay full: {admitted} admitted, {rejected} rejected, next scan starts at pixel {}", info.scan_offset);
        self.buffers.write_scene_info(&mut self.backend, &self.scene.info)
    }

    /// Synchronised snapshot of the queue states.
    pub fn queue_states(&mut self) -> TracerResult<QueueStates> {
        self.sync_queues()
    }

    pub fn path_states(&mut self) -> TracerResult<Vec<PathState>> {
        read_typed(&mut self.backend, self.buffers.path_states)
    }

    /// Move the camera and restart progressive accumulation.
    pub fn reset(&mut self, camera: Camera) -> TracerResult<()> {
        if (camera.width, camera.height) != (self.camera.width, self.camera.height) {
            return Err(TracerError::config(format!(
                "image size is fixed at {}x{}, got {}x{}",
                self.camera.width, self.camera.height, camera.width, camera.height
            )));
        }
        self.scene = self.scene.with_camera(&camera);
        self.buffers.write_scene_info(&mut self.backend, &self.scene.info)?;
        self.buffers
            .clear_state(&mut self.backend, &self.table, self.queue_capacity)?;
        self.drops.reset();
        self.new_ray_backlog = 0;
        self.last_report = None;
        self.camera = camera;
        info!("Pipeline reset, accumulation restarted");
        Ok(())
    }

    /// Release every device resource. Later calls are no-ops.
    pub fn release(&mut self) {
        self.backend.release();
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scene_buffers(&self) -> &SceneBuffers {
        &self.scene
    }

    pub fn buffers(&self) -> &PipelineBuffers {
        &self.buffers
    }

    pub fn buffer_table(&self) -> &BufferTable {
        &self.table
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn queue_capacity(&self) -> u32 {
        self.queue_capacity
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn last_report(&self) -> Option<&IterationReport> {
        self.last_report.as_ref()
    }
}

/// Fill in the queue length left behind by the most recent queue-driven phase.
fn settle_previous(records: &mut [PhaseRecord], states: &QueueStates) {
    if let Some(record) = records.iter_mut().rev().find(|r| r.phase.queue().is_some()) {
        if record.remaining.is_none() {
            if let Some(queue) = record.phase.queue() {
                record.remaining = Some(states.length(queue.index()));
            }
        }
    }
}
