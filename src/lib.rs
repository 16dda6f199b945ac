//! Wavefront path tracer: a six-phase scheduler that keeps rays in device
//! queues and drives one compute kernel per phase on wgpu or on the host.

pub mod camera;
pub mod config;
pub mod device;
pub mod error;
mod kernels;
pub mod scene;
pub mod scene_buffers;
pub mod wavefront;

pub use camera::Camera;
pub use config::PipelineConfig;
pub use device::{ComputeBackend, HostBackend, WgpuBackend};
pub use error::{TracerError, TracerResult};
pub use scene::{Material, Scene};
pub use scene_buffers::SceneBuffers;
pub use wavefront::{IterationReport, PhaseKind, PipelineStats, WavefrontPipeline};

pub use tracer_shared as shared;
