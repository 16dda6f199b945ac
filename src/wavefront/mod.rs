//! Wavefront scheduling: queues, phases and the per-iteration orchestrator.

pub mod buffers;
pub mod launch;
pub mod phase;
pub mod pipeline;
pub mod queue;

pub use buffers::{BufferEntry, BufferKind, BufferTable, PipelineBuffers};
pub use launch::size_launch;
pub use phase::{Phase, PhaseKind};
pub use pipeline::{IterationReport, PhaseRecord, PipelineStats, WavefrontPipeline};
pub use queue::{next_scan_offset, DropTracker, QueueKind};
