use std::path::PathBuf;

use tracer_shared::TracerConfig;

use crate::error::{TracerError, TracerResult};

/// Directory holding the WGSL programs shipped with the crate.
pub const DEFAULT_PROGRAM_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/programs");

/// Largest warp size accepted; matches the usual device limit on invocations per workgroup.
pub const MAX_WARP_SIZE: u32 = 1024;

/// Scheduler settings fixed at pipeline construction
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Granularity used to round queue-driven launches.
    pub warp_size: u32,
    pub program_dir: PathBuf,
    /// Queue capacity in entries; defaults to the pixel count.
    pub queue_capacity: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            warp_size: TracerConfig::DEFAULT_WARP_SIZE,
            program_dir: PathBuf::from(DEFAULT_PROGRAM_DIR),
            queue_capacity: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_warp_size(mut self, warp_size: u32) -> Self {
        self.warp_size = warp_size;
        self
    }

    pub fn with_program_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.program_dir = dir.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: u32) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn validate(&self) -> TracerResult<()> {
        if self.warp_size == 0 || self.warp_size > MAX_WARP_SIZE {
            return Err(TracerError::config(format!(
                "warp size must be in 1..={MAX_WARP_SIZE}, got {}",
                self.warp_size
            )));
        }
        if self.queue_capacity == Some(0) {
            return Err(TracerError::config("queue capacity must be positive"));
        }
        Ok(())
    }

    /// Capacity of each queue for an image of `pixel_count` pixels.
    pub fn capacity_for(&self, pixel_count: u32) -> u32 {
        self.queue_capacity.unwrap_or(pixel_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity_for(16), 16);
    }

    #[test]
    fn rejects_zero_warp_and_capacity() {
        assert!(PipelineConfig::default().with_warp_size(0).validate().is_err());
        assert!(PipelineConfig::default().with_queue_capacity(0).validate().is_err());
        assert_eq!(PipelineConfig::default().with_queue_capacity(3).capacity_for(16), 3);
    }
}
