use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or driving the wavefront pipeline.
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("no usable compute device: {0}")]
    DeviceNotFound(String),

    #[error("failed to compile program `{program}`:\n{log}")]
    Compile { program: String, log: String },

    #[error("cannot create kernel `{entry_point}` from program `{program}`: {reason}")]
    KernelCreation {
        program: String,
        entry_point: String,
        reason: String,
    },

    #[error("failed to allocate buffer `{label}` ({size} bytes): {reason}")]
    BufferAllocation {
        label: String,
        size: u64,
        reason: String,
    },

    #[error("invalid arguments for kernel `{kernel}`: {reason}")]
    Binding { kernel: String, reason: String },

    #[error("launch of kernel `{kernel}` rejected: {reason}")]
    Dispatch { kernel: String, reason: String },

    #[error("buffer readback failed: {0}")]
    Readback(String),

    #[error("material kind `{0}` has no device representation")]
    UnsupportedMaterial(&'static str),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read program source {path:?}")]
    ProgramSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TracerError {
    pub fn dispatch(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }

    pub fn binding(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Binding {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type TracerResult<T> = Result<T, TracerError>;
