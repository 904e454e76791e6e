//! Error types for the wavefront renderer.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for renderer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A dimensional or sampling parameter is not strictly positive.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// An append buffer received more items than it can hold.
    #[error("Buffer '{buffer}' overflowed: capacity {capacity}, {dropped} writes dropped")]
    ResourceOverflow {
        buffer: &'static str,
        capacity: usize,
        dropped: usize,
    },

    /// The scene has no emissive triangles.
    #[error("Scene contains no lights")]
    NoLights,

    /// A ray tracing, denoise or upscale backend reported failure.
    #[error("{backend} backend failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    /// `run` was called twice without `swap_buffers` in between.
    #[error("ReSTIR run requested before the reservoir buffers were swapped")]
    SwapRequired,

    /// Secondary resampling requested before this frame's `run`.
    #[error("Secondary light resampling requested before the frame's primary run")]
    SamplerNotReady,

    /// The deferred operation queue was closed while an operation was pending.
    #[error("Deferred operation queue closed")]
    QueueClosed,

    /// Image dimensions do not match the target they are written to.
    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// A scene handle does not refer to a live resource.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Settings file could not be found.
    #[error("Settings file not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a backend failure.
    pub fn backend(backend: &'static str, msg: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: msg.into(),
        }
    }

    /// Whether the error only invalidates the current frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::NoLights | Self::ResourceOverflow { .. } | Self::QueueClosed
        )
    }
}

/// Result type alias for renderer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::ResourceOverflow {
            buffer: "shadow_rays",
            capacity: 16,
            dropped: 3,
        };
        assert!(e.to_string().contains("shadow_rays"));
        assert!(e.to_string().contains("16"));
        assert!(e.to_string().contains('3'));

        let e = Error::backend("ray tracing", "launch failed");
        assert!(e.to_string().contains("launch failed"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_frame_local_errors() {
        assert!(Error::backend("denoise", "x").is_frame_local());
        assert!(Error::NoLights.is_frame_local());
        assert!(!Error::config("width").is_frame_local());
        assert!(!Error::SwapRequired.is_frame_local());
    }
}
