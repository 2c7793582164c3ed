//! Unified error types for haloconv.
//!
//! This module provides [`StencilError`], the single error type returned by
//! filter construction, kernel compilation, device commands and expression
//! assignment. It uses the `thiserror` crate for ergonomic error handling.
//!
//! # Example
//!
//! ```rust
//! use haloconv::StencilError;
//!
//! fn validate_len(expected: usize, got: usize) -> Result<(), StencilError> {
//!     if expected != got {
//!         return Err(StencilError::shape_mismatch(expected, got));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::config::ConfigError;

/// Unified error type for haloconv operations.
///
/// Every error surfaces synchronously at the call that triggered it (filter
/// construction or a convolution call); none are deferred across calls.
#[derive(Error, Debug)]
pub enum StencilError {
    /// Invalid filter or platform configuration.
    ///
    /// Detected eagerly at construction; the object is never created.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A generated device program failed to build.
    ///
    /// Carries the device build log. Compilation is never retried.
    #[error("Failed to build program for {context}:\n{log}")]
    Compile {
        /// Human-readable identity of the context the build targeted.
        context: String,
        /// Build log reported by the device compiler.
        log: String,
    },

    /// No GPU adapter matched the platform options.
    #[error("GPU adapter not found: {0}")]
    AdapterNotFound(String),

    /// A device-API call failed.
    ///
    /// Propagated unchanged from the queue, buffer or kernel call.
    #[error("Device error: {0}")]
    Device(String),

    /// Length mismatch between vectors taking part in one operation.
    #[error("Shape mismatch: expected {expected} elements, got {got}")]
    ShapeMismatch {
        /// Expected number of elements.
        expected: usize,
        /// Actual number of elements.
        got: usize,
    },

    /// A partition is too short to provide its own halo.
    #[error("Partition on device {device} holds {size} elements, filter needs at least {required}")]
    PartitionTooSmall {
        /// Position of the device in the queue list.
        device: usize,
        /// Number of elements owned by the device.
        size: usize,
        /// Minimum partition size for this filter.
        required: usize,
    },

    /// No work-group size fits the filter into local memory and the variant
    /// has no fallback kernel.
    #[error("Local memory exhausted on device {device}: need {required} bytes, {available} available")]
    LocalMemoryExhausted {
        /// Position of the device in the queue list.
        device: usize,
        /// Bytes needed by the smallest admissible work-group.
        required: usize,
        /// Bytes available to the kernel.
        available: usize,
    },

    /// The expression cannot be evaluated by the convolution engine.
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),
}

/// Result type alias for haloconv operations.
pub type StencilResult<T> = Result<T, StencilError>;

impl StencilError {
    /// Creates a device error with the given message.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        StencilError::Device(msg.into())
    }

    /// Creates a compile error for the given context and build log.
    pub fn compile<C: Into<String>, L: Into<String>>(context: C, log: L) -> Self {
        StencilError::Compile {
            context: context.into(),
            log: log.into(),
        }
    }

    /// Creates a shape mismatch error.
    pub fn shape_mismatch(expected: usize, got: usize) -> Self {
        StencilError::ShapeMismatch { expected, got }
    }

    /// Creates a partition-too-small error.
    pub fn partition_too_small(device: usize, size: usize, required: usize) -> Self {
        StencilError::PartitionTooSmall {
            device,
            size,
            required,
        }
    }

    /// Creates a local memory exhaustion error.
    pub fn local_memory_exhausted(device: usize, required: usize, available: usize) -> Self {
        StencilError::LocalMemoryExhausted {
            device,
            required,
            available,
        }
    }

    /// Creates an unsupported expression error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        StencilError::UnsupportedExpression(msg.into())
    }

    /// Creates an adapter-not-found error.
    pub fn adapter_not_found<S: Into<String>>(msg: S) -> Self {
        StencilError::AdapterNotFound(msg.into())
    }

    /// Returns the build log if this is a compile error.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            StencilError::Compile { log, .. } => Some(log),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error() {
        let err = StencilError::device("Invalid mem object");
        assert!(err.to_string().contains("Device error"));
        assert!(err.to_string().contains("Invalid mem object"));
    }

    #[test]
    fn test_shape_mismatch() {
        let err = StencilError::shape_mismatch(5, 4);
        let msg = err.to_string();
        assert!(msg.contains("Shape mismatch"));
        assert!(msg.contains('5'));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_compile_error_keeps_log() {
        let err = StencilError::compile("context#3", "program:4: error: boom");
        assert_eq!(err.build_log(), Some("program:4: error: boom"));
        assert!(err.to_string().contains("context#3"));
        assert!(StencilError::device("x").build_log().is_none());
    }

    #[test]
    fn test_adapter_not_found() {
        let err = StencilError::adapter_not_found("no adapter named 'nvidia'");
        assert!(err.to_string().starts_with("GPU adapter not found"));
    }

    #[test]
    fn test_config_error() {
        let err: StencilError = ConfigError::EmptyWeights.into();
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_partition_too_small() {
        let err = StencilError::partition_too_small(1, 2, 3);
        assert!(err.to_string().contains("device 1"));
    }
}
