//! # haloconv - Distributed Stencil Convolution
//!
//! Applies 1-D stencils and banded generalized filters to vectors
//! partitioned across several devices. Each device convolves its own
//! partition; the few outputs that depend on a neighbour's data are fixed up
//! after a halo exchange.
//!
//! ## Architecture
//! - [`device`]: `wgpu` platform with in-order queues, events, buffers and
//!   WGSL programs validated by `naga`
//! - [`compile`]: compile-once kernel cache keyed by element type, transform
//!   and context
//! - [`planner`]: work-group sizing against the device's local memory
//! - [`stencil`] / [`gstencil`]: interior kernel, halo exchange, boundary kernel
//! - [`expr`]: `y.assign(&z + &s * &x)` style expressions
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use haloconv::config::PlatformOptions;
//! use haloconv::device::Platform;
//! use haloconv::{CompilationService, DeviceVector, Stencil};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = Platform::init(PlatformOptions::uniform(2))?;
//! let service = Arc::new(CompilationService::new());
//!
//! let smooth = Stencil::from_weights(service, platform.queues(), &[0.25f32, 0.5, 0.25], 1)?;
//! let x = DeviceVector::from_slice(platform.queues(), &[0.0, 4.0, 8.0, 4.0, 0.0])?;
//! let y = x.like()?;
//!
//! y.assign(&smooth * &x)?;
//! assert_eq!(y.to_vec()?, vec![1.0, 4.0, 6.0, 4.0, 1.0]);
//! # Ok(())
//! # }
//! ```

pub mod compile;
pub mod config;
pub mod device;
pub mod error;
pub mod expr;
pub mod filter;
pub mod gstencil;
pub mod options;
pub mod planner;
pub mod scalar;
pub mod source;
pub mod stencil;
pub mod transform;
pub mod vector;

mod halo;

// Re-exports
pub use compile::CompilationService;
pub use config::{ConfigError, DeviceSpec, PlatformOptions};
pub use error::{StencilError, StencilResult};
pub use expr::{BinaryOp, Expr};
pub use filter::{FilterDescriptor, MatrixDescriptor};
pub use gstencil::GeneralizedStencil;
pub use options::{BuildOptions, OptionKind};
pub use scalar::{Real, Scalar};
pub use stencil::{Convolve, Stencil};
pub use transform::Transform;
pub use vector::DeviceVector;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
