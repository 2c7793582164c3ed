//! Compilation service and compiled-variant cache.
//!
//! Programs are generated per element type (and, for generalized filters,
//! per transform), built once per context and kept for the lifetime of the
//! service. Work-group size and scratch capacity are baked into the WGSL
//! from the context's devices. The service owns the [`BuildOptions`] stacks and reads their top
//! entries for the context's first device at compile time.
//!
//! The cache lock is held while a variant is built, so concurrent callers
//! asking for the same key still trigger exactly one compilation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::ConfigError;
use crate::device::{Context, ContextId, Kernel, Program};
use crate::error::StencilResult;
use crate::options::{BuildOptions, OptionKind};
use crate::planner::kernel_workgroup_size;
use crate::scalar::{Real, Scalar};
use crate::source::{self, ProgramLayout};
use crate::transform::Transform;

/// Cache key of a compiled variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantKey {
    /// Context the variant was built for.
    pub context: ContextId,
    /// Device name of the element type.
    pub element: &'static str,
    /// Transform of a generalized variant.
    pub transform: Option<Transform>,
}

/// Compiled kernels of the plain filter.
#[derive(Debug, Clone)]
pub struct StencilKernels {
    /// Interior kernel staging through local memory.
    pub interior_fast: Kernel,
    /// Interior kernel without local staging.
    pub interior_fallback: Kernel,
    /// Additive edge correction.
    pub boundary: Kernel,
    /// Default work-group size for this context.
    pub work_group_size: usize,
}

/// Compiled kernels of the generalized filter.
#[derive(Debug, Clone)]
pub struct GStencilKernels {
    /// Interior kernel.
    pub interior: Kernel,
    /// Single work-group edge kernel.
    pub boundary: Kernel,
    /// Default work-group size for this context.
    pub work_group_size: usize,
}

#[derive(Debug, Clone)]
enum Variant {
    Plain(StencilKernels),
    Generalized(GStencilKernels),
}

/// Builds and caches device programs.
///
/// Share one service (behind an `Arc`) between every filter that should
/// reuse compiled variants.
///
/// # Example
///
/// ```rust,no_run
/// use haloconv::compile::CompilationService;
/// use haloconv::config::PlatformOptions;
/// use haloconv::device::Platform;
///
/// let platform = Platform::init(PlatformOptions::uniform(1)).unwrap();
/// let service = CompilationService::new();
/// let context = platform.queues()[0].context();
///
/// service.stencil_kernels::<f32>(context).unwrap();
/// service.stencil_kernels::<f32>(context).unwrap();
/// assert_eq!(service.compilations(), 1);
/// ```
#[derive(Default)]
pub struct CompilationService {
    options: BuildOptions,
    cache: Mutex<HashMap<VariantKey, Variant>>,
    compilations: AtomicUsize,
}

impl CompilationService {
    /// Creates a service with an empty cache and empty option stacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build option stacks applied to every compilation.
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Number of programs built so far (including failed builds).
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of cached variants.
    pub fn cached_variants(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns `true` if a variant for the key is cached.
    pub fn is_cached(&self, key: &VariantKey) -> bool {
        self.cache.lock().contains_key(key)
    }

    /// Kernels of the plain filter for element type `T` on `context`.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Compile`](crate::StencilError::Compile) if
    /// the program fails to build. Failures are not cached.
    pub fn stencil_kernels<T: Scalar>(&self, context: &Context) -> StencilResult<StencilKernels> {
        let key = VariantKey {
            context: context.id(),
            element: T::DEVICE_NAME,
            transform: None,
        };

        let mut cache = self.cache.lock();
        if let Some(Variant::Plain(kernels)) = cache.get(&key) {
            log::debug!("Reusing stencil kernels for {:?}", key);
            return Ok(kernels.clone());
        }

        let layout = ProgramLayout::for_devices(context.devices(), std::mem::size_of::<T>());
        let program = self.build(context, |header| source::stencil_program::<T>(header, &layout))?;
        let interior_fast = program.kernel(source::STENCIL_INTERIOR_FAST)?;
        let interior_fallback = program.kernel(source::STENCIL_INTERIOR_FALLBACK)?;
        let boundary = program.kernel(source::STENCIL_BOUNDARY)?;
        let work_group_size = kernel_workgroup_size(
            &[&interior_fast, &interior_fallback, &boundary],
            context.devices(),
        );

        let kernels = StencilKernels {
            interior_fast,
            interior_fallback,
            boundary,
            work_group_size,
        };
        cache.insert(key, Variant::Plain(kernels.clone()));
        Ok(kernels)
    }

    /// Kernels of the generalized filter for element type `T` and
    /// `transform` on `context`.
    pub fn gstencil_kernels<T: Real>(&self, context: &Context, transform: Transform) -> StencilResult<GStencilKernels> {
        let key = VariantKey {
            context: context.id(),
            element: T::DEVICE_NAME,
            transform: Some(transform),
        };

        let mut cache = self.cache.lock();
        if let Some(Variant::Generalized(kernels)) = cache.get(&key) {
            log::debug!("Reusing generalized kernels for {:?}", key);
            return Ok(kernels.clone());
        }

        let layout = ProgramLayout::for_devices(context.devices(), std::mem::size_of::<T>());
        let program = self.build(context, |header| source::gstencil_program::<T>(header, &layout, transform))?;
        let interior = program.kernel(source::GSTENCIL_INTERIOR)?;
        let boundary = program.kernel(source::GSTENCIL_BOUNDARY)?;
        let work_group_size = kernel_workgroup_size(&[&interior, &boundary], context.devices());

        let kernels = GStencilKernels {
            interior,
            boundary,
            work_group_size,
        };
        cache.insert(key, Variant::Generalized(kernels.clone()));
        Ok(kernels)
    }

    /// Generates and builds a program with the options of the context's
    /// first device.
    fn build<F>(&self, context: &Context, generate: F) -> StencilResult<Program>
    where
        F: FnOnce(&str) -> String,
    {
        let device = context.devices().first().ok_or(ConfigError::EmptyQueueList)?;
        let header = self.options.get(device, OptionKind::ProgramHeader);
        let flags = self.options.get(device, OptionKind::CompileFlags);
        let source = generate(&header);

        self.compilations.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Compiling program for {} ({} bytes, options '{}')",
            context.id(),
            source.len(),
            flags
        );

        Program::build(context, &source, &flags).map_err(|err| {
            log::error!(
                "Program build failed for {}\n{}\n{}",
                context.id(),
                source,
                err.build_log().unwrap_or_default()
            );
            err
        })
    }
}

impl fmt::Debug for CompilationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationService")
            .field("cached_variants", &self.cached_variants())
            .field("compilations", &self.compilations())
            .finish()
    }
}
