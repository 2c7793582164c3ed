//! Generalized (banded-matrix) stencil.
//!
//! Each of the `rows` weight rows is convolved with the same window, the
//! row sums pass through the selected [`Transform`] and are added:
//!
//! ```text
//! y[i] = sum_k F( sum_j S[k][j] * x[i + j - center] )
//! ```
//!
//! The transform is compiled into the program, so every transform is a
//! separate cached variant. Variants are resolved on first use and planned
//! per device; there is no fallback kernel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compile::{CompilationService, GStencilKernels};
use crate::device::{round_up, Buffer, KernelArg, Queue};
use crate::error::{StencilError, StencilResult};
use crate::filter::MatrixDescriptor;
use crate::halo::{neighbours, HaloExchange};
use crate::planner::{gstencil_footprint, local_capacity, plan_gstencil};
use crate::scalar::Real;
use crate::stencil::{check_operands, halo_arg, transition, Convolve, Phase};
use crate::transform::Transform;
use crate::vector::DeviceVector;

/// Kernels and work-group sizes of one transform on every device.
struct Variant {
    kernels: Vec<GStencilKernels>,
    work_group_sizes: Vec<usize>,
}

/// Generalized stencil distributed over a queue list.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use haloconv::config::PlatformOptions;
/// use haloconv::device::Platform;
/// use haloconv::{CompilationService, DeviceVector, GeneralizedStencil, MatrixDescriptor, Transform};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let platform = Platform::init(PlatformOptions::uniform(1))?;
/// let service = Arc::new(CompilationService::new());
///
/// // One row: the centered difference, then its absolute value.
/// let matrix = MatrixDescriptor::new(1, 3, 1, vec![-0.5f64, 0.0, 0.5])?;
/// let g = GeneralizedStencil::new(service, platform.queues(), matrix)?;
///
/// let x = DeviceVector::from_slice(platform.queues(), &[4.0, 2.0, 0.0, 2.0])?;
/// let y = x.like()?;
/// g.convolve(Transform::Fabs, &x, &y, 0.0, 1.0)?;
/// assert_eq!(y.to_vec()?, vec![1.0, 2.0, 0.0, 1.0]);
/// # Ok(())
/// # }
/// ```
pub struct GeneralizedStencil<T: Real> {
    service: Arc<CompilationService>,
    queues: Vec<Queue>,
    matrix: MatrixDescriptor<T>,
    weights: Vec<Buffer<T>>,
    halo: Option<HaloExchange<T>>,
    variants: Mutex<HashMap<Transform, Arc<Variant>>>,
}

impl<T: Real> GeneralizedStencil<T> {
    /// Creates the filter and uploads the matrix to every device.
    pub fn new(service: Arc<CompilationService>, queues: &[Queue], matrix: MatrixDescriptor<T>) -> StencilResult<Self> {
        if queues.is_empty() {
            return Err(crate::config::ConfigError::EmptyQueueList.into());
        }

        let weights = queues
            .iter()
            .map(|q| Buffer::from_slice(q.context(), matrix.data()))
            .collect::<StencilResult<Vec<_>>>()?;
        let halo = if matrix.cols() > 1 {
            Some(HaloExchange::new(queues, matrix.left_halo(), matrix.right_halo())?)
        } else {
            None
        };

        Ok(Self {
            service,
            queues: queues.to_vec(),
            matrix,
            weights,
            halo,
            variants: Mutex::new(HashMap::new()),
        })
    }

    /// Creates the filter from a row-major matrix.
    pub fn from_matrix(
        service: Arc<CompilationService>,
        queues: &[Queue],
        rows: usize,
        cols: usize,
        center: usize,
        data: &[T],
    ) -> StencilResult<Self> {
        Self::new(service, queues, MatrixDescriptor::new(rows, cols, center, data.to_vec())?)
    }

    /// Matrix descriptor.
    pub fn matrix(&self) -> &MatrixDescriptor<T> {
        &self.matrix
    }

    /// Queues the filter runs on.
    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    /// Interior work-group size used for `transform` on device `d`.
    pub fn work_group_size(&self, transform: Transform, d: usize) -> StencilResult<usize> {
        Ok(self.variant(transform)?.work_group_sizes[d])
    }

    fn variant(&self, transform: Transform) -> StencilResult<Arc<Variant>> {
        let mut variants = self.variants.lock();
        if let Some(variant) = variants.get(&transform) {
            return Ok(Arc::clone(variant));
        }

        let elem = std::mem::size_of::<T>();
        let (rows, cols) = (self.matrix.rows(), self.matrix.cols());
        let (lhalo, rhalo) = (self.matrix.left_halo(), self.matrix.right_halo());

        let mut kernels = Vec::with_capacity(self.queues.len());
        let mut work_group_sizes = Vec::with_capacity(self.queues.len());
        for (d, queue) in self.queues.iter().enumerate() {
            let device = queue.device();
            let variant = self.service.gstencil_kernels::<T>(queue.context(), transform)?;

            let capacity = local_capacity(&variant.interior, device, elem);
            let wgs = plan_gstencil(variant.work_group_size, rows, cols, capacity).ok_or_else(|| {
                StencilError::local_memory_exhausted(d, gstencil_footprint(cols, rows, cols) * elem, capacity * elem)
            })?;

            let boundary_capacity = local_capacity(&variant.boundary, device, elem);
            let boundary_local = lhalo + rhalo + lhalo.max(rhalo);
            if boundary_local > boundary_capacity {
                return Err(StencilError::local_memory_exhausted(
                    d,
                    boundary_local * elem,
                    boundary_capacity * elem,
                ));
            }

            log::debug!(
                "Device {} ({}): generalized {} interior, work-group {}",
                d,
                device.name(),
                transform,
                wgs
            );
            kernels.push(variant);
            work_group_sizes.push(wgs);
        }

        let variant = Arc::new(Variant {
            kernels,
            work_group_sizes,
        });
        variants.insert(transform, Arc::clone(&variant));
        Ok(variant)
    }

    fn check_partitions(&self, x: &DeviceVector<T>) -> StencilResult<()> {
        let required = self.matrix.left_halo() + self.matrix.right_halo();
        for d in 0..x.devices() {
            if x.part_size(d) < required {
                return Err(StencilError::partition_too_small(d, x.part_size(d), required));
            }
        }
        Ok(())
    }

    /// Computes `y = alpha * y + beta * conv(x)` (or `beta * conv(x)` for a
    /// zero `alpha`) with row transform `transform`.
    pub fn convolve(&self, transform: Transform, x: &DeviceVector<T>, y: &DeviceVector<T>, alpha: T, beta: T) -> StencilResult<()> {
        check_operands(&self.queues, x, y)?;
        self.check_partitions(x)?;
        let variant = self.variant(transform)?;

        let (rows, cols) = (self.matrix.rows(), self.matrix.cols());
        let (lhalo, rhalo) = (self.matrix.left_halo(), self.matrix.right_halo());
        let rows_arg = u32::try_from(rows).map_err(|_| StencilError::device("Invalid arg value: too many rows"))?;
        let cols_arg = u32::try_from(cols).map_err(|_| StencilError::device("Invalid arg value: too many columns"))?;
        let lhalo_arg = halo_arg(lhalo)?;
        let rhalo_arg = halo_arg(rhalo)?;

        let mut phase = Phase::Idle;

        let reads = match &self.halo {
            Some(halo) if halo.is_distributed() => halo.issue_reads(&self.queues, x)?,
            _ => Vec::new(),
        };

        for (d, queue) in self.queues.iter().enumerate() {
            let n = x.part_size(d);
            if n == 0 {
                continue;
            }
            let wgs = variant.work_group_sizes[d];
            let args = [
                ("n", KernelArg::size(n)),
                ("rows", KernelArg::uint(rows_arg)),
                ("cols", KernelArg::uint(cols_arg)),
                ("lhalo", KernelArg::uint(lhalo_arg)),
                ("rhalo", KernelArg::uint(rhalo_arg)),
                ("has_left", KernelArg::flag(false)),
                ("has_right", KernelArg::flag(false)),
                ("x", KernelArg::buffer(x.buffer(d))),
                ("s", KernelArg::buffer(&self.weights[d])),
                ("y", KernelArg::buffer(y.buffer(d))),
                ("alpha", KernelArg::real(alpha)),
                ("beta", KernelArg::real(beta)),
                ("loc", KernelArg::local::<T>(gstencil_footprint(wgs, rows, cols))),
            ];
            queue.enqueue_kernel(&variant.kernels[d].interior, round_up(n, wgs), Some(wgs), &args)?;
        }
        transition(&mut phase, Phase::InteriorLaunched);

        if let Some(halo) = &self.halo {
            if halo.is_distributed() {
                transition(&mut phase, Phase::HaloCopied);
                halo.apply(&self.queues, &reads)?;
            }
            transition(&mut phase, Phase::HaloApplied);

            for (d, queue) in self.queues.iter().enumerate() {
                let (has_left, has_right) = neighbours(d, self.queues.len());
                let kernels = &variant.kernels[d];
                let block = lhalo.max(rhalo).min(kernels.work_group_size);
                let args = [
                    ("n", KernelArg::size(x.part_size(d))),
                    ("rows", KernelArg::uint(rows_arg)),
                    ("cols", KernelArg::uint(cols_arg)),
                    ("lhalo", KernelArg::uint(lhalo_arg)),
                    ("rhalo", KernelArg::uint(rhalo_arg)),
                    ("has_left", KernelArg::flag(has_left)),
                    ("has_right", KernelArg::flag(has_right)),
                    ("x", KernelArg::buffer(x.buffer(d))),
                    ("h", KernelArg::buffer(halo.buffer(d))),
                    ("s", KernelArg::buffer(&self.weights[d])),
                    ("y", KernelArg::buffer(y.buffer(d))),
                    ("alpha", KernelArg::real(alpha)),
                    ("beta", KernelArg::real(beta)),
                    ("loc", KernelArg::local::<T>(lhalo + rhalo + lhalo.max(rhalo))),
                ];
                queue.enqueue_kernel(&kernels.boundary, block, Some(block), &args)?;
            }
            transition(&mut phase, Phase::BoundaryLaunched);
        }

        transition(&mut phase, Phase::Idle);
        Ok(())
    }
}

/// A generalized stencil bound to one transform.
pub struct Transformed<'a, T: Real> {
    filter: &'a GeneralizedStencil<T>,
    transform: Transform,
}

impl<T: Real> GeneralizedStencil<T> {
    /// Binds `transform`, giving a filter usable wherever [`Convolve`] is.
    pub fn with_transform(&self, transform: Transform) -> Transformed<'_, T> {
        Transformed {
            filter: self,
            transform,
        }
    }
}

impl<T: Real> Convolve<T> for Transformed<'_, T> {
    fn convolve(&self, x: &DeviceVector<T>, y: &DeviceVector<T>, alpha: T, beta: T) -> StencilResult<()> {
        self.filter.convolve(self.transform, x, y, alpha, beta)
    }
}

impl<T: Real> fmt::Debug for GeneralizedStencil<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transforms: Vec<Transform> = self.variants.lock().keys().copied().collect();
        f.debug_struct("GeneralizedStencil")
            .field("matrix", &self.matrix)
            .field("devices", &self.queues.len())
            .field("transforms", &transforms)
            .finish()
    }
}
