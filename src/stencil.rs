//! Plain stencil filter and the convolution executor.
//!
//! A convolution call runs in two phases:
//!
//! - **Interior**: every device convolves its own partition, summing only
//!   taps that fall inside it, and blends the result into `y`.
//! - **Boundary** (only when the filter has halos): fragments of neighbouring
//!   partitions are exchanged and a boundary kernel adds the missing taps of
//!   the first `left_halo` and last `right_halo` outputs. Taps beyond the
//!   ends of the whole vector use the nearest element.
//!
//! Interior launches never wait for halo transfers.
//!
//! # Example
//!
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
//! let laplace = Stencil::from_weights(service, platform.queues(), &[1.0f64, -2.0, 1.0], 1)?;
//! let x = DeviceVector::from_slice(platform.queues(), &[1.0, 2.0, 4.0, 8.0, 16.0])?;
//! let y = x.like()?;
//!
//! laplace.apply(&x, &y)?;
//! assert_eq!(y.to_vec()?, vec![1.0, 1.0, 2.0, 4.0, -8.0]);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use crate::compile::{CompilationService, StencilKernels};
use crate::device::{round_up, Buffer, KernelArg, Queue};
use crate::error::{StencilError, StencilResult};
use crate::filter::FilterDescriptor;
use crate::halo::{neighbours, HaloExchange};
use crate::planner::{local_capacity, plan_stencil, Plan, Strategy};
use crate::scalar::Scalar;
use crate::vector::DeviceVector;

/// A filter that can be applied to a distributed vector.
pub trait Convolve<T: Scalar> {
    /// Computes `y = alpha * y + beta * conv(x)`, or `y = beta * conv(x)`
    /// when `alpha` is zero.
    fn convolve(&self, x: &DeviceVector<T>, y: &DeviceVector<T>, alpha: T, beta: T) -> StencilResult<()>;
}

impl<T: Scalar, C: Convolve<T> + ?Sized> Convolve<T> for &C {
    fn convolve(&self, x: &DeviceVector<T>, y: &DeviceVector<T>, alpha: T, beta: T) -> StencilResult<()> {
        (**self).convolve(x, y, alpha, beta)
    }
}

/// Executor states of one convolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    InteriorLaunched,
    HaloCopied,
    HaloApplied,
    BoundaryLaunched,
}

pub(crate) fn transition(from: &mut Phase, to: Phase) {
    log::trace!("convolution {:?} -> {:?}", from, to);
    *from = to;
}

/// Checks that `x` and `y` match each other and the filter's queues.
pub(crate) fn check_operands<T>(queues: &[Queue], x: &DeviceVector<T>, y: &DeviceVector<T>) -> StencilResult<()> {
    x.check_layout(y)?;
    if x.devices() != queues.len() {
        return Err(StencilError::device(format!(
            "Invalid mem object: vector spans {} devices, filter {}",
            x.devices(),
            queues.len()
        )));
    }
    if x.shares_buffers(y) {
        return Err(StencilError::device(
            "Mem copy overlap: input and output vectors share memory",
        ));
    }
    Ok(())
}

/// Plain stencil filter distributed over a queue list.
pub struct Stencil<T: Scalar> {
    queues: Vec<Queue>,
    filter: FilterDescriptor<T>,
    weights: Vec<Buffer<T>>,
    kernels: Vec<StencilKernels>,
    plans: Vec<Plan>,
    halo: Option<HaloExchange<T>>,
}

impl<T: Scalar> Stencil<T> {
    /// Creates the filter: uploads weights, compiles (or reuses) kernels for
    /// every context and plans every device.
    ///
    /// # Errors
    ///
    /// - [`StencilError::Config`] if `queues` is empty.
    /// - [`StencilError::Compile`] if a program fails to build.
    pub fn new(service: Arc<CompilationService>, queues: &[Queue], filter: FilterDescriptor<T>) -> StencilResult<Self> {
        if queues.is_empty() {
            return Err(crate::config::ConfigError::EmptyQueueList.into());
        }

        let mut weights = Vec::with_capacity(queues.len());
        let mut kernels = Vec::with_capacity(queues.len());
        let mut plans = Vec::with_capacity(queues.len());

        for (d, queue) in queues.iter().enumerate() {
            weights.push(Buffer::from_slice(queue.context(), filter.weights())?);

            let variant = service.stencil_kernels::<T>(queue.context())?;
            let capacity = local_capacity(&variant.interior_fast, queue.device(), std::mem::size_of::<T>());
            let plan = plan_stencil(variant.work_group_size, filter.width(), capacity);
            log::debug!(
                "Device {} ({}): {:?} interior, work-group {}",
                d,
                queue.device().name(),
                plan.strategy,
                plan.work_group_size
            );

            kernels.push(variant);
            plans.push(plan);
        }

        let halo = if filter.has_halo() {
            Some(HaloExchange::new(queues, filter.left_halo(), filter.right_halo())?)
        } else {
            None
        };

        Ok(Self {
            queues: queues.to_vec(),
            filter,
            weights,
            kernels,
            plans,
            halo,
        })
    }

    /// Creates the filter from weights and a center index.
    pub fn from_weights(service: Arc<CompilationService>, queues: &[Queue], weights: &[T], center: usize) -> StencilResult<Self> {
        Self::new(service, queues, FilterDescriptor::new(weights.to_vec(), center)?)
    }

    /// Filter descriptor.
    pub fn filter(&self) -> &FilterDescriptor<T> {
        &self.filter
    }

    /// Queues the filter runs on.
    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    /// Plan of device `d`.
    pub fn plan(&self, d: usize) -> Plan {
        self.plans[d]
    }

    /// Computes `y = conv(x)`.
    pub fn apply(&self, x: &DeviceVector<T>, y: &DeviceVector<T>) -> StencilResult<()> {
        self.convolve(x, y, T::zero(), T::one())
    }

    fn check_partitions(&self, x: &DeviceVector<T>) -> StencilResult<()> {
        if !self.filter.has_halo() {
            return Ok(());
        }
        let required = self.filter.left_halo().max(self.filter.right_halo());
        for d in 0..x.devices() {
            if x.part_size(d) < required {
                return Err(StencilError::partition_too_small(d, x.part_size(d), required));
            }
        }
        Ok(())
    }

    fn launch_interior(&self, d: usize, x: &DeviceVector<T>, y: &DeviceVector<T>, alpha: T, beta: T) -> StencilResult<()> {
        let n = x.part_size(d);
        let plan = self.plans[d];
        let wgs = plan.work_group_size;
        let lhalo = self.filter.left_halo();
        let rhalo = self.filter.right_halo();

        let mut args = vec![
            ("n", KernelArg::size(n)),
            ("lhalo", KernelArg::uint(halo_arg(lhalo)?)),
            ("rhalo", KernelArg::uint(halo_arg(rhalo)?)),
            ("has_left", KernelArg::flag(false)),
            ("has_right", KernelArg::flag(false)),
            ("x", KernelArg::buffer(x.buffer(d))),
            ("s", KernelArg::buffer(&self.weights[d])),
            ("y", KernelArg::buffer(y.buffer(d))),
            ("alpha", KernelArg::real(alpha)),
            ("beta", KernelArg::real(beta)),
        ];
        let kernel = match plan.strategy {
            Strategy::Fast => {
                args.push(("loc", KernelArg::local::<T>(wgs + 2 * (lhalo + rhalo) + 1)));
                &self.kernels[d].interior_fast
            }
            Strategy::Fallback => &self.kernels[d].interior_fallback,
        };

        self.queues[d].enqueue_kernel(kernel, round_up(n, wgs), Some(wgs), &args)?;
        Ok(())
    }

    fn launch_boundary(&self, halo: &HaloExchange<T>, d: usize, x: &DeviceVector<T>, y: &DeviceVector<T>, alpha: T, beta: T) -> StencilResult<()> {
        let lhalo = self.filter.left_halo();
        let rhalo = self.filter.right_halo();
        let (has_left, has_right) = neighbours(d, self.queues.len());
        let kernels = &self.kernels[d];

        // One lane per edge output.
        let lanes = lhalo + rhalo;
        let block = lanes.min(kernels.work_group_size);

        let args = [
            ("n", KernelArg::size(x.part_size(d))),
            ("lhalo", KernelArg::uint(halo_arg(lhalo)?)),
            ("rhalo", KernelArg::uint(halo_arg(rhalo)?)),
            ("has_left", KernelArg::flag(has_left)),
            ("has_right", KernelArg::flag(has_right)),
            ("x", KernelArg::buffer(x.buffer(d))),
            ("h", KernelArg::buffer(halo.buffer(d))),
            ("s", KernelArg::buffer(&self.weights[d])),
            ("y", KernelArg::buffer(y.buffer(d))),
            ("alpha", KernelArg::real(alpha)),
            ("beta", KernelArg::real(beta)),
        ];
        self.queues[d].enqueue_kernel(&kernels.boundary, round_up(lanes, block), Some(block), &args)?;
        Ok(())
    }
}

pub(crate) fn halo_arg(width: usize) -> StencilResult<u32> {
    u32::try_from(width).map_err(|_| StencilError::device(format!("Invalid arg value: halo width {}", width)))
}

impl<T: Scalar> Convolve<T> for Stencil<T> {
    fn convolve(&self, x: &DeviceVector<T>, y: &DeviceVector<T>, alpha: T, beta: T) -> StencilResult<()> {
        check_operands(&self.queues, x, y)?;
        self.check_partitions(x)?;

        let mut phase = Phase::Idle;

        let reads = match &self.halo {
            Some(halo) if halo.is_distributed() => halo.issue_reads(&self.queues, x)?,
            _ => Vec::new(),
        };

        for d in 0..self.queues.len() {
            if x.part_size(d) > 0 {
                self.launch_interior(d, x, y, alpha, beta)?;
            }
        }
        transition(&mut phase, Phase::InteriorLaunched);

        if let Some(halo) = &self.halo {
            if halo.is_distributed() {
                transition(&mut phase, Phase::HaloCopied);
                halo.apply(&self.queues, &reads)?;
            }
            transition(&mut phase, Phase::HaloApplied);

            for d in 0..self.queues.len() {
                self.launch_boundary(halo, d, x, y, alpha, beta)?;
            }
            transition(&mut phase, Phase::BoundaryLaunched);
        }

        transition(&mut phase, Phase::Idle);
        Ok(())
    }
}

impl<T: Scalar> fmt::Debug for Stencil<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stencil")
            .field("filter", &self.filter)
            .field("devices", &self.queues.len())
            .field("plans", &self.plans)
            .finish()
    }
}
