//! Capacity planner.
//!
//! Decides per device whether the local-memory interior kernel fits and with
//! which work-group size. Starting from the variant's default size the
//! work-group is halved while it is still at least the minimum and its
//! footprint exceeds the available local memory:
//!
//! | Variant | Minimum | Footprint (elements) | If nothing fits |
//! |---------|---------|----------------------|-----------------|
//! | plain | `L` | `wgs + 2L` | fallback kernel, default size |
//! | generalized | `cols` | `wgs + (cols - 1) + rows * cols` | error |
//!
//! Falling back is not an error and is never reported as one.

use crate::config::MAX_WORK_GROUP_SIZE;
use crate::device::{prev_power_of_two, Device, Kernel};

/// Interior compute strategy of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Window staged in local memory.
    Fast,
    /// Direct global-memory reads.
    Fallback,
}

/// Strategy and work-group size chosen for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Interior kernel to launch.
    pub strategy: Strategy,
    /// Work-group size of the interior launch.
    pub work_group_size: usize,
}

/// Halves `default_wgs` until `footprint(wgs) <= capacity` or it drops
/// below `min_wgs`. Returns `None` in the latter case.
pub fn shrink_to_fit<F>(default_wgs: usize, min_wgs: usize, capacity: usize, footprint: F) -> Option<usize>
where
    F: Fn(usize) -> usize,
{
    let mut wgs = default_wgs;
    while wgs > 0 && wgs >= min_wgs && footprint(wgs) > capacity {
        wgs /= 2;
    }
    if wgs == 0 || wgs < min_wgs {
        None
    } else {
        Some(wgs)
    }
}

/// Plans the plain filter interior for a filter of `width` taps.
///
/// `capacity` is in elements.
pub fn plan_stencil(default_wgs: usize, width: usize, capacity: usize) -> Plan {
    match shrink_to_fit(default_wgs, width, capacity, |wgs| wgs + 2 * width) {
        Some(work_group_size) => Plan {
            strategy: Strategy::Fast,
            work_group_size,
        },
        None => Plan {
            strategy: Strategy::Fallback,
            work_group_size: default_wgs,
        },
    }
}

/// Plans the generalized filter interior; `None` if no work-group of at
/// least `cols` items fits.
pub fn plan_gstencil(default_wgs: usize, rows: usize, cols: usize, capacity: usize) -> Option<usize> {
    shrink_to_fit(default_wgs, cols, capacity, |wgs| gstencil_footprint(wgs, rows, cols))
}

/// Local elements used by the generalized interior kernel.
#[inline]
pub fn gstencil_footprint(wgs: usize, rows: usize, cols: usize) -> usize {
    wgs + (cols - 1) + rows * cols
}

/// Local memory (in elements of `elem_size` bytes) left for `kernel`'s
/// scratch on `device`, capped by the scratch array compiled into it.
pub fn local_capacity(kernel: &Kernel, device: &Device, elem_size: usize) -> usize {
    let free = device
        .local_mem_size()
        .saturating_sub(kernel.local_mem_size(device))
        / elem_size.max(1);
    free.min(kernel.local_capacity())
}

/// Default work-group size of a variant: the largest power of two within
/// [`MAX_WORK_GROUP_SIZE`] and within every kernel's limit on every device.
pub fn kernel_workgroup_size(kernels: &[&Kernel], devices: &[Device]) -> usize {
    let limit = kernels
        .iter()
        .flat_map(|k| devices.iter().map(move |d| k.work_group_size(d)))
        .fold(MAX_WORK_GROUP_SIZE, usize::min);
    prev_power_of_two(limit)
}
