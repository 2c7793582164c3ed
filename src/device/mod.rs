//! GPU device platform on `wgpu`.
//!
//! Logical devices are grouped into contexts; every context owns one `wgpu`
//! device and queue requested from the selected adapter.
//!
//! # Architecture
//!
//! - [`Device`] / [`Context`]: logical compute units and the handles
//!   grouping them. Programs and buffers belong to exactly one context.
//! - [`Queue`]: in-order command submission into the context's `wgpu`
//!   queue. Every enqueue validates synchronously and returns an [`Event`].
//! - [`Buffer`] / [`HostBuffer`]: storage buffers and shared host staging.
//! - [`Program`] / [`Kernel`]: WGSL validated by `naga`, one compute
//!   pipeline per entry point.
//!
//! # Example
//!
//! ```rust,no_run
//! use haloconv::config::PlatformOptions;
//! use haloconv::device::{Buffer, Platform};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = Platform::init(PlatformOptions::uniform(2))?;
//! let queue = &platform.queues()[0];
//!
//! let buf = Buffer::from_slice(queue.context(), &[1.0f32, 2.0, 3.0])?;
//! assert_eq!(queue.read_buffer(&buf)?, vec![1.0, 2.0, 3.0]);
//! # Ok(())
//! # }
//! ```
//!
//! # Public API
//!
//! - [`Platform`] - device, context and queue creation
//! - [`Queue`] / [`Event`] - asynchronous command submission
//! - [`Buffer`] / [`HostBuffer`] - device and staging memory
//! - [`Program`] / [`Kernel`] / [`KernelArg`] - compiled entry points

mod buffer;
mod platform;
mod program;
mod queue;

use std::sync::atomic::{AtomicU64, Ordering};

pub use buffer::{Buffer, HostBuffer};
pub use platform::{Context, Device, Platform};
pub(crate) use program::analyze;
pub use program::{Kernel, KernelArg, Param, ParamKind, Program, BLOCK_PARAM};
pub use queue::{Event, Queue};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique object id.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn fresh() -> Self {
                Self(next_id())
            }

            /// Raw numeric id.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }
    };
}

object_id!(
    /// Identity of a [`Device`].
    DeviceId,
    "device"
);
object_id!(
    /// Identity of a [`Context`].
    ContextId,
    "context"
);
object_id!(
    /// Identity of a [`Queue`].
    QueueId,
    "queue"
);
object_id!(
    /// Identity of a [`Buffer`].
    BufferId,
    "buffer"
);
object_id!(
    /// Identity of a [`Program`].
    ProgramId,
    "program"
);

/// Rounds `size` up to the next multiple of `multiple`.
#[inline]
pub const fn round_up(size: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return size;
    }
    (size + multiple - 1) / multiple * multiple
}

/// Number of work-groups needed to cover `total` items.
#[inline]
pub fn workgroup_count(total: usize, workgroup_size: usize) -> usize {
    round_up(total, workgroup_size) / workgroup_size.max(1)
}

/// Largest power of two that is `<= limit` (and at least 1).
#[inline]
pub fn prev_power_of_two(limit: usize) -> usize {
    if limit <= 1 {
        return 1;
    }
    1 << (usize::BITS - 1 - limit.leading_zeros())
}
