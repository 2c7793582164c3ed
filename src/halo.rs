//! Halo exchange between adjacent partitions.
//!
//! Each device owns a halo buffer of `lhalo + rhalo` elements:
//!
//! ```text
//! halo buffer of device d:  [ tail of d-1 : lhalo ][ head of d+1 : rhalo ]
//! ```
//!
//! Transfers run on a secondary queue per device so they never wait behind
//! interior compute. Fragments go through one host staging buffer with a
//! slot of `lhalo + rhalo` elements per donating device:
//!
//! ```text
//! slot of device d:  [ head of d : rhalo ][ tail of d : lhalo ]
//! ```

use crate::device::{Buffer, Event, HostBuffer, Queue};
use crate::error::StencilResult;
use crate::scalar::Scalar;
use crate::vector::DeviceVector;

/// Halo buffers and transfer queues of one filter instance.
pub(crate) struct HaloExchange<T> {
    lhalo: usize,
    rhalo: usize,
    /// Transfer queues; empty on a single device.
    secondary: Vec<Queue>,
    buffers: Vec<Buffer<T>>,
    staging: HostBuffer<T>,
}

/// `(has_left, has_right)` for device `d` of `devices`.
#[inline]
pub(crate) fn neighbours(d: usize, devices: usize) -> (bool, bool) {
    (d > 0, d + 1 < devices)
}

impl<T: Scalar> HaloExchange<T> {
    /// Allocates halo buffers on every device and, when there is more than
    /// one device, a transfer queue per device.
    pub fn new(queues: &[Queue], lhalo: usize, rhalo: usize) -> StencilResult<Self> {
        let width = lhalo + rhalo;
        let secondary = if queues.len() > 1 {
            queues.iter().map(Queue::sibling).collect::<StencilResult<Vec<_>>>()?
        } else {
            Vec::new()
        };
        let buffers = queues
            .iter()
            .map(|q| Buffer::new(q.context(), width))
            .collect::<StencilResult<Vec<_>>>()?;
        Ok(Self {
            lhalo,
            rhalo,
            secondary,
            buffers,
            staging: HostBuffer::new(queues.len() * width),
        })
    }

    /// Halo buffer of device `d`.
    #[inline]
    pub fn buffer(&self, d: usize) -> &Buffer<T> {
        &self.buffers[d]
    }

    /// Returns `true` if there are neighbours to exchange with.
    #[inline]
    pub fn is_distributed(&self) -> bool {
        !self.secondary.is_empty()
    }

    /// Issues the fragment reads from `x`.
    ///
    /// Each read waits for a marker on the device's primary queue, so work
    /// enqueued before this call (for example the writes producing `x`)
    /// completes first.
    pub fn issue_reads(&self, primary: &[Queue], x: &DeviceVector<T>) -> StencilResult<Vec<Event>> {
        let devices = self.secondary.len();
        let width = self.lhalo + self.rhalo;
        let mut events = Vec::with_capacity(2 * devices);

        for (d, queue) in self.secondary.iter().enumerate() {
            let (has_left, has_right) = neighbours(d, devices);
            let ready = [primary[d].enqueue_marker()?];
            let part = x.part_size(d);
            let slot = d * width;

            if has_left && self.rhalo > 0 {
                events.push(queue.enqueue_read_buffer(x.buffer(d), 0, self.rhalo, &self.staging, slot, &ready)?);
            }
            if has_right && self.lhalo > 0 {
                events.push(queue.enqueue_read_buffer(
                    x.buffer(d),
                    part - self.lhalo,
                    self.lhalo,
                    &self.staging,
                    slot + self.rhalo,
                    &ready,
                )?);
            }
        }
        Ok(events)
    }

    /// Waits for `reads` and writes every device's halo buffer on its
    /// primary queue.
    pub fn apply(&self, primary: &[Queue], reads: &[Event]) -> StencilResult<()> {
        Event::wait_all(reads)?;

        let devices = self.secondary.len();
        let width = self.lhalo + self.rhalo;
        for (d, queue) in primary.iter().enumerate().take(devices) {
            let (has_left, has_right) = neighbours(d, devices);
            if has_left && self.lhalo > 0 {
                let start = (d - 1) * width + self.rhalo;
                let tail = self.staging.snapshot(start..start + self.lhalo)?;
                queue.enqueue_write_buffer(&self.buffers[d], 0, tail, &[])?;
            }
            if has_right && self.rhalo > 0 {
                let start = (d + 1) * width;
                let head = self.staging.snapshot(start..start + self.rhalo)?;
                queue.enqueue_write_buffer(&self.buffers[d], self.lhalo, head, &[])?;
            }
        }
        Ok(())
    }
}
