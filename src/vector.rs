//! Distributed vectors.
//!
//! A [`DeviceVector`] splits a sequence into contiguous partitions, one per
//! queue. Adjacent queues own adjacent index ranges:
//!
//! ```text
//! queue 0        queue 1        queue 2
//! [0 ..... s1)   [s1 ..... s2)  [s2 ..... len)
//! ```

use std::fmt;

use crate::config::ConfigError;
use crate::device::{Buffer, Event, HostBuffer, Queue};
use crate::error::{StencilError, StencilResult};
use crate::scalar::Scalar;

/// A vector partitioned across devices.
///
/// # Example
///
/// ```rust,no_run
/// use haloconv::config::PlatformOptions;
/// use haloconv::device::Platform;
/// use haloconv::DeviceVector;
///
/// let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
/// let v = DeviceVector::from_slice(platform.queues(), &[1.0f32, 2.0, 3.0, 4.0, 5.0]).unwrap();
/// assert_eq!(v.partition(), vec![3, 2]);
/// assert_eq!(v.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
/// ```
pub struct DeviceVector<T> {
    queues: Vec<Queue>,
    parts: Vec<Buffer<T>>,
    offsets: Vec<usize>,
}

/// Even split: every device but the last gets `ceil(len / devices)`.
pub fn even_partition(len: usize, devices: usize) -> Vec<usize> {
    if devices == 0 {
        return Vec::new();
    }
    let chunk = (len + devices - 1) / devices;
    (0..devices)
        .map(|d| len.min((d + 1) * chunk).saturating_sub(d * chunk))
        .collect()
}

impl<T: Scalar> DeviceVector<T> {
    /// Zero-filled vector of `len` elements split evenly over `queues`.
    pub fn new(queues: &[Queue], len: usize) -> StencilResult<Self> {
        Self::with_partition(queues, &even_partition(len, queues.len()))
    }

    /// Zero-filled vector with explicit partition sizes, one per queue.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyQueueList`] if `queues` is empty.
    /// - [`StencilError::ShapeMismatch`] if `sizes` and `queues` differ in length.
    pub fn with_partition(queues: &[Queue], sizes: &[usize]) -> StencilResult<Self> {
        if queues.is_empty() {
            return Err(ConfigError::EmptyQueueList.into());
        }
        if sizes.len() != queues.len() {
            return Err(StencilError::shape_mismatch(queues.len(), sizes.len()));
        }

        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        offsets.push(0);
        for size in sizes {
            offsets.push(offsets[offsets.len() - 1] + size);
        }

        let parts = queues
            .iter()
            .zip(sizes)
            .map(|(q, &size)| Buffer::new(q.context(), size))
            .collect::<StencilResult<Vec<_>>>()?;
        Ok(Self {
            queues: queues.to_vec(),
            parts,
            offsets,
        })
    }

    /// Vector holding `data`, split evenly.
    pub fn from_slice(queues: &[Queue], data: &[T]) -> StencilResult<Self> {
        let v = Self::new(queues, data.len())?;
        v.write(data)?;
        Ok(v)
    }

    /// Vector holding `data` with explicit partition sizes.
    pub fn from_slice_partitioned(queues: &[Queue], data: &[T], sizes: &[usize]) -> StencilResult<Self> {
        let v = Self::with_partition(queues, sizes)?;
        v.write(data)?;
        Ok(v)
    }

    /// Zero-filled vector with the same queues and partition as `self`.
    pub fn like(&self) -> StencilResult<Self> {
        Self::with_partition(&self.queues, &self.partition())
    }

    /// Overwrites the whole vector.
    pub fn write(&self, data: &[T]) -> StencilResult<()> {
        if data.len() != self.len() {
            return Err(StencilError::shape_mismatch(self.len(), data.len()));
        }
        let events = self
            .parts()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(d, buf)| {
                let range = self.offsets[d]..self.offsets[d + 1];
                self.queues[d].enqueue_write_buffer(buf, 0, data[range].to_vec(), &[])
            })
            .collect::<StencilResult<Vec<Event>>>()?;
        Event::wait_all(&events)
    }

    /// Sets every element to `value`.
    pub fn fill(&self, value: T) -> StencilResult<()> {
        self.write(&vec![value; self.len()])
    }

    /// Copies the vector to the host, waiting for all pending work.
    ///
    /// # Errors
    ///
    /// Reports any command failure on the vector's queues, including earlier
    /// kernel launches.
    pub fn to_vec(&self) -> StencilResult<Vec<T>> {
        let host = HostBuffer::new(self.len());
        let events = self
            .parts()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(d, buf)| self.queues[d].enqueue_read_buffer(buf, 0, buf.len(), &host, self.offsets[d], &[]))
            .collect::<StencilResult<Vec<Event>>>()?;
        Event::wait_all(&events)?;
        for queue in &self.queues {
            queue.finish()?;
        }
        Ok(host.to_vec())
    }

    /// Copies `src` into `self` device by device.
    pub fn copy_from(&self, src: &DeviceVector<T>) -> StencilResult<()> {
        self.check_layout(src)?;
        for (d, buf) in self.parts() {
            if !buf.is_empty() {
                self.queues[d].enqueue_copy_buffer(src.buffer(d), buf, &[])?;
            }
        }
        Ok(())
    }
}

impl<T> DeviceVector<T> {
    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Returns `true` if the vector holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues in device order.
    #[inline]
    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    /// Number of devices.
    #[inline]
    pub fn devices(&self) -> usize {
        self.queues.len()
    }

    /// Elements owned by device `d`.
    #[inline]
    pub fn part_size(&self, d: usize) -> usize {
        self.offsets[d + 1] - self.offsets[d]
    }

    /// Global index of the first element of device `d`.
    #[inline]
    pub fn part_start(&self, d: usize) -> usize {
        self.offsets[d]
    }

    /// Partition sizes in device order.
    pub fn partition(&self) -> Vec<usize> {
        (0..self.devices()).map(|d| self.part_size(d)).collect()
    }

    /// Buffer of device `d`.
    #[inline]
    pub fn buffer(&self, d: usize) -> &Buffer<T> {
        &self.parts[d]
    }

    fn parts(&self) -> impl Iterator<Item = (usize, &Buffer<T>)> {
        self.parts.iter().enumerate()
    }

    /// Checks that `other` lives on the same queues with the same partition.
    pub(crate) fn check_layout<U>(&self, other: &DeviceVector<U>) -> StencilResult<()> {
        if other.len() != self.len() {
            return Err(StencilError::shape_mismatch(self.len(), other.len()));
        }
        if other.devices() != self.devices() {
            return Err(StencilError::device(format!(
                "Invalid mem object: vector spans {} devices, expected {}",
                other.devices(),
                self.devices()
            )));
        }
        for d in 0..self.devices() {
            if other.part_size(d) != self.part_size(d) {
                return Err(StencilError::shape_mismatch(self.part_size(d), other.part_size(d)));
            }
        }
        Ok(())
    }

    /// Returns `true` if any partition of `other` shares memory with `self`.
    pub(crate) fn shares_buffers<U>(&self, other: &DeviceVector<U>) -> bool {
        self.parts
            .iter()
            .any(|a| other.parts.iter().any(|b| a.id() == b.id()))
    }
}

impl<T> fmt::Debug for DeviceVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceVector")
            .field("len", &self.len())
            .field("partition", &self.partition())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformOptions;
    use crate::device::Platform;

    #[test]
    fn test_even_partition() {
        assert_eq!(even_partition(5, 2), vec![3, 2]);
        assert_eq!(even_partition(9, 3), vec![3, 3, 3]);
        assert_eq!(even_partition(2, 3), vec![1, 1, 0]);
        assert_eq!(even_partition(0, 2), vec![0, 0]);
        assert!(even_partition(4, 0).is_empty());
    }

    #[test]
    #[ignore = "Requires GPU"]
    fn test_explicit_partition() {
        let platform = Platform::init(PlatformOptions::uniform(3)).unwrap();
        let data: Vec<i64> = (0..10).collect();
        let v = DeviceVector::from_slice_partitioned(platform.queues(), &data, &[2, 0, 8]).unwrap();
        assert_eq!(v.part_start(2), 2);
        assert_eq!(v.part_size(1), 0);
        assert_eq!(v.to_vec().unwrap(), data);
        assert!(DeviceVector::<i64>::with_partition(platform.queues(), &[1, 2]).is_err());
    }

    #[test]
    #[ignore = "Requires GPU"]
    fn test_copy_and_layout_checks() {
        let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
        let a = DeviceVector::from_slice(platform.queues(), &[1.0f64, 2.0, 3.0]).unwrap();
        let b = a.like().unwrap();
        b.copy_from(&a).unwrap();
        assert_eq!(b.to_vec().unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(!a.shares_buffers(&b));
        assert!(a.shares_buffers(&a));

        let c = DeviceVector::<f64>::new(platform.queues(), 4).unwrap();
        assert!(c.copy_from(&a).is_err());
        assert!(a.write(&[1.0]).is_err());
    }
}
