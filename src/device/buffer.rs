//! Device buffers, host staging buffers and transfer commands.
//!
//! This module provides [`Buffer`], `wgpu` storage memory owned by one
//! context, and [`HostBuffer`], host memory that reads are mapped into.
//! Transfers are commands on a [`Queue`] and complete asynchronously.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::device::{BufferId, Context, ContextId, Event, Queue};
use crate::error::{StencilError, StencilResult};
use crate::scalar::Scalar;

pub(crate) struct BufferInner {
    pub(crate) id: BufferId,
    pub(crate) context: ContextId,
    pub(crate) raw: wgpu::Buffer,
}

/// Device memory holding `len` elements of `T`.
///
/// Buffers belong to the context they were created in and can only be used
/// by queues of that context. Cloning yields another handle to the same
/// memory.
///
/// # Example
///
/// ```rust,no_run
/// use haloconv::config::PlatformOptions;
/// use haloconv::device::{Buffer, Platform};
///
/// let platform = Platform::init(PlatformOptions::uniform(1)).unwrap();
/// let queue = &platform.queues()[0];
///
/// let buf = Buffer::<f64>::new(queue.context(), 4).unwrap();
/// queue.write_buffer(&buf, &[1.0, 2.0, 3.0, 4.0]).unwrap();
/// assert_eq!(queue.read_buffer(&buf).unwrap()[3], 4.0);
/// ```
pub struct Buffer<T> {
    inner: Arc<BufferInner>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            len: self.len,
            _marker: PhantomData,
        }
    }
}

const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

fn byte_len<T>(len: usize) -> u64 {
    (len * std::mem::size_of::<T>()) as u64
}

impl<T: Scalar> Buffer<T> {
    /// Allocates a zero-filled buffer.
    ///
    /// Empty buffers still occupy one element, since `wgpu` bindings cannot
    /// be empty.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Device`] if the allocation is rejected.
    pub fn new(context: &Context, len: usize) -> StencilResult<Self> {
        let raw = context.gpu().checked("Buffer allocation", |device, _| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("haloconv buffer"),
                size: byte_len::<T>(len.max(1)),
                usage: USAGE,
                mapped_at_creation: false,
            })
        })?;
        Ok(Self::wrap(context, raw, len))
    }

    /// Allocates a buffer initialized from `data`.
    pub fn from_slice(context: &Context, data: &[T]) -> StencilResult<Self> {
        if data.is_empty() {
            return Self::new(context, 0);
        }
        let raw = context.gpu().checked("Buffer allocation", |device, _| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("haloconv buffer"),
                contents: bytemuck::cast_slice(data),
                usage: USAGE,
            })
        })?;
        Ok(Self::wrap(context, raw, data.len()))
    }

    fn wrap(context: &Context, raw: wgpu::Buffer, len: usize) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id: BufferId::fresh(),
                context: context.id(),
                raw,
            }),
            len,
            _marker: PhantomData,
        }
    }
}

impl<T> Buffer<T> {
    /// Process-unique identity.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    /// Owning context.
    #[inline]
    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn raw(&self) -> &wgpu::Buffer {
        &self.inner.raw
    }

    pub(crate) fn inner(&self) -> &Arc<BufferInner> {
        &self.inner
    }
}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id())
            .field("context", &self.context_id())
            .field("len", &self.len)
            .finish()
    }
}

/// Host memory reads are copied into once their mapping completes.
pub struct HostBuffer<T> {
    data: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for HostBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Scalar> HostBuffer<T> {
    /// Allocates a zero-filled staging buffer.
    pub fn new(len: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![T::zero(); len])),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns `true` if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `range` out of the staging buffer.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Device`] if the range is out of bounds.
    pub fn snapshot(&self, range: Range<usize>) -> StencilResult<Vec<T>> {
        let data = self.data.lock();
        data.get(range.clone())
            .map(<[T]>::to_vec)
            .ok_or_else(|| out_of_range("host buffer", range, data.len()))
    }

    /// Copies the whole staging buffer.
    pub fn to_vec(&self) -> Vec<T> {
        self.data.lock().clone()
    }
}

fn out_of_range(what: &str, range: Range<usize>, len: usize) -> StencilError {
    StencilError::device(format!(
        "Invalid value: {}..{} is out of range for {} of {} elements",
        range.start, range.end, what, len
    ))
}

fn check_range(what: &str, offset: usize, count: usize, len: usize) -> StencilResult<Range<usize>> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(out_of_range(what, offset..offset.saturating_add(count), len)),
    }
}

impl Queue {
    pub(crate) fn check_owner<T>(&self, buffer: &Buffer<T>) -> StencilResult<()> {
        if buffer.context_id() != self.context().id() {
            return Err(StencilError::device(format!(
                "Invalid mem object: {} belongs to {}, queue submits into {}",
                buffer.id(),
                buffer.context_id(),
                self.context().id()
            )));
        }
        Ok(())
    }

    /// Enqueues a copy of `count` elements starting at `offset` into `dst`
    /// at `dst_offset`.
    ///
    /// The elements go through a mapped staging buffer; `dst` is filled when
    /// the returned event completes.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Device`] if the buffer belongs to another
    /// context or either range is out of bounds.
    pub fn enqueue_read_buffer<T: Scalar>(
        &self,
        buffer: &Buffer<T>,
        offset: usize,
        count: usize,
        dst: &HostBuffer<T>,
        dst_offset: usize,
        wait_list: &[Event],
    ) -> StencilResult<Event> {
        self.check_owner(buffer)?;
        check_range("buffer", offset, count, buffer.len())?;
        let dst_range = check_range("host buffer", dst_offset, count, dst.len())?;
        if count == 0 {
            self.wait_for(wait_list)?;
            return Ok(Event::completed());
        }

        let size = byte_len::<T>(count);
        let (staging, _) = self.submit_with("Buffer read", wait_list, |device, encoder| {
            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("haloconv staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            encoder.copy_buffer_to_buffer(buffer.raw(), byte_len::<T>(offset), &staging, 0, size);
            Arc::new(staging)
        })?;

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let mapped = Arc::clone(&staging);
        let dst = dst.clone();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let outcome = result
                .map(|()| {
                    let view = mapped.slice(..).get_mapped_range();
                    let values = bytemuck::pod_collect_to_vec::<u8, T>(&view);
                    drop(view);
                    mapped.unmap();
                    dst.data.lock()[dst_range].copy_from_slice(&values);
                })
                .map_err(|e| format!("Buffer map failed: {}", e));
            let _ = sender.send(outcome);
        });

        let gpu = self.context().gpu();
        Ok(Event::pending(self.context().id(), Arc::clone(&gpu.device), receiver))
    }

    /// Enqueues a write of `data` into `buffer` starting at `offset`.
    ///
    /// The data is captured at enqueue time.
    pub fn enqueue_write_buffer<T: Scalar>(
        &self,
        buffer: &Buffer<T>,
        offset: usize,
        data: Vec<T>,
        wait_list: &[Event],
    ) -> StencilResult<Event> {
        self.check_owner(buffer)?;
        check_range("buffer", offset, data.len(), buffer.len())?;
        self.wait_for(wait_list)?;
        if data.is_empty() {
            return Ok(Event::completed());
        }

        self.context().gpu().checked("Buffer write", |_, queue| {
            queue.write_buffer(buffer.raw(), byte_len::<T>(offset), bytemuck::cast_slice(&data));
            queue.submit(std::iter::empty());
        })?;
        Ok(self.completion())
    }

    /// Enqueues a full copy of `src` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Device`] if the buffers differ in length,
    /// belong to another context or are the same buffer.
    pub fn enqueue_copy_buffer<T: Scalar>(
        &self,
        src: &Buffer<T>,
        dst: &Buffer<T>,
        wait_list: &[Event],
    ) -> StencilResult<Event> {
        self.check_owner(src)?;
        self.check_owner(dst)?;
        if src.id() == dst.id() {
            return Err(StencilError::device("Mem copy overlap: source and destination are the same buffer"));
        }
        if src.len() != dst.len() {
            return Err(StencilError::shape_mismatch(dst.len(), src.len()));
        }
        if src.is_empty() {
            self.wait_for(wait_list)?;
            return Ok(Event::completed());
        }

        let (_, event) = self.submit_with("Buffer copy", wait_list, |_, encoder| {
            encoder.copy_buffer_to_buffer(src.raw(), 0, dst.raw(), 0, byte_len::<T>(src.len()));
        })?;
        Ok(event)
    }

    /// Reads the whole buffer, waiting for completion.
    pub fn read_buffer<T: Scalar>(&self, buffer: &Buffer<T>) -> StencilResult<Vec<T>> {
        let host = HostBuffer::new(buffer.len());
        self.enqueue_read_buffer(buffer, 0, buffer.len(), &host, 0, &[])?
            .wait()?;
        Ok(host.to_vec())
    }

    /// Overwrites the buffer with `data`, waiting for completion.
    pub fn write_buffer<T: Scalar>(&self, buffer: &Buffer<T>, data: &[T]) -> StencilResult<()> {
        if data.len() != buffer.len() {
            return Err(StencilError::shape_mismatch(buffer.len(), data.len()));
        }
        self.enqueue_write_buffer(buffer, 0, data.to_vec(), &[])?.wait()
    }
}
