//! In-order command queues and completion events.
//!
//! A [`Queue`] is a logical handle on the single `wgpu` queue of its
//! context; every queue of a context, siblings included, submits in one
//! order. Commands are validated inside error scopes at the enqueue call, so
//! an invalid command fails there and never poisons later calls.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::Mutex;

use crate::device::{Context, ContextId, Device, QueueId};
use crate::error::{StencilError, StencilResult};

struct EventState {
    context: Option<ContextId>,
    device: Option<Arc<wgpu::Device>>,
    receiver: Option<Receiver<Result<(), String>>>,
    result: Mutex<Option<Result<(), String>>>,
}

/// Completion handle of an enqueued command.
///
/// Cloning yields another handle to the same completion.
#[derive(Clone)]
pub struct Event {
    state: Arc<EventState>,
}

impl Event {
    fn resolved(context: Option<ContextId>, result: Result<(), String>) -> Self {
        Self {
            state: Arc::new(EventState {
                context,
                device: None,
                receiver: None,
                result: Mutex::new(Some(result)),
            }),
        }
    }

    /// An event that has already completed successfully.
    pub fn completed() -> Self {
        Self::resolved(None, Ok(()))
    }

    /// Event completed by a message on `receiver`, delivered while `device`
    /// is polled.
    pub(crate) fn pending(
        context: ContextId,
        device: Arc<wgpu::Device>,
        receiver: Receiver<Result<(), String>>,
    ) -> Self {
        Self {
            state: Arc::new(EventState {
                context: Some(context),
                device: Some(device),
                receiver: Some(receiver),
                result: Mutex::new(None),
            }),
        }
    }

    fn try_resolve(&self, maintain: wgpu::Maintain) -> Option<Result<(), String>> {
        let mut result = self.state.result.lock();
        if let Some(done) = result.as_ref() {
            return Some(done.clone());
        }
        let (Some(device), Some(receiver)) = (&self.state.device, &self.state.receiver) else {
            return None;
        };
        device.poll(maintain);
        let received = match receiver.try_recv() {
            Ok(r) => r,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err("Command was dropped before completing".to_string()),
        };
        *result = Some(received.clone());
        Some(received)
    }

    fn wait_raw(&self) -> Result<(), String> {
        loop {
            if let Some(result) = self.try_resolve(wgpu::Maintain::Wait) {
                return result;
            }
        }
    }

    /// Blocks until the command finished.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Device`] if the command failed.
    pub fn wait(&self) -> StencilResult<()> {
        self.wait_raw().map_err(StencilError::Device)
    }

    /// Returns `true` once the command finished (successfully or not).
    pub fn is_complete(&self) -> bool {
        self.try_resolve(wgpu::Maintain::Poll).is_some()
    }

    /// Context the command was submitted into, if any.
    pub fn context(&self) -> Option<ContextId> {
        self.state.context
    }

    /// Waits for every event, reporting the first failure.
    pub fn wait_all(events: &[Event]) -> StencilResult<()> {
        events.iter().try_for_each(Event::wait)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("context", &self.state.context)
            .field("complete", &self.state.result.lock().is_some())
            .finish()
    }
}

struct QueueInner {
    id: QueueId,
    context: Context,
    device: Device,
}

/// In-order command queue of one device.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Creates a queue for `device` in `context`.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Device`] if the device is not part of the
    /// context.
    pub fn new(context: &Context, device: &Device) -> StencilResult<Self> {
        if !context.contains(device) {
            return Err(StencilError::device(format!(
                "Invalid device: {} is not part of {}",
                device.id(),
                context.id()
            )));
        }
        Ok(Self {
            inner: Arc::new(QueueInner {
                id: QueueId::fresh(),
                context: context.clone(),
                device: device.clone(),
            }),
        })
    }

    /// Process-unique identity.
    #[inline]
    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    /// Context the queue submits into.
    #[inline]
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Device executing the queue's commands.
    #[inline]
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Creates another queue on the same device and context.
    pub fn sibling(&self) -> StencilResult<Queue> {
        Queue::new(self.context(), self.device())
    }

    /// Makes the next command wait for `wait_list`.
    ///
    /// Work of the same context is already ordered by the shared `wgpu`
    /// queue; only events of other contexts are waited for on the host.
    pub(crate) fn wait_for(&self, wait_list: &[Event]) -> StencilResult<()> {
        let own = Some(self.context().id());
        for event in wait_list {
            if event.context() != own {
                event
                    .wait()
                    .map_err(|e| StencilError::device(format!("Dependency failed: {}", e)))?;
            } else if let Some(Err(msg)) = event.state.result.lock().as_ref() {
                return Err(StencilError::device(format!("Dependency failed: {}", msg)));
            }
        }
        Ok(())
    }

    /// Event completing once everything submitted so far finished.
    pub(crate) fn completion(&self) -> Event {
        let gpu = self.context().gpu();
        let (sender, receiver) = crossbeam_channel::bounded(1);
        gpu.queue.on_submitted_work_done(move || {
            let _ = sender.send(Ok(()));
        });
        Event::pending(self.context().id(), Arc::clone(&gpu.device), receiver)
    }

    /// Records commands with `record` and submits them after `wait_list`.
    ///
    /// Recording and submission run inside error scopes, so validation
    /// failures surface here.
    pub(crate) fn submit_with<R, F>(&self, label: &str, wait_list: &[Event], record: F) -> StencilResult<(R, Event)>
    where
        F: FnOnce(&wgpu::Device, &mut wgpu::CommandEncoder) -> R,
    {
        self.wait_for(wait_list)?;
        let out = self.context().gpu().checked(label, |device, queue| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
            let out = record(device, &mut encoder);
            queue.submit(Some(encoder.finish()));
            out
        })?;
        Ok((out, self.completion()))
    }

    /// Enqueues a marker completing once all previously enqueued commands did.
    pub fn enqueue_marker(&self) -> StencilResult<Event> {
        self.context().gpu().checked("Marker", |_, queue| {
            queue.submit(std::iter::empty());
        })?;
        Ok(self.completion())
    }

    /// Blocks until every enqueued command finished.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Device`] if the GPU device was lost.
    pub fn finish(&self) -> StencilResult<()> {
        self.context().gpu().wait_idle()
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Queue {}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id())
            .field("device", &self.device().name())
            .field("context", &self.context().id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformOptions;
    use crate::device::{Buffer, Platform};

    #[test]
    fn test_completed_event() {
        let event = Event::completed();
        assert!(event.is_complete());
        assert!(event.wait().is_ok());
        assert!(event.context().is_none());
        assert!(Event::wait_all(&[event.clone(), event]).is_ok());
    }

    #[test]
    fn test_failed_event_reports_message() {
        let event = Event::resolved(None, Err("Out of resources".to_string()));
        assert!(event.is_complete());
        assert!(event.wait().unwrap_err().to_string().contains("Out of resources"));
    }

    #[test]
    #[ignore = "Requires GPU"]
    fn test_marker_completes() {
        let platform = Platform::init(PlatformOptions::uniform(1)).unwrap();
        let queue = &platform.queues()[0];
        let marker = queue.enqueue_marker().unwrap();
        marker.wait().unwrap();
        assert!(marker.is_complete());
        assert_eq!(marker.context(), Some(queue.context().id()));
        queue.finish().unwrap();
    }

    #[test]
    #[ignore = "Requires GPU"]
    fn test_siblings_share_submission_order() {
        let platform = Platform::init(PlatformOptions::uniform(1)).unwrap();
        let queue = &platform.queues()[0];
        let sibling = queue.sibling().unwrap();
        assert_ne!(queue.id(), sibling.id());
        assert_eq!(queue.context(), sibling.context());

        let buf = Buffer::<i32>::new(queue.context(), 4).unwrap();
        queue.enqueue_write_buffer(&buf, 0, vec![1, 2, 3, 4], &[]).unwrap();
        // Ordered behind the write without an explicit dependency.
        assert_eq!(sibling.read_buffer(&buf).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    #[ignore = "Requires GPU"]
    fn test_failed_dependency_propagates() {
        let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
        let bad = Event::resolved(Some(platform.queues()[1].context().id()), Err("boom".to_string()));
        let err = platform.queues()[0].enqueue_marker().and_then(|_| platform.queues()[0].wait_for(&[bad]));
        assert!(err.unwrap_err().to_string().contains("boom"));
    }
}
