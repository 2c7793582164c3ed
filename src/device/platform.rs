//! Platform initialization and device management.
//!
//! This module provides [`Platform`] for opening `wgpu` devices, the
//! contexts grouping logical devices on them and one queue per device.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{ConfigError, DeviceSpec, PlatformOptions};
use crate::device::{ContextId, DeviceId, Queue};
use crate::error::{StencilError, StencilResult};

struct DeviceInner {
    id: DeviceId,
    spec: DeviceSpec,
}

/// A logical compute device. Cloning yields another handle to the same
/// device.
///
/// A device only describes capacities; the GPU work it is given runs on the
/// `wgpu` device of its [`Context`].
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Creates a device from a validated description.
    pub fn new(spec: DeviceSpec) -> StencilResult<Self> {
        spec.validate()?;
        Ok(Self {
            inner: Arc::new(DeviceInner {
                id: DeviceId::fresh(),
                spec,
            }),
        })
    }

    /// Process-unique identity.
    #[inline]
    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    /// Device name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    /// Full device description, after clamping to the adapter limits.
    #[inline]
    pub fn spec(&self) -> &DeviceSpec {
        &self.inner.spec
    }

    /// Local memory capacity in bytes.
    #[inline]
    pub fn local_mem_size(&self) -> usize {
        self.inner.spec.local_mem_size
    }

    /// Largest accepted work-group size.
    #[inline]
    pub fn max_work_group_size(&self) -> usize {
        self.inner.spec.max_work_group_size
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("local_mem_size", &self.local_mem_size())
            .finish()
    }
}

/// An opened `wgpu` device with its queue.
pub(crate) struct Gpu {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    info: wgpu::AdapterInfo,
    lost: Arc<Mutex<Option<String>>>,
    scope: Mutex<()>,
}

impl Gpu {
    fn open(instance: &wgpu::Instance, options: &PlatformOptions, label: &str) -> StencilResult<Self> {
        let adapter = pollster::block_on(request_adapter(instance, options))?;
        let info = adapter.get_info();
        log::info!("Selected GPU adapter: {} ({:?})", info.name, info.backend);

        let required_features = adapter.features() & (wgpu::Features::SHADER_F64 | wgpu::Features::SHADER_INT64);
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(label),
                required_features,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| StencilError::device(format!("Device request failed: {}", e)))?;

        let lost = Arc::new(Mutex::new(None));
        let lost_slot = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, msg| {
            log::error!("GPU device lost ({:?}): {}", reason, msg);
            *lost_slot.lock() = Some(format!("Device lost ({:?}): {}", reason, msg));
        });
        device.on_uncaptured_error(Box::new(|err| {
            log::error!("Uncaptured GPU error: {}", err);
        }));

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            info,
            lost,
            scope: Mutex::new(()),
        })
    }

    /// Fails once the device has been lost.
    pub(crate) fn check_lost(&self) -> StencilResult<()> {
        match self.lost.lock().as_ref() {
            Some(msg) => Err(StencilError::device(msg.clone())),
            None => Ok(()),
        }
    }

    /// Runs `op` inside validation and out-of-memory error scopes and turns
    /// a captured error into [`StencilError::Device`].
    ///
    /// Scopes are per device, so calls are serialized.
    pub(crate) fn checked<R>(&self, what: &str, op: impl FnOnce(&wgpu::Device, &wgpu::Queue) -> R) -> StencilResult<R> {
        self.check_lost()?;
        let _serial = self.scope.lock();
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = op(&self.device, &self.queue);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(err) => Err(StencilError::device(format!("{} failed: {}", what, err))),
            None => Ok(out),
        }
    }

    /// Blocks until all submitted work finished.
    pub(crate) fn wait_idle(&self) -> StencilResult<()> {
        self.device.poll(wgpu::Maintain::Wait);
        self.check_lost()
    }

    pub(crate) fn features(&self) -> wgpu::Features {
        self.device.features()
    }
}

async fn request_adapter(instance: &wgpu::Instance, options: &PlatformOptions) -> StencilResult<wgpu::Adapter> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: options.power_preference.into(),
            compatible_surface: None,
            force_fallback_adapter: options.force_fallback_adapter,
        })
        .await;

    let adapter = match adapter {
        Some(a) => a,
        None => instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::None,
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .ok_or_else(|| {
                StencilError::adapter_not_found("No GPU adapters available. Ensure GPU drivers are installed.")
            })?,
    };

    let Some(wanted) = options.adapter_name.as_deref().map(str::to_lowercase) else {
        return Ok(adapter);
    };
    if adapter.get_info().name.to_lowercase().contains(&wanted) {
        return Ok(adapter);
    }
    instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .find(|a| a.get_info().name.to_lowercase().contains(&wanted))
        .ok_or_else(|| StencilError::adapter_not_found(format!("No adapter matching '{}' found", wanted)))
}

struct ContextInner {
    id: ContextId,
    devices: Vec<Device>,
    gpu: Gpu,
}

/// Handle grouping devices that share programs and buffers.
///
/// Every context owns one `wgpu` device; objects created in one context are
/// invalid in every other.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    fn new(gpu: Gpu, devices: Vec<Device>) -> StencilResult<Self> {
        if devices.is_empty() {
            return Err(ConfigError::EmptyQueueList.into());
        }
        Ok(Self {
            inner: Arc::new(ContextInner {
                id: ContextId::fresh(),
                devices,
                gpu,
            }),
        })
    }

    /// Process-unique identity.
    #[inline]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Devices in this context; never empty.
    #[inline]
    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    /// Returns `true` if `device` belongs to this context.
    pub fn contains(&self, device: &Device) -> bool {
        self.inner.devices.iter().any(|d| d == device)
    }

    /// Adapter the context's GPU device was opened on.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.inner.gpu.info
    }

    /// Limits of the context's GPU device.
    pub fn limits(&self) -> wgpu::Limits {
        self.inner.gpu.device.limits()
    }

    pub(crate) fn gpu(&self) -> &Gpu {
        &self.inner.gpu
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.devices().iter().map(Device::name).collect();
        f.debug_struct("Context")
            .field("id", &self.id())
            .field("adapter", &self.adapter_info().name)
            .field("devices", &names)
            .finish()
    }
}

/// Devices, contexts and one queue per device.
///
/// # Example
///
/// ```rust,no_run
/// use haloconv::config::PlatformOptions;
/// use haloconv::device::Platform;
///
/// let platform = Platform::init(PlatformOptions::shared(3)).unwrap();
/// assert_eq!(platform.queues().len(), 3);
/// assert_eq!(platform.contexts().len(), 1);
/// ```
pub struct Platform {
    contexts: Vec<Context>,
    queues: Vec<Queue>,
}

impl Platform {
    /// Initializes the platform.
    ///
    /// Every context gets its own `wgpu` device; each logical device is
    /// clamped to the limits of the device it runs on.
    ///
    /// # Errors
    ///
    /// - [`StencilError::Config`] - Empty device list or invalid device
    ///   description.
    /// - [`StencilError::AdapterNotFound`] - No adapter matches the options.
    /// - [`StencilError::Device`] - The GPU device could not be opened.
    pub fn init(options: PlatformOptions) -> StencilResult<Self> {
        options.validate()?;

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let groups: Vec<Vec<DeviceSpec>> = if options.shared_context {
            vec![options.devices.clone()]
        } else {
            options.devices.iter().map(|spec| vec![spec.clone()]).collect()
        };

        let mut contexts = Vec::with_capacity(groups.len());
        let mut queues = Vec::with_capacity(options.devices.len());

        for (index, group) in groups.into_iter().enumerate() {
            let gpu = Gpu::open(&instance, &options, &format!("haloconv context {}", index))?;
            let limits = gpu.device.limits();
            let local_mem_limit = limits.max_compute_workgroup_storage_size as usize;
            let work_group_limit = limits
                .max_compute_invocations_per_workgroup
                .min(limits.max_compute_workgroup_size_x) as usize;

            let devices = group
                .iter()
                .map(|spec| Device::new(spec.clamped(local_mem_limit, work_group_limit)))
                .collect::<StencilResult<Vec<_>>>()?;

            let context = Context::new(gpu, devices)?;
            for device in context.devices() {
                queues.push(Queue::new(&context, device)?);
            }
            contexts.push(context);
        }

        log::info!(
            "Initialized platform: {} device(s) in {} context(s)",
            queues.len(),
            contexts.len()
        );
        for queue in &queues {
            let device = queue.device();
            log::debug!(
                "{} '{}': {} bytes local memory, max work-group {}",
                device.id(),
                device.name(),
                device.local_mem_size(),
                device.max_work_group_size()
            );
        }

        Ok(Self { contexts, queues })
    }

    /// Ordered queue list, one queue per device.
    #[inline]
    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    /// Contexts in creation order.
    #[inline]
    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    /// Devices in queue order.
    pub fn devices(&self) -> Vec<Device> {
        self.queues.iter().map(|q| q.device().clone()).collect()
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("contexts", &self.contexts)
            .field("queues", &self.queues.len())
            .finish()
    }
}
