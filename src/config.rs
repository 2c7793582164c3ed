//! Device and platform configuration.
//!
//! This module provides [`DeviceSpec`] for describing the logical devices a
//! vector is partitioned over, [`PlatformOptions`] for grouping them into
//! contexts and choosing the GPU adapter, and [`ConfigError`] for everything
//! rejected at construction time.
//!
//! # Example
//!
//! ```rust
//! use haloconv::config::{DeviceSpec, PlatformOptions};
//!
//! // Two identical devices, one context each.
//! let options = PlatformOptions::uniform(2);
//! assert!(options.validate().is_ok());
//!
//! // A device with very little local memory.
//! let small = DeviceSpec::with_local_mem("tiny", 64);
//! assert!(small.validate().is_ok());
//! ```
//!
//! # Local memory
//!
//! | Parameter | Default | Effect |
//! |-----------|---------|--------|
//! | `local_mem_size` | 32 KiB | Capacity shared by one work-group |
//! | `max_work_group_size` | 256 | Upper bound on work-group size |
//! | `reserved_local_mem` | 0 | Footprint every kernel already occupies |
//!
//! The adapter's own limits (`max_compute_workgroup_storage_size`,
//! `max_compute_invocations_per_workgroup`) cap both sizes when the platform
//! is initialized, so a spec can only shrink what the GPU offers.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hard cap on work-group sizes tried by the planner.
pub const MAX_WORK_GROUP_SIZE: usize = 1024;

/// Default local memory capacity of a device (32 KiB).
pub const DEFAULT_LOCAL_MEM_SIZE: usize = 32 * 1024;

/// Default maximum work-group size of a device.
pub const DEFAULT_MAX_WORK_GROUP_SIZE: usize = 256;

/// Power preference for GPU adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PowerPreference {
    /// Prefer low power consumption (integrated GPU).
    LowPower,
    /// Prefer high performance (discrete GPU).
    #[default]
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Description of one compute device.
///
/// # Example
///
/// ```rust
/// use haloconv::config::DeviceSpec;
///
/// let spec = DeviceSpec {
///     local_mem_size: 4096,
///     ..DeviceSpec::host()
/// };
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceSpec {
    /// Device name, used in logs and object labels.
    pub name: String,

    /// Local (work-group shared) memory capacity in bytes.
    pub local_mem_size: usize,

    /// Largest work-group the device accepts.
    pub max_work_group_size: usize,

    /// Local memory every kernel occupies before any dynamic allocation.
    pub reserved_local_mem: usize,
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self::host()
    }
}

impl DeviceSpec {
    /// Default device description.
    pub fn host() -> Self {
        Self {
            name: "host".to_string(),
            local_mem_size: DEFAULT_LOCAL_MEM_SIZE,
            max_work_group_size: DEFAULT_MAX_WORK_GROUP_SIZE,
            reserved_local_mem: 0,
        }
    }

    /// Device with the given local memory capacity in bytes.
    pub fn with_local_mem<S: Into<String>>(name: S, local_mem_size: usize) -> Self {
        Self {
            name: name.into(),
            local_mem_size,
            ..Self::host()
        }
    }

    /// Bytes of local memory left for dynamic allocations.
    #[inline]
    pub fn available_local_mem(&self) -> usize {
        self.local_mem_size.saturating_sub(self.reserved_local_mem)
    }

    /// Validates the device description.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDevice`] if:
    /// - `local_mem_size` or `max_work_group_size` is zero
    /// - `reserved_local_mem` exceeds `local_mem_size`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_mem_size == 0 {
            return Err(ConfigError::InvalidDevice("local_mem_size must be > 0"));
        }
        if self.max_work_group_size == 0 {
            return Err(ConfigError::InvalidDevice("max_work_group_size must be > 0"));
        }
        if self.reserved_local_mem > self.local_mem_size {
            return Err(ConfigError::InvalidDevice(
                "reserved_local_mem must not exceed local_mem_size",
            ));
        }
        Ok(())
    }

    /// Caps the description at what a GPU offers.
    pub(crate) fn clamped(&self, local_mem_limit: usize, work_group_limit: usize) -> Self {
        let local_mem_size = self.local_mem_size.min(local_mem_limit);
        Self {
            name: self.name.clone(),
            local_mem_size,
            max_work_group_size: self.max_work_group_size.min(work_group_limit).max(1),
            reserved_local_mem: self.reserved_local_mem.min(local_mem_size),
        }
    }
}

/// Options for initializing the platform.
///
/// Every context gets its own `wgpu` device, all requested from adapters
/// matching the same selection options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlatformOptions {
    /// Devices in queue order. Adjacent devices own adjacent partitions.
    pub devices: Vec<DeviceSpec>,

    /// Put all devices into one context instead of one context per device.
    pub shared_context: bool,

    /// Power preference for adapter selection.
    pub power_preference: PowerPreference,

    /// Pick the adapter whose name contains this string (case-insensitive).
    pub adapter_name: Option<String>,

    /// Ask for a software adapter.
    pub force_fallback_adapter: bool,
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self::uniform(1)
    }
}

impl PlatformOptions {
    /// `count` default devices, one context each.
    pub fn uniform(count: usize) -> Self {
        Self::with_devices(
            (0..count)
                .map(|i| DeviceSpec {
                    name: format!("host{}", i),
                    ..DeviceSpec::host()
                })
                .collect(),
        )
    }

    /// The given devices, one context each, default adapter selection.
    pub fn with_devices(devices: Vec<DeviceSpec>) -> Self {
        Self {
            devices,
            shared_context: false,
            power_preference: PowerPreference::default(),
            adapter_name: None,
            force_fallback_adapter: false,
        }
    }

    /// Same as [`uniform`](Self::uniform) but with a single shared context.
    pub fn shared(count: usize) -> Self {
        Self {
            shared_context: true,
            ..Self::uniform(count)
        }
    }

    /// Validates every device and rejects an empty device list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::EmptyQueueList);
        }
        self.devices.iter().try_for_each(DeviceSpec::validate)
    }
}

/// Errors detected while validating configuration and filter descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The filter has no weights.
    #[error("Filter weights must not be empty")]
    EmptyWeights,

    /// The center index is not inside the filter.
    #[error("Center {center} is out of range for filter width {width}")]
    CenterOutOfRange {
        /// Requested center index.
        center: usize,
        /// Filter width (number of taps per row).
        width: usize,
    },

    /// Matrix dimensions do not match the data length.
    #[error("Matrix {rows}x{cols} does not match {len} values")]
    MatrixShape {
        /// Number of rows.
        rows: usize,
        /// Number of columns.
        cols: usize,
        /// Number of values supplied.
        len: usize,
    },

    /// No queues (devices) were supplied.
    #[error("Queue list must not be empty")]
    EmptyQueueList,

    /// A device description is invalid.
    #[error("Invalid device: {0}")]
    InvalidDevice(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_device() {
        let spec = DeviceSpec::default();
        assert!(spec.validate().is_ok());
        assert_eq!(spec.local_mem_size, DEFAULT_LOCAL_MEM_SIZE);
        assert_eq!(spec.available_local_mem(), DEFAULT_LOCAL_MEM_SIZE);
    }

    #[test]
    fn test_invalid_devices() {
        let zero = DeviceSpec::with_local_mem("zero", 0);
        assert!(matches!(zero.validate(), Err(ConfigError::InvalidDevice(_))));

        let over = DeviceSpec {
            reserved_local_mem: 2 * DEFAULT_LOCAL_MEM_SIZE,
            ..DeviceSpec::host()
        };
        assert!(over.validate().is_err());
        assert_eq!(over.available_local_mem(), 0);

        let no_wg = DeviceSpec {
            max_work_group_size: 0,
            ..DeviceSpec::host()
        };
        assert!(no_wg.validate().is_err());
    }

    #[test]
    fn test_platform_options() {
        let opts = PlatformOptions::uniform(3);
        assert_eq!(opts.devices.len(), 3);
        assert!(!opts.shared_context);
        assert_eq!(opts.devices[2].name, "host2");
        assert!(PlatformOptions::shared(2).shared_context);

        let empty = PlatformOptions::with_devices(vec![]);
        assert_eq!(empty.validate(), Err(ConfigError::EmptyQueueList));
    }

    #[test]
    fn test_clamped_to_adapter_limits() {
        let spec = DeviceSpec {
            reserved_local_mem: 1024,
            ..DeviceSpec::host()
        };
        let capped = spec.clamped(16 * 1024, 128);
        assert_eq!(capped.local_mem_size, 16 * 1024);
        assert_eq!(capped.max_work_group_size, 128);
        assert_eq!(capped.reserved_local_mem, 1024);

        let tiny = DeviceSpec::with_local_mem("tiny", 64).clamped(16 * 1024, 256);
        assert_eq!(tiny.local_mem_size, 64);
        assert!(tiny.validate().is_ok());
        assert_eq!(spec.clamped(512, 256).reserved_local_mem, 512);
    }
}
