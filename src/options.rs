//! Scoped build configuration.
//!
//! Every device has two independent LIFO stacks: extra compiler flags and
//! header text prepended to generated programs. The top of each stack is read
//! when a program is compiled, so changes never affect programs that are
//! already cached.
//!
//! # Example
//!
//! ```rust,no_run
//! use haloconv::config::PlatformOptions;
//! use haloconv::device::Platform;
//! use haloconv::options::{BuildOptions, OptionKind};
//!
//! let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
//! let options = BuildOptions::new();
//! {
//!     let _guard = options.scoped(platform.queues(), OptionKind::CompileFlags, "-DFAST=1");
//!     let device = platform.queues()[1].device();
//!     assert_eq!(options.get(device, OptionKind::CompileFlags), "-DFAST=1");
//! }
//! assert_eq!(options.get(platform.queues()[0].device(), OptionKind::CompileFlags), "");
//! ```

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::device::{Device, DeviceId, Queue};

/// Which stack an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    /// Extra compiler flags.
    CompileFlags,
    /// Text prepended to every generated program.
    ProgramHeader,
}

/// Per-device stacks of compiler flags and program headers.
#[derive(Default)]
pub struct BuildOptions {
    stacks: Mutex<HashMap<(DeviceId, OptionKind), Vec<String>>>,
}

impl BuildOptions {
    /// Creates empty stacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `text` onto the device's stack.
    pub fn push<S: Into<String>>(&self, device: &Device, kind: OptionKind, text: S) {
        self.stacks
            .lock()
            .entry((device.id(), kind))
            .or_default()
            .push(text.into());
    }

    /// Removes the most recent entry; no-op if the stack is empty.
    pub fn pop(&self, device: &Device, kind: OptionKind) {
        let mut stacks = self.stacks.lock();
        if let Some(stack) = stacks.get_mut(&(device.id(), kind)) {
            stack.pop();
            if stack.is_empty() {
                stacks.remove(&(device.id(), kind));
            }
        }
    }

    /// Top of the device's stack, or an empty string.
    pub fn get(&self, device: &Device, kind: OptionKind) -> String {
        self.stacks
            .lock()
            .get(&(device.id(), kind))
            .and_then(|stack| stack.last().cloned())
            .unwrap_or_default()
    }

    /// Number of entries on the device's stack.
    pub fn depth(&self, device: &Device, kind: OptionKind) -> usize {
        self.stacks
            .lock()
            .get(&(device.id(), kind))
            .map_or(0, Vec::len)
    }

    /// Pushes `text` for the device of every queue.
    pub fn push_all(&self, queues: &[Queue], kind: OptionKind, text: &str) {
        for queue in queues {
            self.push(queue.device(), kind, text);
        }
    }

    /// Pops once for the device of every queue.
    pub fn pop_all(&self, queues: &[Queue], kind: OptionKind) {
        for queue in queues {
            self.pop(queue.device(), kind);
        }
    }

    /// Pushes `text` for every queue's device and pops it again when the
    /// returned guard is dropped.
    #[must_use = "the entries are popped when the guard is dropped"]
    pub fn scoped(&self, queues: &[Queue], kind: OptionKind, text: &str) -> ScopedOptions<'_> {
        self.push_all(queues, kind, text);
        ScopedOptions {
            options: self,
            devices: queues.iter().map(|q| q.device().clone()).collect(),
            kind,
        }
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("stacks", &self.stacks.lock().len())
            .finish()
    }
}

/// Guard returned by [`BuildOptions::scoped`].
pub struct ScopedOptions<'a> {
    options: &'a BuildOptions,
    devices: Vec<Device>,
    kind: OptionKind,
}

impl Drop for ScopedOptions<'_> {
    fn drop(&mut self) {
        for device in &self.devices {
            self.options.pop(device, self.kind);
        }
    }
}
