//! Joystick watcher
//!
//! One physical controller usually shows up as several input interfaces (a
//! legacy `js*` joydev node and an `event*` evdev node, sometimes more)
//! sharing one parent device. Only one of them is held open per parent,
//! preferring the interface whose sys name starts with the configured prefix.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use super::{NodeOpener, SysOpener, WatchSender, WatchedHandle};
use crate::device::{describe_ancestry, DeviceInfo};
use crate::hotplug::HotplugEvent;

/// Sys-name prefix of the preferred interface (evdev)
pub const DEFAULT_PREFERRED_PREFIX: &str = "event";

/// Holds at most one open interface per physical joystick.
///
/// # Thread Safety
///
/// Owned by the daemon loop. Activity flows out through the [`WatchSender`]
/// given at construction; the handle map itself is only touched by the loop.
pub struct JoystickWatcher<O: NodeOpener = SysOpener> {
    opener: O,
    preferred_prefix: String,
    /// Open handle per parent key
    handles: HashMap<String, WatchedHandle>,
    events: WatchSender,
}

impl JoystickWatcher<SysOpener> {
    /// Create a watcher that opens real device nodes
    pub fn system(events: WatchSender) -> Self {
        Self::new(SysOpener, events)
    }
}

impl<O: NodeOpener> JoystickWatcher<O> {
    pub fn new(opener: O, events: WatchSender) -> Self {
        Self {
            opener,
            preferred_prefix: DEFAULT_PREFERRED_PREFIX.to_string(),
            handles: HashMap::new(),
            events,
        }
    }

    /// Change which interface is preferred among siblings
    pub fn with_preferred_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.preferred_prefix = prefix.into();
        self
    }

    /// Number of physical devices currently held open
    pub fn watched_count(&self) -> usize {
        self.handles.len()
    }

    /// Sys name of the interface held for a parent, if any
    pub fn watched_name(&self, parent_key: &str) -> Option<&str> {
        self.handles.get(parent_key).map(WatchedHandle::name)
    }

    /// Add every already-present device.
    ///
    /// Devices that are not joysticks are skipped, so the caller may pass a
    /// plain enumeration of the input subsystem.
    pub fn start(&mut self, devices: impl IntoIterator<Item = DeviceInfo>) {
        for device in devices {
            self.add_device(&device);
        }
        tracing::info!("Watching {} joystick(s)", self.handles.len());
    }

    /// Dispatch one hot-plug event from the input subsystem
    pub fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Add(device) => {
                self.add_device(&device);
            }
            HotplugEvent::Remove(device) => {
                self.remove_device(&device);
            }
        }
    }

    fn is_preferred(&self, device: &DeviceInfo) -> bool {
        device.sys_name.starts_with(&self.preferred_prefix)
    }

    /// Start watching a device, or one of its siblings in its place.
    ///
    /// # Returns
    ///
    /// `true` if the device is now the held interface for its parent.
    /// `false` if it is not a joystick, duplicates or loses against the
    /// held sibling, or could not be opened.
    pub fn add_device(&mut self, device: &DeviceInfo) -> bool {
        if !device.is_joystick() {
            return false;
        }
        let Some(node) = device.node() else {
            return false;
        };

        let preferred = self.is_preferred(device);

        if let Some(held) = self.handles.get(&device.parent_key) {
            if held.name() == device.sys_name {
                tracing::trace!("{} is already watched", device.sys_name);
                return false;
            }
            if !preferred || held.is_preferred() {
                tracing::debug!(
                    device = %device.sys_name,
                    "Sibling {} already covers this device",
                    held.name()
                );
                return false;
            }
        }

        // The new node must be open before the old handle is given up
        let Some(handle) = self.open_handle(device, node, preferred) else {
            return false;
        };

        match self.handles.insert(device.parent_key.clone(), handle) {
            Some(old) => tracing::info!(
                device = %device.sys_name,
                "Switched from {} to {} ({})",
                old.name(),
                device.sys_name,
                node.display()
            ),
            None => tracing::info!(
                device = %device.sys_name,
                "Watching joystick {} ({})",
                node.display(),
                device.vendor_product().unwrap_or_else(|| "unknown id".to_string())
            ),
        }

        true
    }

    /// Stop watching a device if it is the held interface of its parent.
    ///
    /// The handle is looked up by parent key first and by sys name second,
    /// since a remove can arrive with a parent that no longer resolves to
    /// the one seen at add time. A remove for a superseded or never-watched
    /// sibling does nothing.
    pub fn remove_device(&mut self, device: &DeviceInfo) -> bool {
        let held_key = match self.handles.get(&device.parent_key) {
            Some(handle) if handle.name() == device.sys_name => Some(device.parent_key.clone()),
            _ => self
                .handles
                .iter()
                .find(|(_, handle)| handle.name() == device.sys_name)
                .map(|(key, _)| key.clone()),
        };

        let Some(key) = held_key else {
            return false;
        };

        self.handles.remove(&key);
        tracing::info!(device = %device.sys_name, "Joystick {} removed", device.sys_name);
        true
    }

    /// Drop a handle whose reader found the device gone
    pub fn forget(&mut self, parent_key: &str, name: &str) {
        let matches = self
            .handles
            .get(parent_key)
            .map(|handle| handle.name() == name)
            .unwrap_or(false);

        if matches {
            self.handles.remove(parent_key);
            tracing::info!(device = %name, "Joystick {} disappeared", name);
        }
    }

    fn open_handle(
        &self,
        device: &DeviceInfo,
        node: &Path,
        preferred: bool,
    ) -> Option<WatchedHandle> {
        let file = match self.opener.open(node) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                tracing::warn!(
                    device = %device.sys_name,
                    "No permission to read {}, skipping: {}",
                    node.display(),
                    e
                );
                return None;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    device = %device.sys_name,
                    "{} vanished before it could be opened:\n{}",
                    node.display(),
                    describe_ancestry(&device.syspath)
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    device = %device.sys_name,
                    "Failed to open {}: {}",
                    node.display(),
                    e
                );
                return None;
            }
        };

        match WatchedHandle::spawn(
            &device.sys_name,
            &device.parent_key,
            preferred,
            file,
            self.events.clone(),
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(
                    device = %device.sys_name,
                    "Cannot poll {}: {}",
                    node.display(),
                    e
                );
                None
            }
        }
    }
}
