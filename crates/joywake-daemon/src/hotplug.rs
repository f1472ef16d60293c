//! Kernel device hot-plug notifications
//!
//! [`HotplugMonitor`] owns a udev netlink socket filtered by subsystem and
//! registered with the tokio reactor. Each readiness yields exactly one udev
//! event, which is mapped to a [`HotplugEvent`]; actions other than add and
//! remove (change, bind, unbind, ...) are skipped.

use std::io;

use futures::StreamExt;
use tokio_udev::AsyncMonitorSocket;
use udev::{EventType, MonitorBuilder};

use crate::device::DeviceInfo;

/// A device appeared or disappeared
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Add(DeviceInfo),
    Remove(DeviceInfo),
}

impl HotplugEvent {
    pub fn device(&self) -> &DeviceInfo {
        match self {
            Self::Add(device) | Self::Remove(device) => device,
        }
    }

    /// Map a udev action onto a hot-plug event, if it is one we handle
    pub fn from_action(action: EventType, device: DeviceInfo) -> Option<Self> {
        match action {
            EventType::Add => Some(Self::Add(device)),
            EventType::Remove => Some(Self::Remove(device)),
            _ => None,
        }
    }
}

/// Async stream of add/remove events for a set of subsystems
pub struct HotplugMonitor {
    socket: AsyncMonitorSocket,
}

impl HotplugMonitor {
    /// Open the kernel event channel.
    ///
    /// Errors here are fatal for the daemon: without the channel no device
    /// can be watched, so they are returned to the caller as is.
    pub fn new(subsystems: &[&str]) -> io::Result<Self> {
        let mut builder = MonitorBuilder::new()?;
        for subsystem in subsystems {
            builder = builder.match_subsystem(*subsystem)?;
        }
        let socket = AsyncMonitorSocket::new(builder.listen()?)?;

        tracing::debug!("Listening for {} device events", subsystems.join("/"));

        Ok(Self { socket })
    }

    /// Wait for the next add or remove event.
    ///
    /// Returns `None` if the udev socket was closed.
    pub async fn next_event(&mut self) -> Option<io::Result<HotplugEvent>> {
        loop {
            let event = match self.socket.next().await? {
                Ok(event) => event,
                Err(e) => return Some(Err(e)),
            };

            let action = event.event_type();
            let device = DeviceInfo::from_udev(&event.device());
            let sys_name = device.sys_name.clone();

            match HotplugEvent::from_action(action, device) {
                Some(hotplug) => return Some(Ok(hotplug)),
                None => tracing::trace!("Ignoring {:?} event for {}", action, sys_name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    #[test]
    fn test_from_action_maps_add_and_remove() {
        let device = test_device("js0", "/sys/input0", Some("/dev/input/js0"));

        assert_eq!(
            HotplugEvent::from_action(EventType::Add, device.clone()),
            Some(HotplugEvent::Add(device.clone()))
        );
        assert_eq!(
            HotplugEvent::from_action(EventType::Remove, device.clone()),
            Some(HotplugEvent::Remove(device.clone()))
        );
    }

    #[test]
    fn test_from_action_ignores_other_actions() {
        let device = test_device("js0", "/sys/input0", Some("/dev/input/js0"));

        assert_eq!(HotplugEvent::from_action(EventType::Change, device.clone()), None);
        assert_eq!(HotplugEvent::from_action(EventType::Bind, device.clone()), None);
        assert_eq!(HotplugEvent::from_action(EventType::Unbind, device), None);
    }

    #[test]
    fn test_event_device_accessor() {
        let device = test_device("event3", "/sys/input0", Some("/dev/input/event3"));
        let event = HotplugEvent::Remove(device.clone());
        assert_eq!(event.device(), &device);
    }
}
