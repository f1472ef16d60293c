//! Device snapshots and enumeration

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// udev property set on every joystick-class input device
pub const JOYSTICK_PROPERTY: &str = "ID_INPUT_JOYSTICK";

/// Snapshot of a kernel device taken when it was enumerated or announced.
///
/// udev handles are tied to the udev context and are not `Send`, so the
/// watchers only ever see this plain copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub sys_name: String,
    pub syspath: PathBuf,
    pub subsystem: Option<String>,
    /// Grouping key shared by all interfaces of one physical device
    pub parent_key: String,
    pub devnode: Option<PathBuf>,
    pub properties: HashMap<String, String>,
}

impl DeviceInfo {
    /// Copy the interesting parts out of a udev device
    pub fn from_udev(device: &udev::Device) -> Self {
        let syspath = device.syspath().to_path_buf();
        let parent_key = parent_key_of(&syspath);

        let properties = device
            .properties()
            .map(|property| {
                (
                    property.name().to_string_lossy().into_owned(),
                    property.value().to_string_lossy().into_owned(),
                )
            })
            .collect();

        Self {
            sys_name: device.sysname().to_string_lossy().into_owned(),
            syspath,
            subsystem: device
                .subsystem()
                .map(|subsystem| subsystem.to_string_lossy().into_owned()),
            parent_key,
            devnode: device.devnode().map(Path::to_path_buf),
            properties,
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Device node path, if the device has a non-empty one
    pub fn node(&self) -> Option<&Path> {
        self.devnode
            .as_deref()
            .filter(|node| !node.as_os_str().is_empty())
    }

    /// A joystick is a device udev flags as one and that we can open
    pub fn is_joystick(&self) -> bool {
        self.property(JOYSTICK_PROPERTY).map(is_truthy).unwrap_or(false) && self.node().is_some()
    }

    /// Get vendor:product string (e.g., "045e:028e")
    pub fn vendor_product(&self) -> Option<String> {
        let vendor = self.property("ID_VENDOR_ID")?;
        let model = self.property("ID_MODEL_ID")?;
        Some(format!("{}:{}", vendor, model))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Grouping key for the interfaces of one device.
///
/// Taken from the syspath alone: on unplug the kernel removes the parent
/// together with its children, so asking sysfs for the parent of a device
/// being removed no longer finds it.
pub fn parent_key_of(syspath: &Path) -> String {
    syspath
        .parent()
        .unwrap_or(syspath)
        .to_string_lossy()
        .into_owned()
}

/// Enumerate input devices udev classifies as joysticks
pub fn enumerate_joysticks() -> Result<Vec<DeviceInfo>> {
    let mut enumerator = udev::Enumerator::new().context("Failed to create udev enumerator")?;
    enumerator.match_subsystem("input")?;
    enumerator.match_property(JOYSTICK_PROPERTY, "1")?;

    let devices = enumerator
        .scan_devices()
        .context("Failed to scan input devices")?
        .map(|device| DeviceInfo::from_udev(&device))
        .filter(DeviceInfo::is_joystick)
        .collect();

    Ok(devices)
}

/// Dump a device and all of its ancestors with their udev properties.
///
/// Used when a device node disappears between enumeration and open, which
/// means we raced the kernel; the dump is what makes such reports actionable.
pub fn describe_ancestry(syspath: &Path) -> String {
    let device = match udev::Device::from_syspath(syspath) {
        Ok(device) => device,
        Err(e) => return format!("{} (no longer in sysfs: {})", syspath.display(), e),
    };

    let mut out = String::new();
    let mut current = Some(device);
    let mut depth = 0;

    while let Some(device) = current {
        let indent = depth * 2;
        let subsystem = device
            .subsystem()
            .map(|subsystem| subsystem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:indent$}{} [{}]",
            "",
            device.syspath().display(),
            subsystem,
            indent = indent
        );
        for property in device.properties() {
            let _ = writeln!(
                out,
                "{:indent$}  {}={}",
                "",
                property.name().to_string_lossy(),
                property.value().to_string_lossy(),
                indent = indent
            );
        }
        current = device.parent();
        depth += 1;
    }

    out
}

#[cfg(test)]
pub(crate) fn test_device(sys_name: &str, parent_key: &str, devnode: Option<&str>) -> DeviceInfo {
    let mut properties = HashMap::new();
    properties.insert(JOYSTICK_PROPERTY.to_string(), "1".to_string());
    DeviceInfo {
        sys_name: sys_name.to_string(),
        syspath: PathBuf::from(format!("{}/{}", parent_key, sys_name)),
        subsystem: Some("input".to_string()),
        parent_key: parent_key.to_string(),
        devnode: devnode.map(PathBuf::from),
        properties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joystick_requires_property_and_node() {
        let device = test_device("js0", "/sys/input0", Some("/dev/input/js0"));
        assert!(device.is_joystick());

        let without_node = test_device("input0", "/sys/usb1", None);
        assert!(!without_node.is_joystick());

        let mut empty_node = test_device("js1", "/sys/input1", Some(""));
        assert!(!empty_node.is_joystick());
        empty_node.devnode = Some(PathBuf::from("/dev/input/js1"));
        assert!(empty_node.is_joystick());

        let mut keyboard = test_device("event2", "/sys/input2", Some("/dev/input/event2"));
        keyboard.properties.clear();
        assert!(!keyboard.is_joystick());
    }

    #[test]
    fn test_joystick_property_values() {
        let mut device = test_device("event5", "/sys/input5", Some("/dev/input/event5"));
        for (value, expected) in [("1", true), ("true", true), ("0", false), ("", false)] {
            device
                .properties
                .insert(JOYSTICK_PROPERTY.to_string(), value.to_string());
            assert_eq!(device.is_joystick(), expected, "value {:?}", value);
        }
    }

    #[test]
    fn test_vendor_product() {
        let mut device = test_device("event5", "/sys/input5", Some("/dev/input/event5"));
        assert_eq!(device.vendor_product(), None);
        device
            .properties
            .insert("ID_VENDOR_ID".to_string(), "045e".to_string());
        device
            .properties
            .insert("ID_MODEL_ID".to_string(), "028e".to_string());
        assert_eq!(device.vendor_product().as_deref(), Some("045e:028e"));
    }

    #[test]
    fn test_parent_key_from_syspath() {
        assert_eq!(
            parent_key_of(Path::new("/sys/devices/pci0000:00/usb1/1-2/input/input9/event3")),
            "/sys/devices/pci0000:00/usb1/1-2/input/input9"
        );
        assert_eq!(
            parent_key_of(Path::new("/sys/devices/pci0000:00/usb1/1-2/input/input9/js0")),
            "/sys/devices/pci0000:00/usb1/1-2/input/input9"
        );
        assert_eq!(parent_key_of(Path::new("/")), "/");
    }

    #[test]
    fn test_describe_missing_syspath() {
        let description = describe_ancestry(Path::new("/sys/devices/joywake-test-missing"));
        assert!(description.contains("no longer in sysfs"));
    }
}
