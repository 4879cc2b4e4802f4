// SPDX-License-Identifier: GPL-3.0-only

//! Block devices and kernel hotplug notifications

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Device types the hotplug pipeline understands (udev `DEVTYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Disk,
    Partition,
}

impl DeviceType {
    pub const ALL: [DeviceType; 2] = [DeviceType::Disk, DeviceType::Partition];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Partition => "partition",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disk" => Ok(Self::Disk),
            "partition" => Ok(Self::Partition),
            other => Err(format!("unsupported device type: {other}")),
        }
    }
}

/// Hotplug actions the pipeline understands (udev `ACTION`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    Add,
    Remove,
}

impl DeviceAction {
    pub const ALL: [DeviceAction; 2] = [DeviceAction::Add, DeviceAction::Remove];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Add => "added",
            Self::Remove => "removed",
        }
    }
}

impl FromStr for DeviceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            other => Err(format!("unsupported device action: {other}")),
        }
    }
}

/// A raw kernel/udev notification: action plus environment-style properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UEvent {
    pub action: String,
    pub env: HashMap<String, String>,
}

impl UEvent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            env: HashMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// The `DEVTYPE` discriminator, when present.
    pub fn devtype(&self) -> Option<&str> {
        self.get("DEVTYPE")
    }
}

/// A block device as reported by `lsblk`, with its partitions as children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub name: String,

    /// Device node (e.g., "/dev/sdb")
    pub path: String,

    /// `disk`, `part`, `loop`, ...
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub fs_type: Option<String>,

    #[serde(default)]
    pub mount_point: Option<String>,

    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// Depth-first iterator over this device and all nested children.
    pub fn flatten(&self) -> Vec<&BlockDevice> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_types_and_actions() {
        assert_eq!("disk".parse::<DeviceType>(), Ok(DeviceType::Disk));
        assert_eq!("partition".parse::<DeviceType>(), Ok(DeviceType::Partition));
        assert!("loop".parse::<DeviceType>().is_err());

        assert_eq!("add".parse::<DeviceAction>(), Ok(DeviceAction::Add));
        assert!("change".parse::<DeviceAction>().is_err());
        assert_eq!(DeviceAction::Remove.past_tense(), "removed");
    }

    #[test]
    fn flatten_walks_children_depth_first() {
        let disk = BlockDevice {
            name: "sdb".to_string(),
            path: "/dev/sdb".to_string(),
            kind: "disk".to_string(),
            children: vec![
                BlockDevice {
                    name: "sdb1".to_string(),
                    path: "/dev/sdb1".to_string(),
                    kind: "part".to_string(),
                    ..BlockDevice::default()
                },
                BlockDevice {
                    name: "sdb2".to_string(),
                    path: "/dev/sdb2".to_string(),
                    kind: "part".to_string(),
                    ..BlockDevice::default()
                },
            ],
            ..BlockDevice::default()
        };

        let paths: Vec<&str> = disk.flatten().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/dev/sdb", "/dev/sdb1", "/dev/sdb2"]);
    }
}
