// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// A live entry of the OS mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub mount_point: String,
    pub source: String,
    pub fs_type: String,

    /// Per-mount options, comma separated (e.g., "rw,relatime")
    pub options: String,
}

/// Optional filters applied when listing mounts; all set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFilter {
    #[serde(default)]
    pub mount_point: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub fs_type: Option<String>,
}

/// Lexically normalize an absolute mount point: repeated and trailing
/// slashes collapse, `.` and `..` components resolve. Relative or empty
/// paths give `None`. Symlinks are not followed.
pub fn clean_mount_point(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

impl MountFilter {
    pub fn at(mount_point: impl Into<String>) -> Self {
        let mount_point = mount_point.into();
        Self {
            mount_point: Some(clean_mount_point(&mount_point).unwrap_or(mount_point)),
            ..Self::default()
        }
    }

    /// The kernel reports clean paths, so the filter's mount point is
    /// normalized before comparing.
    pub fn matches(&self, mount: &Mount) -> bool {
        self.mount_point.as_deref().is_none_or(|mp| {
            clean_mount_point(mp).as_deref().unwrap_or(mp) == mount.mount_point
        })
            && self.source.as_deref().is_none_or(|s| s == mount.source)
            && self.fs_type.as_deref().is_none_or(|t| t == mount.fs_type)
    }
}

/// API-facing generic mount request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub source: String,
    pub mount_point: String,
    pub fs_type: String,
    #[serde(default)]
    pub options: String,

    /// Ask for the mount to survive reboots (not supported)
    #[serde(default)]
    pub persist: bool,
}
