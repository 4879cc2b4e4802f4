// SPDX-License-Identifier: GPL-3.0-only

//! Serial disk (volume) records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository identifier of a [`Volume`]
pub type VolumeId = u64;

/// A known filesystem-bearing block device, keyed by filesystem UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,

    /// Filesystem UUID (unique across the repository)
    pub uuid: String,

    /// Current device node (e.g., "/dev/sdb1"); may change when the kernel renumbers
    pub path: String,

    /// Declared mount point the volume is expected at
    pub mount_point: String,

    /// Connection bus reported by udev (e.g., "usb", "ata")
    #[serde(default)]
    pub bus: String,

    #[serde(default)]
    pub vendor: String,

    #[serde(default)]
    pub model: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering (or re-detecting) a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVolume {
    pub uuid: String,
    pub path: String,

    /// Mount point to record; `None` keeps the stored one on re-detection
    #[serde(default)]
    pub mount_point: Option<String>,

    #[serde(default)]
    pub bus: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model: String,
}
