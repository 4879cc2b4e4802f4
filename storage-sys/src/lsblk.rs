// SPDX-License-Identifier: GPL-3.0-only

//! Block device discovery through `lsblk(8)`

use std::path::PathBuf;
use std::sync::Mutex;

use serde::Deserialize;
use storage_types::BlockDevice;
use tracing::{debug, info};

use crate::command::{find_tool, run_capture};
use crate::{Result, SysError};

const LSBLK_ARGS: &[&str] = &[
    "--json",
    "--tree",
    "--output",
    "NAME,PATH,TYPE,UUID,FSTYPE,MOUNTPOINT",
];

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl From<LsblkDevice> for BlockDevice {
    fn from(device: LsblkDevice) -> Self {
        let path = device
            .path
            .unwrap_or_else(|| format!("/dev/{}", device.name));
        Self {
            name: device.name,
            path,
            kind: device.kind.unwrap_or_default(),
            uuid: device.uuid,
            fs_type: device.fstype,
            mount_point: device.mountpoint,
            children: device.children.into_iter().map(Into::into).collect(),
        }
    }
}

/// lsblk wrapper with a result cache that hotplug events invalidate
pub struct LsblkCli {
    binary_path: PathBuf,
    cache: Mutex<Option<Vec<BlockDevice>>>,
}

impl LsblkCli {
    pub fn new() -> Result<Self> {
        let binary_path = find_tool("lsblk")?;
        info!("Found lsblk binary at {:?}", binary_path);
        Ok(Self {
            binary_path,
            cache: Mutex::new(None),
        })
    }

    /// Block devices as a tree (disks with partitions as children).
    pub async fn list(&self) -> Result<Vec<BlockDevice>> {
        let cached = self.lock_cache().clone();
        if let Some(cached) = cached {
            debug!("Serving {} block devices from cache", cached.len());
            return Ok(cached);
        }

        let output = run_capture(&self.binary_path, LSBLK_ARGS).await?;
        let devices = parse_lsblk_json(&output)?;
        debug!("lsblk reported {} top-level devices", devices.len());

        *self.lock_cache() = Some(devices.clone());
        Ok(devices)
    }

    /// Drop the cached listing so the next call re-runs lsblk.
    pub fn invalidate(&self) {
        self.lock_cache().take();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<Vec<BlockDevice>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn parse_lsblk_json(output: &str) -> Result<Vec<BlockDevice>> {
    let parsed: LsblkOutput = serde_json::from_str(output)
        .map_err(|e| SysError::InvalidOutput(format!("lsblk json: {e}")))?;
    Ok(parsed.blockdevices.into_iter().map(Into::into).collect())
}
