// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storage_contracts::traits::{
    BlockDeviceDiscovery, HelperShell, MountOpsAdapter, UnionFsAdapter,
};
use storage_contracts::StorageError;
use storage_sys::{HelperScript, LsblkCli, MergerFsCli, SmartCtl};
use storage_types::{BlockDevice, Mount, MountFilter};
use tracing::warn;

use super::{bounded, run_blocking};

/// Mount table, `mount(8)` and `umount2(2)`
#[derive(Clone)]
pub struct SystemMountAdapter {
    timeout: Duration,
}

impl SystemMountAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MountOpsAdapter for SystemMountAdapter {
    async fn list_mounts(&self, filter: &MountFilter) -> Result<Vec<Mount>, StorageError> {
        let filter = filter.clone();
        run_blocking(self.timeout, "list mounts", move || {
            storage_sys::list_mounts(&filter)
        })
        .await
    }

    async fn mount(
        &self,
        source: &str,
        mount_point: &str,
        fs_type: &str,
        options: &str,
    ) -> Result<Mount, StorageError> {
        let operation = format!("mount {mount_point}");
        bounded(
            self.timeout,
            &operation,
            storage_sys::mount(source, mount_point, fs_type, options),
        )
        .await
    }

    async fn mount_disk(&self, device_path: &str, mount_point: &str) -> Result<(), StorageError> {
        let operation = format!("mount {device_path}");
        bounded(
            self.timeout,
            &operation,
            storage_sys::mount_disk(device_path, mount_point),
        )
        .await
    }

    async fn unmount(&self, mount_point: &str) -> Result<(), StorageError> {
        let mount_point = mount_point.to_owned();
        let operation = format!("unmount {mount_point}");
        run_blocking(self.timeout, &operation, move || {
            storage_sys::unmount(&mount_point)
        })
        .await
    }

    async fn mount_point_available(&self, path: &str) -> Result<bool, StorageError> {
        let path = PathBuf::from(path);
        run_blocking(self.timeout, "check mount point", move || {
            storage_sys::mount_point_available(&path)
        })
        .await
    }
}

/// mergerfs runtime control through `getfattr`/`setfattr`
#[derive(Clone)]
pub struct MergerFsAdapter {
    cli: Arc<MergerFsCli>,
    timeout: Duration,
}

impl MergerFsAdapter {
    pub fn new(timeout: Duration) -> Result<Self, StorageError> {
        let cli = MergerFsCli::new().map_err(crate::error::from_sys)?;
        Ok(Self {
            cli: Arc::new(cli),
            timeout,
        })
    }
}

#[async_trait]
impl UnionFsAdapter for MergerFsAdapter {
    async fn get_source(&self, mount_point: &str) -> Result<Vec<String>, StorageError> {
        bounded(
            self.timeout,
            "read merge sources",
            self.cli.get_source(mount_point),
        )
        .await
    }

    async fn set_source(&self, mount_point: &str, sources: &[String]) -> Result<(), StorageError> {
        bounded(
            self.timeout,
            "write merge sources",
            self.cli.set_source(mount_point, sources),
        )
        .await
    }

    async fn list_values(
        &self,
        mount_point: &str,
    ) -> Result<BTreeMap<String, String>, StorageError> {
        bounded(
            self.timeout,
            "list merge options",
            self.cli.list_values(mount_point),
        )
        .await
    }
}

/// Block device enumeration through `lsblk`
#[derive(Clone)]
pub struct LsblkDiscovery {
    cli: Arc<LsblkCli>,
    timeout: Duration,
}

impl LsblkDiscovery {
    pub fn new(timeout: Duration) -> Result<Self, StorageError> {
        let cli = LsblkCli::new().map_err(crate::error::from_sys)?;
        Ok(Self {
            cli: Arc::new(cli),
            timeout,
        })
    }
}

#[async_trait]
impl BlockDeviceDiscovery for LsblkDiscovery {
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>, StorageError> {
        bounded(self.timeout, "lsblk", self.cli.list()).await
    }

    fn invalidate_cache(&self) {
        self.cli.invalidate();
    }
}

/// `local-storage-helper.sh` functions and `smartctl`. Either tool may
/// be missing; its operations then report `Unavailable`.
#[derive(Clone)]
pub struct SystemHelperShell {
    script: Option<Arc<HelperScript>>,
    smart: Option<Arc<SmartCtl>>,
    timeout: Duration,
}

impl SystemHelperShell {
    pub fn new(shell_path: &Path, timeout: Duration) -> Self {
        let script = HelperScript::new(shell_path)
            .inspect_err(|e| warn!("Helper script not available: {}", e))
            .ok()
            .map(Arc::new);
        let smart = SmartCtl::new()
            .inspect_err(|e| warn!("SMART tools not available: {}", e))
            .ok()
            .map(Arc::new);
        Self {
            script,
            smart,
            timeout,
        }
    }

    /// Route label, or `None` when neither tool is installed.
    pub fn route(&self) -> Option<&'static str> {
        match (&self.script, &self.smart) {
            (Some(_), Some(_)) => Some("helper-script+smartctl"),
            (Some(_), None) => Some("helper-script"),
            (None, Some(_)) => Some("smartctl"),
            (None, None) => None,
        }
    }
}

#[async_trait]
impl HelperShell for SystemHelperShell {
    async fn cleanup_unused_dirs(&self) -> Result<(), StorageError> {
        let script = self
            .script
            .as_ref()
            .ok_or_else(|| StorageError::unavailable("helper script is not installed"))?;
        bounded(self.timeout, "helper cleanup", script.cleanup_unused_dirs()).await
    }

    async fn enable_smart(&self, device_path: &str) -> Result<(), StorageError> {
        let smart = self
            .smart
            .as_ref()
            .ok_or_else(|| StorageError::unavailable("smartctl is not installed"))?;
        let operation = format!("enable SMART on {device_path}");
        bounded(self.timeout, &operation, smart.enable(device_path)).await
    }
}
