// SPDX-License-Identifier: GPL-3.0-only

//! Startup remount of known volumes

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use storage_contracts::{
    BlockDeviceDiscovery, HelperShell, MountOpsAdapter, StorageError, StorageErrorKind,
};
use storage_types::{BlockDevice, Volume};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::store::Store;

const DISK_KIND: &str = "disk";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemountReport {
    /// Live devices whose filesystem UUID matches a known volume
    pub matched: usize,
    pub already_mounted: usize,
    pub mounted: usize,

    /// Mounted at a suffixed path because the recorded one was taken
    pub relocated: usize,

    /// Already mounted somewhere other than the recorded mount point; left alone
    pub mounted_elsewhere: usize,
    pub failed: usize,

    /// Disks that accepted a SMART enable request
    pub smart_enabled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Remount {
    AlreadyMounted,
    MountedElsewhere(String),
    Mounted,
    Relocated(String),
}

pub struct RemountSupervisor {
    store: Arc<Store>,
    mounts: Arc<dyn MountOpsAdapter>,
    discovery: Arc<dyn BlockDeviceDiscovery>,
    helper: Option<Arc<dyn HelperShell>>,
}

impl RemountSupervisor {
    pub fn new(
        store: Arc<Store>,
        mounts: Arc<dyn MountOpsAdapter>,
        discovery: Arc<dyn BlockDeviceDiscovery>,
        helper: Option<Arc<dyn HelperShell>>,
    ) -> Self {
        Self {
            store,
            mounts,
            discovery,
            helper,
        }
    }

    /// Enable SMART on every disk and re-attach every known volume that is
    /// plugged in. A failure on one device is logged and the rest are still
    /// processed.
    pub async fn run(&self) -> RemountReport {
        let mut report = RemountReport::default();
        let volumes = self.store.list_volumes();

        match self.discovery.list_block_devices().await {
            Ok(devices) => {
                let known: HashMap<&str, &Volume> =
                    volumes.iter().map(|v| (v.uuid.as_str(), v)).collect();

                for disk in &devices {
                    if self.enable_smart(disk).await {
                        report.smart_enabled += 1;
                    }
                }

                for device in devices.iter().flat_map(BlockDevice::flatten) {
                    let Some(volume) = device.uuid.as_deref().and_then(|u| known.get(u)) else {
                        continue;
                    };
                    report.matched += 1;

                    match self.remount(device, volume).await {
                        Ok(Remount::AlreadyMounted) => report.already_mounted += 1,
                        Ok(Remount::MountedElsewhere(path)) => {
                            info!(
                                "Volume {} is mounted at {} instead of {}; leaving it there",
                                volume.uuid, path, volume.mount_point
                            );
                            report.mounted_elsewhere += 1;
                        }
                        Ok(Remount::Mounted) => report.mounted += 1,
                        Ok(Remount::Relocated(path)) => {
                            warn!(
                                "Volume {} mounted at {} because {} is occupied",
                                volume.uuid, path, volume.mount_point
                            );
                            report.mounted += 1;
                            report.relocated += 1;
                        }
                        Err(e) => {
                            error!("Failed to remount {} ({}): {}", device.path, volume.uuid, e);
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(e) => error!("Cannot enumerate block devices for remount: {}", e),
        }

        self.discovery.invalidate_cache();
        if let Some(helper) = &self.helper {
            match helper.cleanup_unused_dirs().await {
                Ok(()) => {}
                Err(e) if e.is(StorageErrorKind::Unavailable) => debug!("Skipping cleanup: {}", e),
                Err(e) => warn!("Helper cleanup failed: {}", e),
            }
        }

        info!(
            "Boot remount: {} matched, {} already mounted, {} elsewhere, {} mounted ({} relocated), {} failed",
            report.matched,
            report.already_mounted,
            report.mounted_elsewhere,
            report.mounted,
            report.relocated,
            report.failed
        );
        report
    }

    async fn remount(&self, device: &BlockDevice, volume: &Volume) -> Result<Remount> {
        if device.path != volume.path {
            info!(
                "Volume {} moved from {} to {}",
                volume.uuid, volume.path, device.path
            );
            self.store.update_volume_path(&volume.uuid, &device.path)?;
        }

        match device.mount_point.as_deref() {
            Some(current) if current == volume.mount_point => {
                debug!("{} already mounted at {}", device.path, volume.mount_point);
                return Ok(Remount::AlreadyMounted);
            }
            Some(current) => return Ok(Remount::MountedElsewhere(current.to_string())),
            None => {}
        }

        let target = self.free_mount_point(&volume.mount_point).await?;
        self.mounts.mount_disk(&device.path, &target).await?;

        if target == volume.mount_point {
            info!("Mounted {} at {}", device.path, target);
            return Ok(Remount::Mounted);
        }

        self.store
            .update_volume_mount_point(&volume.uuid, &target)?;
        Ok(Remount::Relocated(target))
    }

    /// Best effort; returns whether the disk accepted the request.
    async fn enable_smart(&self, device: &BlockDevice) -> bool {
        let Some(helper) = &self.helper else {
            return false;
        };
        if device.kind != DISK_KIND {
            return false;
        }
        match helper.enable_smart(&device.path).await {
            Ok(()) => true,
            Err(e) if e.is(StorageErrorKind::Unavailable) => false,
            Err(e) => {
                debug!("SMART not enabled on {}: {}", device.path, e);
                false
            }
        }
    }

    async fn free_mount_point(&self, preferred: &str) -> Result<String> {
        for candidate in storage_sys::collision_candidates(preferred) {
            if self.mounts.mount_point_available(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(StorageError::conflict(format!(
            "no free mount point derived from {preferred}"
        )))
    }
}
