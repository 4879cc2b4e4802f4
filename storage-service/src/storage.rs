// SPDX-License-Identifier: GPL-3.0-only

//! Facade over volumes, mounts and merges
//!
//! Every call returns [`StorageError`] so callers get a kind and a status
//! code regardless of which layer failed.

use std::sync::Arc;

use storage_contracts::{MountOpsAdapter, StorageError};
use storage_types::{
    MergeRequest, MergeView, Mount, MountFilter, MountRequest, NewVolume, Volume, VolumeId,
};
use tracing::{info, warn};

use crate::error::Result;
use crate::merges::{MergeService, ReconcileReport};
use crate::store::Store;

pub struct LocalStorage {
    store: Arc<Store>,
    mounts: Arc<dyn MountOpsAdapter>,
    merges: Arc<MergeService>,
}

impl LocalStorage {
    pub fn new(
        store: Arc<Store>,
        mounts: Arc<dyn MountOpsAdapter>,
        merges: Arc<MergeService>,
    ) -> Self {
        Self {
            store,
            mounts,
            merges,
        }
    }

    // Mounts

    pub async fn list_mounts(&self, filter: &MountFilter) -> Result<Vec<Mount>> {
        self.mounts.list_mounts(filter).await
    }

    /// Mount a source. Persisting into fstab is not supported: a `persist`
    /// request still mounts, then reports `Unsupported`.
    pub async fn mount(&self, request: MountRequest) -> Result<Mount> {
        if request.source.is_empty() || request.mount_point.is_empty() {
            return Err(StorageError::invalid_input(
                "mount requires a source and a mount point",
            ));
        }

        let mount = self
            .mounts
            .mount(
                &request.source,
                &request.mount_point,
                &request.fs_type,
                &request.options,
            )
            .await?;
        info!("Mounted {} at {}", mount.source, mount.mount_point);

        if request.persist {
            warn!(
                "Persisting {} across reboots was requested but is not supported",
                mount.mount_point
            );
            return Err(StorageError::unsupported(
                "persisting mounts to fstab is not implemented",
            ));
        }
        Ok(mount)
    }

    pub async fn unmount(&self, mount_point: &str) -> Result<()> {
        self.mounts.unmount(mount_point).await?;
        info!("Unmounted {}", mount_point);
        Ok(())
    }

    // Volumes

    pub fn list_volumes(&self) -> Vec<Volume> {
        self.store.list_volumes()
    }

    pub fn get_volume(&self, id: VolumeId) -> Result<Volume> {
        Ok(self.store.get_volume(id)?)
    }

    pub fn register_volume(&self, volume: NewVolume) -> Result<Volume> {
        Ok(self.store.upsert_volume(volume)?)
    }

    /// `mount_point` must be absolute; it is stored normalized.
    pub fn update_volume_mount_point(&self, uuid: &str, mount_point: &str) -> Result<Volume> {
        Ok(self.store.update_volume_mount_point(uuid, mount_point)?)
    }

    /// Delete a volume; merges referencing it lose it from their sources.
    pub fn delete_volume(&self, id: VolumeId) -> Result<Volume> {
        Ok(self.store.delete_volume(id)?)
    }

    // Merges

    pub fn list_merges(&self, mount_point: Option<&str>) -> Result<Vec<MergeView>> {
        self.merges.list(mount_point)
    }

    pub async fn create_merge(&self, request: MergeRequest) -> Result<MergeView> {
        self.merges.create(request).await
    }

    pub async fn update_merge(
        &self,
        mount_point: &str,
        source_volume_paths: &[String],
    ) -> Result<MergeView> {
        self.merges.update(mount_point, source_volume_paths).await
    }

    pub async fn delete_merge(&self, mount_point: &str) -> Result<MergeView> {
        self.merges.delete(mount_point).await
    }

    pub async fn reconcile_merges(&self) -> ReconcileReport {
        self.merges.reconcile().await
    }
}
