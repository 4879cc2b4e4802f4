// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use storage_types::{Mount, MountFilter};

use crate::StorageError;

#[async_trait]
pub trait MountOpsAdapter: Send + Sync {
    async fn list_mounts(&self, filter: &MountFilter) -> Result<Vec<Mount>, StorageError>;

    /// Mount `source` at `mount_point`. A rejection by the OS for lack of
    /// privilege is reported as `StorageErrorKind::PermissionDenied`.
    async fn mount(
        &self,
        source: &str,
        mount_point: &str,
        fs_type: &str,
        options: &str,
    ) -> Result<Mount, StorageError>;

    /// Mount a block device node, letting the OS detect the filesystem type.
    async fn mount_disk(&self, device_path: &str, mount_point: &str) -> Result<(), StorageError>;

    async fn unmount(&self, mount_point: &str) -> Result<(), StorageError>;

    /// Whether `path` can be used as a fresh mount point: it does not exist, or
    /// it is an empty directory that is not itself a mount point.
    async fn mount_point_available(&self, path: &str) -> Result<bool, StorageError>;
}
