// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use crate::StorageError;

#[async_trait]
pub trait HelperShell: Send + Sync {
    /// Remove mount point directories that are no longer in use.
    async fn cleanup_unused_dirs(&self) -> Result<(), StorageError>;

    /// Turn on SMART monitoring for a whole disk.
    async fn enable_smart(&self, device_path: &str) -> Result<(), StorageError>;
}
