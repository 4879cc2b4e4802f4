// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use storage_types::BlockDevice;

use crate::StorageError;

#[async_trait]
pub trait BlockDeviceDiscovery: Send + Sync {
    /// Top-level block devices with their partitions as children.
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>, StorageError>;

    /// Drop any cached enumeration so the next listing re-reads the system.
    fn invalidate_cache(&self);
}
