// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::StorageError;

/// Runtime control of a live union (mergerfs) mount. Every call reflects the
/// current state of the mount; nothing is cached.
#[async_trait]
pub trait UnionFsAdapter: Send + Sync {
    /// Ordered branch list of the union mounted at `mount_point`.
    async fn get_source(&self, mount_point: &str) -> Result<Vec<String>, StorageError>;

    /// Replace the branch list in one write.
    async fn set_source(&self, mount_point: &str, sources: &[String]) -> Result<(), StorageError>;

    /// All runtime options of the mount. Success doubles as proof that
    /// `mount_point` is a live union mount.
    async fn list_values(&self, mount_point: &str)
    -> Result<BTreeMap<String, String>, StorageError>;
}
