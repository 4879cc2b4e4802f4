// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::StorageError;
use storage_sys::SysError;
use thiserror::Error;

/// Repository errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    #[error("merge at {0} not found")]
    MergeNotFound(String),

    #[error("merge mount point already exists: {0}")]
    MergeExists(String),

    #[error("after-delete hook {hook} failed: {message}")]
    HookFailed { hook: &'static str, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt store document: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for StorageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VolumeNotFound(_) | StoreError::MergeNotFound(_) => {
                StorageError::not_found(err.to_string())
            }
            StoreError::InvalidVolume(_) => StorageError::invalid_input(err.to_string()),
            StoreError::MergeExists(_) => StorageError::conflict(err.to_string()),
            StoreError::HookFailed { .. } | StoreError::Io { .. } | StoreError::Serialization(_) => {
                StorageError::internal(err.to_string())
            }
        }
    }
}

/// Map a system-layer failure onto the shared error model.
pub fn from_sys(err: SysError) -> StorageError {
    match err {
        SysError::PermissionDenied(msg) => StorageError::permission_denied(msg),
        SysError::NotFound(msg) => StorageError::not_found(msg),
        SysError::ToolNotFound(tool) => {
            StorageError::unavailable(format!("required tool not installed: {tool}"))
        }
        SysError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            StorageError::permission_denied(e.to_string())
        }
        other => StorageError::internal(other.to_string()),
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
