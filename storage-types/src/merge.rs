// SPDX-License-Identifier: GPL-3.0-only

//! Union mount ("merge") declarations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::volume::{Volume, VolumeId};

/// Filesystem type used when a merge request does not name one
pub const DEFAULT_MERGE_FS_TYPE: &str = "fuse.mergerfs";

/// Separator between branches in a mergerfs source string
pub const MERGE_SOURCE_SEPARATOR: &str = ":";

/// A declared union mount with its source volumes resolved, in stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merge {
    pub id: u64,
    pub fs_type: String,
    pub mount_point: String,

    /// Local directory holding the merge's own branch (always the first source)
    pub source_base_path: String,

    pub source_volumes: Vec<Volume>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merge {
    /// Ordered branch list: the base path followed by each source volume's mount point.
    pub fn expected_sources(&self) -> Vec<String> {
        std::iter::once(self.source_base_path.clone())
            .chain(self.source_volumes.iter().map(|v| v.mount_point.clone()))
            .collect()
    }

    /// Branch list joined into the source string handed to `mount`.
    pub fn source_string(&self) -> String {
        self.expected_sources().join(MERGE_SOURCE_SEPARATOR)
    }

    pub fn source_volume_ids(&self) -> Vec<VolumeId> {
        self.source_volumes.iter().map(|v| v.id).collect()
    }
}

/// Input for creating a merge record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMerge {
    pub fs_type: String,
    pub mount_point: String,
    pub source_base_path: String,
    pub source_volume_ids: Vec<VolumeId>,
}

/// API-facing merge request; sources are named by volume device path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    #[serde(default)]
    pub fs_type: Option<String>,
    pub mount_point: String,
    pub source_base_path: String,
    #[serde(default)]
    pub source_volume_paths: Option<Vec<String>>,
}

/// API-facing merge representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeView {
    pub id: u64,
    pub fs_type: String,
    pub mount_point: String,
    pub source_base_path: String,
    pub source_volume_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Merge> for MergeView {
    fn from(merge: &Merge) -> Self {
        Self {
            id: merge.id,
            fs_type: merge.fs_type.clone(),
            mount_point: merge.mount_point.clone(),
            source_base_path: merge.source_base_path.clone(),
            source_volume_paths: merge.source_volumes.iter().map(|v| v.path.clone()).collect(),
            created_at: merge.created_at,
            updated_at: merge.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(id: VolumeId, path: &str, mount_point: &str) -> Volume {
        let now = Utc::now();
        Volume {
            id,
            uuid: format!("uuid-{id}"),
            path: path.to_string(),
            mount_point: mount_point.to_string(),
            bus: String::new(),
            vendor: String::new(),
            model: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn expected_sources_start_with_base_path_in_stored_order() {
        let now = Utc::now();
        let merge = Merge {
            id: 1,
            fs_type: DEFAULT_MERGE_FS_TYPE.to_string(),
            mount_point: "/DATA".to_string(),
            source_base_path: "/data/merge1".to_string(),
            source_volumes: vec![
                volume(1, "/dev/sdb1", "/mnt/v1"),
                volume(2, "/dev/sdc1", "/mnt/v2"),
            ],
            created_at: now,
            updated_at: now,
        };

        assert_eq!(
            merge.expected_sources(),
            vec!["/data/merge1", "/mnt/v1", "/mnt/v2"]
        );
        assert_eq!(merge.source_string(), "/data/merge1:/mnt/v1:/mnt/v2");

        let view = MergeView::from(&merge);
        assert_eq!(view.source_volume_paths, vec!["/dev/sdb1", "/dev/sdc1"]);
    }

    #[test]
    fn merge_request_defaults_optional_fields() {
        let request: MergeRequest =
            serde_json::from_str(r#"{"mount_point":"/DATA","source_base_path":"/var/merge"}"#)
                .expect("deserialize request");
        assert_eq!(request.fs_type, None);
        assert_eq!(request.source_volume_paths, None);
    }
}
