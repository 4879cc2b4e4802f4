// SPDX-License-Identifier: GPL-3.0-only

//! Volume and merge repository
//!
//! A single document guarded by one mutex. Every mutation reloads the
//! document under the backend's exclusive lock, runs against it and saves
//! it before either lock is released; a failed save or a failed after-delete
//! observer restores the previous document.

mod backend;

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage_types::{Merge, NewMerge, NewVolume, Volume, VolumeId, clean_mount_point};
use tracing::{debug, info, warn};

#[cfg(test)]
pub use backend::MemoryBackend;
pub use backend::{JsonFileBackend, StoreBackend};

use crate::error::StoreError;

/// Persisted form of a merge: sources are referenced by volume id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub id: u64,
    pub fs_type: String,
    pub mount_point: String,
    pub source_base_path: String,
    pub source_volume_ids: Vec<VolumeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    pub next_volume_id: VolumeId,
    pub next_merge_id: u64,
    pub volumes: Vec<Volume>,
    pub merges: Vec<MergeRecord>,
}

impl Document {
    fn resolve(&self, record: &MergeRecord) -> Merge {
        let source_volumes = record
            .source_volume_ids
            .iter()
            .filter_map(|id| self.volumes.iter().find(|v| v.id == *id).cloned())
            .collect();

        Merge {
            id: record.id,
            fs_type: record.fs_type.clone(),
            mount_point: record.mount_point.clone(),
            source_base_path: record.source_base_path.clone(),
            source_volumes,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    fn volume_by_uuid_mut(&mut self, uuid: &str) -> Result<&mut Volume, StoreError> {
        self.volumes
            .iter_mut()
            .find(|v| v.uuid == uuid)
            .ok_or_else(|| StoreError::VolumeNotFound(uuid.to_string()))
    }

    fn merge_mut(&mut self, mount_point: &str) -> Result<&mut MergeRecord, StoreError> {
        self.merges
            .iter_mut()
            .find(|m| m.mount_point == mount_point)
            .ok_or_else(|| StoreError::MergeNotFound(mount_point.to_string()))
    }

    fn check_volume_ids(&self, ids: &[VolumeId]) -> Result<(), StoreError> {
        match ids.iter().find(|id| !self.volumes.iter().any(|v| v.id == **id)) {
            Some(missing) => Err(StoreError::VolumeNotFound(missing.to_string())),
            None => Ok(()),
        }
    }
}

/// Mutable view of the document handed to after-delete observers while the
/// deletion is still uncommitted.
pub struct VolumeDeletion<'a> {
    document: &'a mut Document,
    now: DateTime<Utc>,
}

impl VolumeDeletion<'_> {
    /// Mount points of merges that list `volume_id` as a source.
    pub fn merges_referencing(&self, volume_id: VolumeId) -> Vec<String> {
        self.document
            .merges
            .iter()
            .filter(|m| m.source_volume_ids.contains(&volume_id))
            .map(|m| m.mount_point.clone())
            .collect()
    }

    /// Drop `volume_id` from every merge's source list, keeping the order of
    /// the remaining sources. Returns how many merges changed.
    pub fn detach_from_merges(&mut self, volume_id: VolumeId) -> usize {
        let mut changed = 0;
        for merge in &mut self.document.merges {
            let before = merge.source_volume_ids.len();
            merge.source_volume_ids.retain(|id| *id != volume_id);
            if merge.source_volume_ids.len() != before {
                merge.updated_at = self.now;
                changed += 1;
            }
        }
        changed
    }
}

/// Runs inside the deletion's critical section; an error aborts the deletion.
pub trait AfterDeleteVolume: Send + Sync {
    fn name(&self) -> &'static str;

    fn after_delete_volume(
        &self,
        deletion: &mut VolumeDeletion<'_>,
        volume: &Volume,
    ) -> Result<(), StoreError>;
}

pub struct Store {
    backend: Box<dyn StoreBackend>,
    document: Mutex<Document>,
    observers: RwLock<Vec<Arc<dyn AfterDeleteVolume>>>,
}

impl Store {
    pub fn open(backend: Box<dyn StoreBackend>) -> Result<Self, StoreError> {
        let document = backend.load()?;
        info!(
            "Store loaded: {} volumes, {} merges",
            document.volumes.len(),
            document.merges.len()
        );
        Ok(Self {
            backend,
            document: Mutex::new(document),
            observers: RwLock::new(Vec::new()),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            document: Mutex::new(Document::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register_after_delete_volume(&self, observer: Arc<dyn AfterDeleteVolume>) {
        debug!("Registering after-delete observer {}", observer.name());
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The latest saved document. The CLI and the daemon share one file, so
    /// every read starts from the backend; the cached copy is served if the
    /// backend cannot be read.
    fn current(&self) -> MutexGuard<'_, Document> {
        let mut document = self.lock();
        match self.backend.load() {
            Ok(latest) => *document = latest,
            Err(e) => warn!("Serving cached store document: {}", e),
        }
        document
    }

    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Document) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut document = self.lock();
        let _exclusive = self.backend.lock_exclusive()?;
        *document = self.backend.load()?;
        let snapshot = document.clone();

        let outcome = change(&mut *document).and_then(|value| {
            self.backend.save(&document)?;
            Ok(value)
        });

        if outcome.is_err() {
            *document = snapshot;
        }
        outcome
    }

    // Volumes

    pub fn list_volumes(&self) -> Vec<Volume> {
        self.current().volumes.clone()
    }

    pub fn get_volume(&self, id: VolumeId) -> Result<Volume, StoreError> {
        self.current()
            .volumes
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| StoreError::VolumeNotFound(id.to_string()))
    }

    pub fn find_volume_by_uuid(&self, uuid: &str) -> Option<Volume> {
        self.current().volumes.iter().find(|v| v.uuid == uuid).cloned()
    }

    /// Insert a volume, or refresh the existing record with the same UUID.
    pub fn upsert_volume(&self, new: NewVolume) -> Result<Volume, StoreError> {
        if new.uuid.is_empty() {
            return Err(StoreError::InvalidVolume("filesystem UUID is empty".to_string()));
        }
        let new = NewVolume {
            mount_point: new.mount_point.as_deref().map(volume_mount_point).transpose()?,
            ..new
        };

        self.mutate(|document| {
            let now = Utc::now();

            if let Some(existing) = document.volumes.iter_mut().find(|v| v.uuid == new.uuid) {
                existing.path = new.path;
                if let Some(mount_point) = new.mount_point {
                    existing.mount_point = mount_point;
                }
                for (field, value) in [
                    (&mut existing.bus, new.bus),
                    (&mut existing.vendor, new.vendor),
                    (&mut existing.model, new.model),
                ] {
                    if !value.is_empty() {
                        *field = value;
                    }
                }
                existing.updated_at = now;
                debug!("Refreshed volume {} ({})", existing.id, existing.uuid);
                return Ok(existing.clone());
            }

            let mount_point = new.mount_point.ok_or_else(|| {
                StoreError::InvalidVolume(format!("volume {} has no mount point", new.uuid))
            })?;

            document.next_volume_id += 1;
            let volume = Volume {
                id: document.next_volume_id,
                uuid: new.uuid,
                path: new.path,
                mount_point,
                bus: new.bus,
                vendor: new.vendor,
                model: new.model,
                created_at: now,
                updated_at: now,
            };
            info!("Registered volume {} ({})", volume.id, volume.uuid);
            document.volumes.push(volume.clone());
            Ok(volume)
        })
    }

    pub fn update_volume_mount_point(
        &self,
        uuid: &str,
        mount_point: &str,
    ) -> Result<Volume, StoreError> {
        let mount_point = volume_mount_point(mount_point)?;
        self.mutate(|document| {
            let volume = document.volume_by_uuid_mut(uuid)?;
            volume.mount_point = mount_point;
            volume.updated_at = Utc::now();
            Ok(volume.clone())
        })
    }

    pub fn update_volume_path(&self, uuid: &str, path: &str) -> Result<Volume, StoreError> {
        self.mutate(|document| {
            let volume = document.volume_by_uuid_mut(uuid)?;
            volume.path = path.to_string();
            volume.updated_at = Utc::now();
            Ok(volume.clone())
        })
    }

    /// Remove a volume and run every after-delete observer in the same
    /// critical section.
    pub fn delete_volume(&self, id: VolumeId) -> Result<Volume, StoreError> {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        self.mutate(|document| {
            let position = document
                .volumes
                .iter()
                .position(|v| v.id == id)
                .ok_or_else(|| StoreError::VolumeNotFound(id.to_string()))?;
            let volume = document.volumes.remove(position);

            let mut deletion = VolumeDeletion {
                document,
                now: Utc::now(),
            };
            for observer in &observers {
                if let Err(e) = observer.after_delete_volume(&mut deletion, &volume) {
                    warn!(
                        "After-delete observer {} failed for volume {}: {}",
                        observer.name(),
                        volume.id,
                        e
                    );
                    return Err(StoreError::HookFailed {
                        hook: observer.name(),
                        message: e.to_string(),
                    });
                }
            }

            info!("Deleted volume {} ({})", volume.id, volume.uuid);
            Ok(volume)
        })
    }

    // Merges

    pub fn list_merges(&self, mount_point: Option<&str>) -> Vec<Merge> {
        let document = self.current();
        document
            .merges
            .iter()
            .filter(|m| mount_point.is_none_or(|mp| mp == m.mount_point))
            .map(|m| document.resolve(m))
            .collect()
    }

    pub fn find_merge(&self, mount_point: &str) -> Option<Merge> {
        let document = self.current();
        document
            .merges
            .iter()
            .find(|m| m.mount_point == mount_point)
            .map(|m| document.resolve(m))
    }

    pub fn create_merge(&self, new: NewMerge) -> Result<Merge, StoreError> {
        self.mutate(|document| {
            if document.merges.iter().any(|m| m.mount_point == new.mount_point) {
                return Err(StoreError::MergeExists(new.mount_point));
            }
            document.check_volume_ids(&new.source_volume_ids)?;

            let now = Utc::now();
            document.next_merge_id += 1;
            let record = MergeRecord {
                id: document.next_merge_id,
                fs_type: new.fs_type,
                mount_point: new.mount_point,
                source_base_path: new.source_base_path,
                source_volume_ids: new.source_volume_ids,
                created_at: now,
                updated_at: now,
            };
            info!("Declared merge {} at {}", record.id, record.mount_point);
            let merge = document.resolve(&record);
            document.merges.push(record);
            Ok(merge)
        })
    }

    pub fn update_merge_sources(
        &self,
        mount_point: &str,
        source_volume_ids: Vec<VolumeId>,
    ) -> Result<Merge, StoreError> {
        self.mutate(|document| {
            document.check_volume_ids(&source_volume_ids)?;
            let record = document.merge_mut(mount_point)?;
            record.source_volume_ids = source_volume_ids;
            record.updated_at = Utc::now();
            let record = record.clone();
            Ok(document.resolve(&record))
        })
    }

    pub fn delete_merge(&self, mount_point: &str) -> Result<Merge, StoreError> {
        self.mutate(|document| {
            let position = document
                .merges
                .iter()
                .position(|m| m.mount_point == mount_point)
                .ok_or_else(|| StoreError::MergeNotFound(mount_point.to_string()))?;
            let record = document.merges.remove(position);
            info!("Removed merge {} at {}", record.id, record.mount_point);
            Ok(document.resolve(&record))
        })
    }
}

fn volume_mount_point(mount_point: &str) -> Result<String, StoreError> {
    clean_mount_point(mount_point).ok_or_else(|| {
        StoreError::InvalidVolume(format!(
            "mount point must be an absolute path, got {mount_point:?}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_types::DEFAULT_MERGE_FS_TYPE;

    fn new_volume(uuid: &str, path: &str, mount_point: &str) -> NewVolume {
        NewVolume {
            uuid: uuid.to_string(),
            path: path.to_string(),
            mount_point: Some(mount_point.to_string()),
            ..NewVolume::default()
        }
    }

    fn new_merge(mount_point: &str, ids: Vec<VolumeId>) -> NewMerge {
        NewMerge {
            fs_type: DEFAULT_MERGE_FS_TYPE.to_string(),
            mount_point: mount_point.to_string(),
            source_base_path: format!("/var/lib/merge{mount_point}"),
            source_volume_ids: ids,
        }
    }

    struct Detach;

    impl AfterDeleteVolume for Detach {
        fn name(&self) -> &'static str {
            "detach"
        }

        fn after_delete_volume(
            &self,
            deletion: &mut VolumeDeletion<'_>,
            volume: &Volume,
        ) -> Result<(), StoreError> {
            deletion.detach_from_merges(volume.id);
            Ok(())
        }
    }

    struct Refuse;

    impl AfterDeleteVolume for Refuse {
        fn name(&self) -> &'static str {
            "refuse"
        }

        fn after_delete_volume(
            &self,
            _deletion: &mut VolumeDeletion<'_>,
            volume: &Volume,
        ) -> Result<(), StoreError> {
            Err(StoreError::InvalidVolume(format!("{} is pinned", volume.uuid)))
        }
    }

    struct FailingBackend;

    impl StoreBackend for FailingBackend {
        fn load(&self) -> Result<Document, StoreError> {
            Ok(Document::default())
        }

        fn save(&self, _document: &Document) -> Result<(), StoreError> {
            Err(StoreError::Io {
                path: "/dev/full".to_string(),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    #[test]
    fn upsert_by_uuid_never_duplicates() {
        let store = Store::in_memory();
        let first = store
            .upsert_volume(new_volume("uuid-a", "/dev/sdb1", "/mnt/a"))
            .expect("insert");

        let refreshed = store
            .upsert_volume(NewVolume {
                uuid: "uuid-a".to_string(),
                path: "/dev/sdc1".to_string(),
                bus: "usb".to_string(),
                ..NewVolume::default()
            })
            .expect("refresh");

        assert_eq!(refreshed.id, first.id);
        assert_eq!(refreshed.path, "/dev/sdc1");
        assert_eq!(refreshed.mount_point, "/mnt/a");
        assert_eq!(refreshed.bus, "usb");
        assert_eq!(store.list_volumes().len(), 1);
    }

    #[test]
    fn new_volume_needs_uuid_and_mount_point() {
        let store = Store::in_memory();
        assert!(matches!(
            store.upsert_volume(new_volume("", "/dev/sdb1", "/mnt/a")),
            Err(StoreError::InvalidVolume(_))
        ));
        assert!(matches!(
            store.upsert_volume(NewVolume {
                uuid: "uuid-a".to_string(),
                ..NewVolume::default()
            }),
            Err(StoreError::InvalidVolume(_))
        ));
    }

    #[test]
    fn volume_mount_points_are_stored_normalized() {
        let store = Store::in_memory();
        let volume = store
            .upsert_volume(new_volume("uuid-a", "/dev/sdb1", "/mnt//a/"))
            .expect("insert");
        assert_eq!(volume.mount_point, "/mnt/a");

        let moved = store
            .update_volume_mount_point("uuid-a", "/mnt/b/./")
            .expect("update");
        assert_eq!(moved.mount_point, "/mnt/b");

        assert!(matches!(
            store.update_volume_mount_point("uuid-a", "mnt/c"),
            Err(StoreError::InvalidVolume(_))
        ));
        assert!(matches!(
            store.upsert_volume(new_volume("uuid-b", "/dev/sdc1", "relative")),
            Err(StoreError::InvalidVolume(_))
        ));
    }

    #[test]
    fn cascade_removes_volume_from_every_merge_in_order() {
        let store = Store::in_memory();
        store.register_after_delete_volume(Arc::new(Detach));

        let a = store.upsert_volume(new_volume("a", "/dev/sdb1", "/mnt/a")).expect("a");
        let b = store.upsert_volume(new_volume("b", "/dev/sdc1", "/mnt/b")).expect("b");
        let c = store.upsert_volume(new_volume("c", "/dev/sdd1", "/mnt/c")).expect("c");

        store.create_merge(new_merge("/m1", vec![a.id, b.id, c.id])).expect("m1");
        store.create_merge(new_merge("/m2", vec![b.id, a.id])).expect("m2");
        store.create_merge(new_merge("/m3", vec![c.id])).expect("m3");

        store.delete_volume(b.id).expect("delete");

        let ids = |mp: &str| store.find_merge(mp).expect("merge").source_volume_ids();
        assert_eq!(ids("/m1"), vec![a.id, c.id]);
        assert_eq!(ids("/m2"), vec![a.id]);
        assert_eq!(ids("/m3"), vec![c.id]);
        assert!(store.get_volume(b.id).is_err());
    }

    #[test]
    fn failing_observer_rolls_the_deletion_back() {
        let store = Store::in_memory();
        store.register_after_delete_volume(Arc::new(Detach));
        store.register_after_delete_volume(Arc::new(Refuse));

        let a = store.upsert_volume(new_volume("a", "/dev/sdb1", "/mnt/a")).expect("a");
        store.create_merge(new_merge("/m1", vec![a.id])).expect("m1");

        let err = store.delete_volume(a.id).expect_err("deletion must fail");
        assert!(matches!(err, StoreError::HookFailed { hook: "refuse", .. }));

        assert!(store.get_volume(a.id).is_ok());
        assert_eq!(
            store.find_merge("/m1").expect("merge").source_volume_ids(),
            vec![a.id]
        );
    }

    #[test]
    fn stores_sharing_a_file_see_each_others_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("local-storage.json");
        let daemon = Store::open(Box::new(JsonFileBackend::new(&path))).expect("daemon");
        let cli = Store::open(Box::new(JsonFileBackend::new(&path))).expect("cli");

        daemon
            .upsert_volume(new_volume("a", "/dev/sdb1", "/mnt/a"))
            .expect("daemon write");
        let b = cli
            .upsert_volume(new_volume("b", "/dev/sdc1", "/mnt/b"))
            .expect("cli write");
        cli.create_merge(new_merge("/DATA", vec![b.id])).expect("cli merge");

        assert_eq!(daemon.list_volumes().len(), 2);
        assert_eq!(
            daemon.find_merge("/DATA").expect("merge").source_volume_ids(),
            vec![b.id]
        );

        daemon
            .update_volume_path("a", "/dev/sdd1")
            .expect("daemon update");
        assert_eq!(cli.list_volumes().len(), 2);
        assert!(cli.find_merge("/DATA").is_some());
        assert_eq!(b.id, 2);
    }

    #[test]
    fn failed_save_restores_previous_document() {
        let store = Store::open(Box::new(FailingBackend)).expect("open");
        assert!(store.upsert_volume(new_volume("a", "/dev/sdb1", "/mnt/a")).is_err());
        assert!(store.list_volumes().is_empty());
    }

    #[test]
    fn merges_are_unique_per_mount_point() {
        let store = Store::in_memory();
        store.create_merge(new_merge("/DATA", vec![])).expect("first");

        assert!(matches!(
            store.create_merge(new_merge("/DATA", vec![])),
            Err(StoreError::MergeExists(_))
        ));
        assert!(matches!(
            store.create_merge(new_merge("/OTHER", vec![42])),
            Err(StoreError::VolumeNotFound(_))
        ));
        assert_eq!(store.list_merges(None).len(), 1);
        assert_eq!(store.list_merges(Some("/OTHER")).len(), 0);
    }

    #[test]
    fn merge_sources_are_replaced_and_deleted() {
        let store = Store::in_memory();
        let a = store.upsert_volume(new_volume("a", "/dev/sdb1", "/mnt/a")).expect("a");
        let b = store.upsert_volume(new_volume("b", "/dev/sdc1", "/mnt/b")).expect("b");
        store.create_merge(new_merge("/DATA", vec![a.id])).expect("create");

        let updated = store
            .update_merge_sources("/DATA", vec![b.id, a.id])
            .expect("update");
        assert_eq!(updated.expected_sources()[1..], ["/mnt/b", "/mnt/a"]);

        assert!(matches!(
            store.update_merge_sources("/NOPE", vec![]),
            Err(StoreError::MergeNotFound(_))
        ));

        store.delete_merge("/DATA").expect("delete");
        assert!(store.find_merge("/DATA").is_none());
    }
}
