// SPDX-License-Identifier: GPL-3.0-only

//! Merge (union mount) declarations and their reconciliation against the
//! live mount table

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use storage_contracts::{MountOpsAdapter, StorageError, UnionFsAdapter};
use storage_types::{
    DEFAULT_MERGE_FS_TYPE, Merge, MergeRequest, MergeView, MountFilter, NewMerge, Volume,
    clean_mount_point,
};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StoreError};
use crate::store::{AfterDeleteVolume, Store, VolumeDeletion};

pub const MERGERFS_NOT_ENABLED: &str = "mergerfs is not enabled - either it is not enabled in \
     configuration file, merge point is not empty before mounting, or mergerfs is not installed";

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub mounted: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    InSync,
    Mounted,
    SourcesUpdated,
}

/// Serializes work on the same merge mount point.
#[derive(Default)]
struct MountPointLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MountPointLocks {
    async fn acquire(&self, mount_point: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(mount_point.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// Removes a deleted volume from every merge that references it.
pub struct MergeCascade;

impl AfterDeleteVolume for MergeCascade {
    fn name(&self) -> &'static str {
        "merge-cascade"
    }

    fn after_delete_volume(
        &self,
        deletion: &mut VolumeDeletion<'_>,
        volume: &Volume,
    ) -> std::result::Result<(), StoreError> {
        let referencing = deletion.merges_referencing(volume.id);
        if referencing.is_empty() {
            return Ok(());
        }

        info!(
            "Detaching volume {} from merges: {}",
            volume.uuid,
            referencing.join(", ")
        );
        deletion.detach_from_merges(volume.id);
        Ok(())
    }
}

pub struct MergeService {
    store: Arc<Store>,
    mounts: Arc<dyn MountOpsAdapter>,
    union: Option<Arc<dyn UnionFsAdapter>>,
    merge_options: String,
    locks: MountPointLocks,
}

impl MergeService {
    /// `union` is `None` when mergerfs is disabled or not installed.
    pub fn new(
        store: Arc<Store>,
        mounts: Arc<dyn MountOpsAdapter>,
        union: Option<Arc<dyn UnionFsAdapter>>,
        merge_options: impl Into<String>,
    ) -> Self {
        Self {
            store,
            mounts,
            union,
            merge_options: merge_options.into(),
            locks: MountPointLocks::default(),
        }
    }

    fn union(&self) -> Result<&Arc<dyn UnionFsAdapter>> {
        self.union
            .as_ref()
            .ok_or_else(|| StorageError::unavailable(MERGERFS_NOT_ENABLED))
    }

    pub fn list(&self, mount_point: Option<&str>) -> Result<Vec<MergeView>> {
        self.union()?;
        let mount_point = mount_point
            .map(|mp| absolute_path("mount point", mp))
            .transpose()?;
        Ok(self
            .store
            .list_merges(mount_point.as_deref())
            .iter()
            .map(MergeView::from)
            .collect())
    }

    /// Paths are normalized first, so `/DATA/` and `/DATA` name one merge.
    pub async fn create(&self, request: MergeRequest) -> Result<MergeView> {
        self.union()?;
        let mount_point = absolute_path("mount point", &request.mount_point)?;
        let source_base_path = absolute_path("source base path", &request.source_base_path)?;

        let fs_type = request
            .fs_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_MERGE_FS_TYPE.to_string());
        let volumes =
            self.resolve_volume_paths(request.source_volume_paths.as_deref().unwrap_or_default())?;

        let _guard = self.locks.acquire(&mount_point).await;

        if self.store.find_merge(&mount_point).is_some() {
            return Err(StoreError::MergeExists(mount_point).into());
        }

        create_dir(&source_base_path).await?;

        // Not persisted yet; the id is assigned by the store.
        let now = Utc::now();
        let pending = Merge {
            id: 0,
            fs_type,
            mount_point,
            source_base_path,
            source_volumes: volumes,
            created_at: now,
            updated_at: now,
        };
        self.mount_merge(&pending).await?;

        let declared = NewMerge {
            fs_type: pending.fs_type.clone(),
            mount_point: pending.mount_point.clone(),
            source_base_path: pending.source_base_path.clone(),
            source_volume_ids: pending.source_volume_ids(),
        };
        let mount_point = pending.mount_point;
        match self.store.create_merge(declared) {
            Ok(created) => {
                info!("Created merge at {}", created.mount_point);
                Ok(MergeView::from(&created))
            }
            Err(e) => {
                warn!("Persisting merge at {} failed, unmounting: {}", mount_point, e);
                if let Err(unmount_error) = self.mounts.unmount(&mount_point).await {
                    error!(
                        "Rolling back merge mount at {} failed: {}",
                        mount_point, unmount_error
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Replace the source volumes of a declared merge and apply them to the
    /// live mount.
    pub async fn update(
        &self,
        mount_point: &str,
        source_volume_paths: &[String],
    ) -> Result<MergeView> {
        let union = self.union()?;
        let mount_point = absolute_path("mount point", mount_point)?;
        let volumes = self.resolve_volume_paths(source_volume_paths)?;

        let _guard = self.locks.acquire(&mount_point).await;

        let merge = self
            .store
            .find_merge(&mount_point)
            .ok_or_else(|| StoreError::MergeNotFound(mount_point.clone()))?;
        let merge = Merge {
            source_volumes: volumes,
            ..merge
        };

        if union.list_values(&mount_point).await.is_err() {
            self.mount_merge(&merge).await?;
        } else {
            union
                .set_source(&mount_point, &merge.expected_sources())
                .await?;
        }

        let updated = self
            .store
            .update_merge_sources(&mount_point, merge.source_volume_ids())?;
        info!("Updated sources of merge at {}", mount_point);
        Ok(MergeView::from(&updated))
    }

    pub async fn delete(&self, mount_point: &str) -> Result<MergeView> {
        let union = self.union()?;
        let mount_point = absolute_path("mount point", mount_point)?;
        let _guard = self.locks.acquire(&mount_point).await;

        if self.store.find_merge(&mount_point).is_none() {
            return Err(StoreError::MergeNotFound(mount_point).into());
        }

        if union.list_values(&mount_point).await.is_ok() {
            self.mounts.unmount(&mount_point).await?;
        }

        let removed = self.store.delete_merge(&mount_point)?;
        Ok(MergeView::from(&removed))
    }

    /// One pass over every declared merge. Failures are counted and logged;
    /// the pass always visits every merge.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let Some(union) = self.union.as_ref() else {
            debug!("mergerfs disabled, skipping merge reconciliation");
            return report;
        };

        for merge in self.store.list_merges(None) {
            report.checked += 1;
            let _guard = self.locks.acquire(&merge.mount_point).await;

            // Re-read under the lock: the merge may have changed or vanished.
            let Some(merge) = self.store.find_merge(&merge.mount_point) else {
                continue;
            };

            match self.reconcile_one(union.as_ref(), &merge).await {
                Ok(Repair::InSync) => debug!("Merge at {} is in sync", merge.mount_point),
                Ok(Repair::Mounted) => report.mounted += 1,
                Ok(Repair::SourcesUpdated) => report.updated += 1,
                Err(e) => {
                    error!("Failed to reconcile merge at {}: {}", merge.mount_point, e);
                    report.failed += 1;
                }
            }
        }

        if report.mounted + report.updated + report.failed > 0 {
            info!(
                "Merge reconciliation: {} checked, {} mounted, {} updated, {} failed",
                report.checked, report.mounted, report.updated, report.failed
            );
        }
        report
    }

    async fn reconcile_one(&self, union: &dyn UnionFsAdapter, merge: &Merge) -> Result<Repair> {
        let expected = merge.expected_sources();
        let live = self
            .mounts
            .list_mounts(&MountFilter::at(merge.mount_point.as_str()))
            .await?;

        if !live.iter().any(|m| m.fs_type == merge.fs_type) {
            if let Some(other) = live.last() {
                warn!(
                    "{} is mounted as {} instead of {}",
                    merge.mount_point, other.fs_type, merge.fs_type
                );
            }
            info!("Merge at {} not mounted, mounting", merge.mount_point);
            self.mount_merge(merge).await?;
            return Ok(Repair::Mounted);
        }

        if let Err(e) = union.list_values(&merge.mount_point).await {
            info!(
                "{} does not answer as a union mount ({}), remounting",
                merge.mount_point, e
            );
            self.mount_merge(merge).await?;
            return Ok(Repair::Mounted);
        }

        let current = union.get_source(&merge.mount_point).await?;
        if current == expected {
            return Ok(Repair::InSync);
        }

        info!(
            "Merge sources at {} drifted: live [{}], expected [{}]",
            merge.mount_point,
            current.join(", "),
            expected.join(", ")
        );
        union.set_source(&merge.mount_point, &expected).await?;
        Ok(Repair::SourcesUpdated)
    }

    async fn mount_merge(&self, merge: &Merge) -> Result<()> {
        self.mounts
            .mount(
                &merge.source_string(),
                &merge.mount_point,
                &merge.fs_type,
                &self.merge_options,
            )
            .await?;
        Ok(())
    }

    fn resolve_volume_paths(&self, paths: &[String]) -> Result<Vec<Volume>> {
        let known = self.store.list_volumes();
        paths
            .iter()
            .map(|path| {
                known.iter().find(|v| &v.path == path).cloned().ok_or_else(|| {
                    StorageError::conflict(format!(
                        "volume {path} not found, or it is not a known storage volume"
                    ))
                })
            })
            .collect()
    }
}

fn absolute_path(what: &str, path: &str) -> Result<String> {
    clean_mount_point(path).ok_or_else(|| {
        StorageError::invalid_input(format!("{what} must be an absolute path, got {path:?}"))
    })
}

async fn create_dir(path: &str) -> Result<()> {
    tokio::fs::create_dir_all(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            StorageError::permission_denied(format!("cannot create {path}: {e}"))
        }
        _ => StorageError::internal(format!("cannot create {path}: {e}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSystem;
    use std::path::Path;
    use storage_contracts::StorageErrorKind;
    use storage_types::NewVolume;

    struct Fixture {
        system: FakeSystem,
        store: Arc<Store>,
        service: MergeService,
        base: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let system = FakeSystem::new();
            let store = Arc::new(Store::in_memory());
            store.register_after_delete_volume(Arc::new(MergeCascade));
            let service = MergeService::new(
                store.clone(),
                Arc::new(system.clone()),
                Some(Arc::new(system.clone())),
                "defaults,allow_other",
            );
            Self {
                system,
                store,
                service,
                base: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn base_path(&self) -> String {
            self.base.path().join("merge1").display().to_string()
        }

        fn volume(&self, uuid: &str, path: &str, mount_point: &str) -> Volume {
            self.store
                .upsert_volume(NewVolume {
                    uuid: uuid.to_string(),
                    path: path.to_string(),
                    mount_point: Some(mount_point.to_string()),
                    ..NewVolume::default()
                })
                .expect("volume")
        }

        fn request(&self, mount_point: &str, paths: &[&str]) -> MergeRequest {
            MergeRequest {
                fs_type: None,
                mount_point: mount_point.to_string(),
                source_base_path: self.base_path(),
                source_volume_paths: Some(paths.iter().map(|p| p.to_string()).collect()),
            }
        }
    }

    #[tokio::test]
    async fn create_mounts_then_persists() {
        let fx = Fixture::new();
        fx.volume("a", "/dev/sdb1", "/mnt/v1");
        fx.volume("b", "/dev/sdc1", "/mnt/v2");

        let view = fx
            .service
            .create(fx.request("/DATA", &["/dev/sdb1", "/dev/sdc1"]))
            .await
            .expect("create");

        assert_eq!(view.fs_type, DEFAULT_MERGE_FS_TYPE);
        assert_eq!(view.source_volume_paths, vec!["/dev/sdb1", "/dev/sdc1"]);
        assert!(Path::new(&fx.base_path()).is_dir());
        assert_eq!(
            fx.system.live_sources("/DATA").expect("mounted"),
            vec![fx.base_path(), "/mnt/v1".to_string(), "/mnt/v2".to_string()]
        );
        assert_eq!(fx.service.list(None).expect("list").len(), 1);
    }

    #[tokio::test]
    async fn duplicate_mount_point_conflicts_without_mounting() {
        let fx = Fixture::new();
        fx.service
            .create(fx.request("/DATA", &[]))
            .await
            .expect("first");
        fx.system.clear_calls();

        let err = fx
            .service
            .create(fx.request("/DATA", &[]))
            .await
            .expect_err("duplicate");
        assert!(err.is(StorageErrorKind::Conflict));
        assert!(fx.system.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_source_volume_conflicts_before_any_mount() {
        let fx = Fixture::new();
        let err = fx
            .service
            .create(fx.request("/DATA", &["/dev/sdz9"]))
            .await
            .expect_err("unknown volume");
        assert!(err.is(StorageErrorKind::Conflict));
        assert!(fx.system.calls().is_empty());
        assert!(fx.store.find_merge("/DATA").is_none());
    }

    #[tokio::test]
    async fn relative_paths_are_rejected() {
        let fx = Fixture::new();
        let mut request = fx.request("DATA", &[]);
        assert!(
            fx.service
                .create(request.clone())
                .await
                .expect_err("relative mount point")
                .is(StorageErrorKind::InvalidInput)
        );

        request.mount_point = "/DATA".to_string();
        request.source_base_path = "merge".to_string();
        assert!(
            fx.service
                .create(request)
                .await
                .expect_err("relative base")
                .is(StorageErrorKind::InvalidInput)
        );
    }

    #[tokio::test]
    async fn trailing_slash_names_the_same_merge() {
        let fx = Fixture::new();
        fx.volume("a", "/dev/sdb1", "/mnt/v1");
        fx.service
            .create(fx.request("/DATA", &[]))
            .await
            .expect("create");
        fx.system.clear_calls();

        let err = fx
            .service
            .create(fx.request("/DATA/", &[]))
            .await
            .expect_err("same mount point");
        assert!(err.is(StorageErrorKind::Conflict));
        assert!(fx.system.calls().is_empty());

        assert_eq!(fx.service.list(Some("/DATA/")).expect("list").len(), 1);
        fx.service
            .update("//DATA/", &["/dev/sdb1".to_string()])
            .await
            .expect("update");
        fx.service.delete("/DATA/.").await.expect("delete");
        assert!(fx.store.find_merge("/DATA").is_none());
    }

    #[tokio::test]
    async fn mount_permission_failure_is_reported_and_nothing_persisted() {
        let fx = Fixture::new();
        fx.system
            .fail_mounts_with(StorageError::permission_denied("fuse: only root"));

        let err = fx
            .service
            .create(fx.request("/DATA", &[]))
            .await
            .expect_err("permission");
        assert!(err.is(StorageErrorKind::PermissionDenied));
        assert!(fx.store.find_merge("/DATA").is_none());
    }

    #[tokio::test]
    async fn disabled_mergerfs_is_unavailable() {
        let store = Arc::new(Store::in_memory());
        let service = MergeService::new(store, Arc::new(FakeSystem::new()), None, "");

        let err = service.list(None).expect_err("disabled");
        assert!(err.is(StorageErrorKind::Unavailable));
        assert_eq!(err.kind.code(), 503);
        assert_eq!(service.reconcile().await, ReconcileReport::default());
    }

    #[tokio::test]
    async fn reconcile_mounts_missing_merges_once() {
        let fx = Fixture::new();
        let v1 = fx.volume("a", "/dev/sdb1", "/mnt/v1");
        fx.store
            .create_merge(NewMerge {
                fs_type: DEFAULT_MERGE_FS_TYPE.to_string(),
                mount_point: "/DATA".to_string(),
                source_base_path: "/data/merge1".to_string(),
                source_volume_ids: vec![v1.id],
            })
            .expect("declare");

        let first = fx.service.reconcile().await;
        assert_eq!(first.checked, 1);
        assert_eq!(first.mounted, 1);
        assert_eq!(fx.system.calls(), vec!["mount /DATA"]);

        fx.system.clear_calls();
        let second = fx.service.reconcile().await;
        assert_eq!(second.mounted + second.updated + second.failed, 0);
        assert!(fx.system.calls().is_empty());
    }

    #[tokio::test]
    async fn reconcile_restores_source_order() {
        let fx = Fixture::new();
        let v1 = fx.volume("a", "/dev/sdb1", "/mnt/v1");
        let v2 = fx.volume("b", "/dev/sdc1", "/mnt/v2");
        fx.store
            .create_merge(NewMerge {
                fs_type: DEFAULT_MERGE_FS_TYPE.to_string(),
                mount_point: "/DATA".to_string(),
                source_base_path: "/data/merge1".to_string(),
                source_volume_ids: vec![v1.id, v2.id],
            })
            .expect("declare");

        fx.system
            .add_mount("/data/merge1:/mnt/v2:/mnt/v1", "/DATA", DEFAULT_MERGE_FS_TYPE);
        fx.system
            .set_live_sources("/DATA", &["/data/merge1", "/mnt/v2", "/mnt/v1"]);

        let report = fx.service.reconcile().await;
        assert_eq!(report.updated, 1);
        assert_eq!(fx.system.calls(), vec!["set_source /DATA"]);
        assert_eq!(
            fx.system.live_sources("/DATA").expect("live"),
            vec!["/data/merge1", "/mnt/v1", "/mnt/v2"]
        );
    }

    #[tokio::test]
    async fn reconcile_remounts_wrong_filesystem_type_and_continues_after_failures() {
        let fx = Fixture::new();
        for mount_point in ["/A", "/B"] {
            fx.store
                .create_merge(NewMerge {
                    fs_type: DEFAULT_MERGE_FS_TYPE.to_string(),
                    mount_point: mount_point.to_string(),
                    source_base_path: format!("/data{mount_point}"),
                    source_volume_ids: vec![],
                })
                .expect("declare");
        }
        fx.system.add_mount("/dev/sdb1", "/A", "ext4");
        fx.system.fail_mounts_with(StorageError::timeout("mount hung"));

        let report = fx.service.reconcile().await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(fx.system.calls(), vec!["mount /A", "mount /B"]);
    }

    #[tokio::test]
    async fn update_sets_sources_on_live_mount_and_persists() {
        let fx = Fixture::new();
        fx.volume("a", "/dev/sdb1", "/mnt/v1");
        fx.volume("b", "/dev/sdc1", "/mnt/v2");
        fx.service
            .create(fx.request("/DATA", &["/dev/sdb1"]))
            .await
            .expect("create");
        fx.system.clear_calls();

        let view = fx
            .service
            .update("/DATA", &["/dev/sdc1".to_string(), "/dev/sdb1".to_string()])
            .await
            .expect("update");

        assert_eq!(view.source_volume_paths, vec!["/dev/sdc1", "/dev/sdb1"]);
        assert_eq!(fx.system.calls(), vec!["set_source /DATA"]);

        assert!(
            fx.service
                .update("/NOPE", &[])
                .await
                .expect_err("undeclared")
                .is(StorageErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn delete_unmounts_and_forgets() {
        let fx = Fixture::new();
        fx.service
            .create(fx.request("/DATA", &[]))
            .await
            .expect("create");

        fx.service.delete("/DATA").await.expect("delete");
        assert!(!fx.system.is_mounted("/DATA"));
        assert!(fx.store.find_merge("/DATA").is_none());
        assert!(
            fx.service
                .delete("/DATA")
                .await
                .expect_err("gone")
                .is(StorageErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn deleting_a_volume_then_reconciling_drops_it_from_the_live_mount() {
        let fx = Fixture::new();
        let v1 = fx.volume("a", "/dev/sdb1", "/mnt/v1");
        fx.volume("b", "/dev/sdc1", "/mnt/v2");
        fx.service
            .create(fx.request("/DATA", &["/dev/sdb1", "/dev/sdc1"]))
            .await
            .expect("create");

        fx.store.delete_volume(v1.id).expect("delete volume");
        fx.system.clear_calls();

        let report = fx.service.reconcile().await;
        assert_eq!(report.updated, 1);
        assert_eq!(
            fx.system.live_sources("/DATA").expect("live"),
            vec![fx.base_path(), "/mnt/v2".to_string()]
        );
    }
}
