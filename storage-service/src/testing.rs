// SPDX-License-Identifier: GPL-3.0-only

//! In-process fakes for the system adapters

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use storage_contracts::{
    BlockDeviceDiscovery, EventPublisher, HelperShell, MountOpsAdapter, StorageError,
    UnionFsAdapter,
};
use storage_types::{
    BlockDevice, DEFAULT_MERGE_FS_TYPE, Event, MERGE_SOURCE_SEPARATOR, Mount, MountFilter,
};

#[derive(Default)]
struct FakeState {
    mounts: Vec<Mount>,
    union_sources: HashMap<String, Vec<String>>,
    occupied: HashSet<String>,
    devices: Vec<BlockDevice>,
    calls: Vec<String>,
    mount_failure: Option<StorageError>,
    cache_invalidations: usize,
    cleanups: usize,
    smart_enabled: Vec<String>,
}

/// Simulated mount table, mergerfs control files and block devices.
#[derive(Clone, Default)]
pub struct FakeSystem {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state lock")
    }

    /// Mutating calls in the order they were made (`"mount /DATA"`, ...).
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn occupy(&self, path: &str) {
        self.state().occupied.insert(path.to_string());
    }

    pub fn add_mount(&self, source: &str, mount_point: &str, fs_type: &str) {
        let mut state = self.state();
        state.mounts.push(Mount {
            mount_point: mount_point.to_string(),
            source: source.to_string(),
            fs_type: fs_type.to_string(),
            options: "rw".to_string(),
        });
        state.occupied.insert(mount_point.to_string());
    }

    /// Change the live branch list of a union mount behind the service's back.
    pub fn set_live_sources(&self, mount_point: &str, sources: &[&str]) {
        self.state().union_sources.insert(
            mount_point.to_string(),
            sources.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn live_sources(&self, mount_point: &str) -> Option<Vec<String>> {
        self.state().union_sources.get(mount_point).cloned()
    }

    pub fn fail_mounts_with(&self, error: StorageError) {
        self.state().mount_failure = Some(error);
    }

    pub fn set_devices(&self, devices: Vec<BlockDevice>) {
        self.state().devices = devices;
    }

    pub fn cache_invalidations(&self) -> usize {
        self.state().cache_invalidations
    }

    pub fn cleanups(&self) -> usize {
        self.state().cleanups
    }

    pub fn smart_enabled(&self) -> Vec<String> {
        self.state().smart_enabled.clone()
    }

    pub fn is_mounted(&self, mount_point: &str) -> bool {
        self.state().mounts.iter().any(|m| m.mount_point == mount_point)
    }
}

#[async_trait]
impl MountOpsAdapter for FakeSystem {
    async fn list_mounts(&self, filter: &MountFilter) -> Result<Vec<Mount>, StorageError> {
        Ok(self
            .state()
            .mounts
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    async fn mount(
        &self,
        source: &str,
        mount_point: &str,
        fs_type: &str,
        options: &str,
    ) -> Result<Mount, StorageError> {
        let mut state = self.state();
        state.calls.push(format!("mount {mount_point}"));
        if let Some(error) = state.mount_failure.clone() {
            return Err(error);
        }

        let mount = Mount {
            mount_point: mount_point.to_string(),
            source: source.to_string(),
            fs_type: fs_type.to_string(),
            options: options.to_string(),
        };
        state.mounts.push(mount.clone());
        state.occupied.insert(mount_point.to_string());
        if fs_type == DEFAULT_MERGE_FS_TYPE {
            state.union_sources.insert(
                mount_point.to_string(),
                source.split(MERGE_SOURCE_SEPARATOR).map(str::to_owned).collect(),
            );
        }
        Ok(mount)
    }

    async fn mount_disk(&self, device_path: &str, mount_point: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        state.calls.push(format!("mount_disk {device_path} {mount_point}"));
        if let Some(error) = state.mount_failure.clone() {
            return Err(error);
        }

        state.mounts.push(Mount {
            mount_point: mount_point.to_string(),
            source: device_path.to_string(),
            fs_type: "ext4".to_string(),
            options: "rw,relatime".to_string(),
        });
        state.occupied.insert(mount_point.to_string());
        Ok(())
    }

    async fn unmount(&self, mount_point: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        state.calls.push(format!("unmount {mount_point}"));

        let Some(position) = state.mounts.iter().rposition(|m| m.mount_point == mount_point)
        else {
            return Err(StorageError::not_found(format!("{mount_point} is not mounted")));
        };
        state.mounts.remove(position);
        state.union_sources.remove(mount_point);
        state.occupied.remove(mount_point);
        Ok(())
    }

    async fn mount_point_available(&self, path: &str) -> Result<bool, StorageError> {
        let state = self.state();
        Ok(!state.occupied.contains(path) && !state.mounts.iter().any(|m| m.mount_point == path))
    }
}

#[async_trait]
impl UnionFsAdapter for FakeSystem {
    async fn get_source(&self, mount_point: &str) -> Result<Vec<String>, StorageError> {
        self.live_sources(mount_point)
            .ok_or_else(|| StorageError::not_found(format!("{mount_point} is not a union mount")))
    }

    async fn set_source(&self, mount_point: &str, sources: &[String]) -> Result<(), StorageError> {
        let mut state = self.state();
        state.calls.push(format!("set_source {mount_point}"));
        if !state.union_sources.contains_key(mount_point) {
            return Err(StorageError::not_found(format!(
                "{mount_point} is not a union mount"
            )));
        }
        state
            .union_sources
            .insert(mount_point.to_string(), sources.to_vec());
        Ok(())
    }

    async fn list_values(
        &self,
        mount_point: &str,
    ) -> Result<BTreeMap<String, String>, StorageError> {
        let sources = self.get_source(mount_point).await?;
        Ok(BTreeMap::from([(
            "user.mergerfs.srcmounts".to_string(),
            sources.join(MERGE_SOURCE_SEPARATOR),
        )]))
    }
}

#[async_trait]
impl BlockDeviceDiscovery for FakeSystem {
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>, StorageError> {
        Ok(self.state().devices.clone())
    }

    fn invalidate_cache(&self) {
        self.state().cache_invalidations += 1;
    }
}

#[async_trait]
impl HelperShell for FakeSystem {
    async fn cleanup_unused_dirs(&self) -> Result<(), StorageError> {
        self.state().cleanups += 1;
        Ok(())
    }

    async fn enable_smart(&self, device_path: &str) -> Result<(), StorageError> {
        self.state().smart_enabled.push(device_path.to_string());
        Ok(())
    }
}

/// Remembers every published event.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("publisher lock").clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: Event) {
        self.events.lock().expect("publisher lock").push(event);
    }
}

pub fn disk(name: &str, partitions: Vec<BlockDevice>) -> BlockDevice {
    BlockDevice {
        name: name.to_string(),
        path: format!("/dev/{name}"),
        kind: "disk".to_string(),
        children: partitions,
        ..BlockDevice::default()
    }
}

pub fn partition(name: &str, uuid: &str, mount_point: Option<&str>) -> BlockDevice {
    BlockDevice {
        name: name.to_string(),
        path: format!("/dev/{name}"),
        kind: "part".to_string(),
        uuid: Some(uuid.to_string()),
        fs_type: Some("ext4".to_string()),
        mount_point: mount_point.map(str::to_owned),
        children: Vec::new(),
    }
}
