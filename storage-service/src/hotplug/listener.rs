// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use storage_contracts::{BlockDeviceDiscovery, EventPublisher, StorageError};
use storage_sys::{UEventSocket, UEventSource};
use storage_types::{DeviceAction, DeviceType, Event, UEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::adapt;
use crate::error::from_sys;
use crate::store::Store;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CHANNEL_CAPACITY: usize = 256;

/// Reads uevents on a dedicated thread and publishes them from an async pump.
pub struct HotplugListener {
    store: Arc<Store>,
    discovery: Arc<dyn BlockDeviceDiscovery>,
    publisher: Arc<dyn EventPublisher>,
    source: UEventSource,
}

pub struct HotplugHandle {
    reader: thread::JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl HotplugListener {
    pub fn new(
        store: Arc<Store>,
        discovery: Arc<dyn BlockDeviceDiscovery>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            discovery,
            publisher,
            source: UEventSource::Udev,
        }
    }

    /// Open the netlink socket and start both halves. Both stop once
    /// `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> Result<HotplugHandle, StorageError> {
        let socket = UEventSocket::open(self.source, POLL_INTERVAL).map_err(from_sys)?;
        let (sender, mut receiver) = mpsc::channel::<UEvent>(CHANNEL_CAPACITY);

        let reader_cancel = cancel.clone();
        let reader = thread::Builder::new()
            .name("uevent-reader".to_string())
            .spawn(move || read_loop(socket, sender, reader_cancel))
            .map_err(|e| StorageError::internal(format!("cannot start uevent reader: {e}")))?;

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    uevent = receiver.recv() => {
                        let Some(uevent) = uevent else { break };
                        handle_uevent(
                            &self.store,
                            self.discovery.as_ref(),
                            self.publisher.as_ref(),
                            &uevent,
                        );
                    }
                }
            }
            debug!("Hotplug event pump stopped");
        });

        info!("Listening for block device hotplug events");
        Ok(HotplugHandle { reader, pump })
    }
}

impl HotplugHandle {
    pub async fn join(self) {
        if let Err(e) = self.pump.await {
            warn!("Hotplug event pump ended abnormally: {}", e);
        }
        let reader = self.reader;
        match tokio::task::spawn_blocking(move || reader.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("uevent reader thread panicked"),
            Err(e) => warn!("Failed to join uevent reader: {}", e),
        }
    }
}

fn read_loop(socket: UEventSocket, sender: mpsc::Sender<UEvent>, cancel: CancellationToken) {
    while !cancel.is_cancelled() {
        match socket.receive() {
            Ok(Some(uevent)) => {
                if sender.blocking_send(uevent).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("uevent receive failed: {}", e);
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
    debug!("uevent reader stopped");
}

/// Adapt and publish one notification. A partition that shows up under a
/// new device node has its recorded path refreshed first.
pub fn handle_uevent(
    store: &Store,
    discovery: &dyn BlockDeviceDiscovery,
    publisher: &dyn EventPublisher,
    uevent: &UEvent,
) -> Option<Event> {
    let Some(event) = adapt(uevent) else {
        debug!(
            "Ignoring uevent {} for {}",
            uevent.action,
            uevent.devtype().unwrap_or("unknown")
        );
        return None;
    };

    discovery.invalidate_cache();

    if uevent.devtype() == Some(DeviceType::Partition.as_str())
        && uevent.action == DeviceAction::Add.as_str()
        && let (Some(uuid), Some(path)) = (uevent.get("ID_FS_UUID"), uevent.get("DEVNAME"))
        && let Some(volume) = store.find_volume_by_uuid(uuid)
        && volume.path != path
    {
        match store.update_volume_path(uuid, path) {
            Ok(_) => info!("Volume {} is now {} (was {})", uuid, path, volume.path),
            Err(e) => warn!("Failed to record new path {} for volume {}: {}", path, uuid, e),
        }
    }

    publisher.publish(event.clone());
    Some(event)
}
