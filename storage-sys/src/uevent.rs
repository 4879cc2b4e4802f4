// SPDX-License-Identifier: GPL-3.0-only

//! Kernel hotplug notifications over `NETLINK_KOBJECT_UEVENT`
//!
//! Two multicast groups carry block device events: the raw kernel group
//! (`action@devpath\0KEY=VALUE\0...`) and the udev group, which rebroadcasts
//! the kernel event enriched with `ID_*` properties behind a `libudev`
//! header. The udev group is the default since it carries `ID_FS_UUID`,
//! `ID_VENDOR` and friends.

use std::io;
use std::time::Duration;

use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_KOBJECT_UEVENT};
use storage_types::UEvent;
use tracing::{debug, info};

use crate::{Result, SysError};

const RECV_BUFFER_SIZE: usize = 64 * 1024;

const UDEV_PREFIX: &[u8] = b"libudev\0";
const UDEV_MAGIC: u32 = 0xfeed_cafe;
const UDEV_HEADER_SIZE: usize = 40;

/// Netlink multicast group to subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UEventSource {
    Kernel,
    Udev,
}

impl UEventSource {
    fn group(self) -> u32 {
        match self {
            Self::Kernel => 1,
            Self::Udev => 2,
        }
    }
}

/// Netlink socket delivering parsed hotplug notifications
pub struct UEventSocket {
    socket: Socket,
    source: UEventSource,
    poll_interval: Duration,
}

impl UEventSocket {
    /// Open and bind the socket. `poll_interval` bounds every
    /// [`UEventSocket::receive`] call so callers can observe shutdown.
    pub fn open(source: UEventSource, poll_interval: Duration) -> Result<Self> {
        let mut socket = Socket::new(NETLINK_KOBJECT_UEVENT)
            .map_err(|e| socket_error("socket(NETLINK_KOBJECT_UEVENT)", e))?;
        socket
            .bind(&SocketAddr::new(0, source.group()))
            .map_err(|e| socket_error("bind(NETLINK_KOBJECT_UEVENT)", e))?;
        socket
            .set_non_blocking(true)
            .map_err(|e| socket_error("set_non_blocking", e))?;

        info!("Listening for {:?} uevents", source);
        Ok(Self {
            socket,
            source,
            poll_interval,
        })
    }

    pub fn source(&self) -> UEventSource {
        self.source
    }

    /// Wait for the next notification.
    ///
    /// Returns `Ok(None)` when nothing arrived within the poll interval or
    /// a datagram cannot be parsed.
    pub fn receive(&self) -> Result<Option<UEvent>> {
        let mut buffer = Vec::with_capacity(RECV_BUFFER_SIZE);
        let mut waited = false;
        loop {
            buffer.clear();
            match self.socket.recv(&mut buffer, 0) {
                Ok(read) => {
                    let event = parse_uevent(&buffer[..read]);
                    if event.is_none() {
                        debug!("Dropping unparseable uevent datagram ({} bytes)", read);
                    }
                    return Ok(event);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if waited {
                        return Ok(None);
                    }
                    std::thread::sleep(self.poll_interval);
                    waited = true;
                }
                Err(e) => return Err(SysError::Io(e)),
            }
        }
    }
}

fn socket_error(context: &str, err: io::Error) -> SysError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => SysError::PermissionDenied(format!("{context}: {err}")),
        _ => SysError::OperationFailed(format!("{context}: {err}")),
    }
}

/// Decode a uevent datagram from either the kernel or the udev group.
pub fn parse_uevent(datagram: &[u8]) -> Option<UEvent> {
    if datagram.starts_with(UDEV_PREFIX) {
        return parse_udev_message(datagram);
    }

    let mut fields = datagram.split(|b| *b == 0).filter(|f| !f.is_empty());
    let summary = std::str::from_utf8(fields.next()?).ok()?;
    let (action, _devpath) = summary.split_once('@')?;

    let mut event = collect_properties(fields);
    if event.action.is_empty() {
        event.action = action.to_string();
    }
    Some(event)
}

fn parse_udev_message(datagram: &[u8]) -> Option<UEvent> {
    if datagram.len() < UDEV_HEADER_SIZE {
        return None;
    }

    let magic = u32::from_be_bytes(datagram[8..12].try_into().ok()?);
    if magic != UDEV_MAGIC {
        return None;
    }

    let offset = u32::from_ne_bytes(datagram[16..20].try_into().ok()?) as usize;
    let length = u32::from_ne_bytes(datagram[20..24].try_into().ok()?) as usize;
    let properties = datagram.get(offset..offset.checked_add(length)?)?;

    let event = collect_properties(properties.split(|b| *b == 0).filter(|f| !f.is_empty()));
    (!event.action.is_empty()).then_some(event)
}

fn collect_properties<'a>(fields: impl Iterator<Item = &'a [u8]>) -> UEvent {
    let mut event = UEvent::default();
    for field in fields {
        let Ok(text) = std::str::from_utf8(field) else {
            continue;
        };
        let Some((key, value)) = text.split_once('=') else {
            continue;
        };
        if key == "ACTION" {
            event.action = value.to_string();
        }
        event.env.insert(key.to_string(), value.to_string());
    }
    event
}
