// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for local storage management
//!
//! Everything here talks to the OS directly:
//! - mount table reads and mount/unmount calls
//! - mergerfs control through extended attributes
//! - block device discovery through lsblk
//! - SMART enablement through smartctl
//! - kernel hotplug notifications over netlink
//!
//! External tools run on `tokio::process` and are killed when their future
//! is dropped. Syscall wrappers block; async callers move them onto a
//! blocking thread.

mod command;
pub mod error;
pub mod helper;
pub mod lsblk;
pub mod mergerfs;
pub mod mounts;
pub mod smart;
pub mod uevent;

pub use command::find_tool;
pub use error::{Result, SysError};
pub use helper::HelperScript;
pub use lsblk::LsblkCli;
pub use mergerfs::MergerFsCli;
pub use mounts::{
    MAX_COLLISION_SUFFIX, collision_candidates, is_mount_point, list_mounts, mount, mount_disk,
    mount_point_available, unmount,
};
pub use smart::SmartCtl;
pub use uevent::{UEventSocket, UEventSource, parse_uevent};
