// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for local storage management
//!
//! This crate defines the single source of truth for the storage domain types
//! shared by the stack:
//!
//! - **storage-sys**: Produces [`Mount`], [`BlockDevice`] and [`UEvent`] values
//!   from the operating system
//! - **storage-service**: Persists [`Volume`] and [`Merge`] declarations and
//!   publishes [`Event`]s
//!
//! ## Architecture
//!
//! - Persisted: `Volume` (serial disk keyed by filesystem UUID) and `Merge`
//!   (declared union mount referencing volumes by id)
//! - Live: `Mount` and `BlockDevice`, always read from the OS on demand
//! - Transient: `UEvent` (raw kernel notification) and `Event` (normalized)

pub mod device;
pub mod event;
pub mod merge;
pub mod mount;
pub mod volume;

pub use device::{BlockDevice, DeviceAction, DeviceType, UEvent};
pub use event::{Event, EventType, PropertyType};
pub use merge::{
    DEFAULT_MERGE_FS_TYPE, MERGE_SOURCE_SEPARATOR, Merge, MergeRequest, MergeView, NewMerge,
};
pub use mount::{Mount, MountFilter, MountRequest, clean_mount_point};
pub use volume::{NewVolume, Volume, VolumeId};
