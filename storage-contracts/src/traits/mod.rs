// SPDX-License-Identifier: GPL-3.0-only

pub mod discovery;
pub mod events;
pub mod maintenance;
pub mod mounts;
pub mod union;

pub use discovery::BlockDeviceDiscovery;
pub use events::EventPublisher;
pub use maintenance::HelperShell;
pub use mounts::MountOpsAdapter;
pub use union::UnionFsAdapter;
