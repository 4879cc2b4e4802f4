// SPDX-License-Identifier: GPL-3.0-only

pub mod collision;
pub mod mountinfo;
pub mod ops;

pub use collision::{MAX_COLLISION_SUFFIX, collision_candidates, mount_point_available};
pub use mountinfo::{is_mount_point, list_mounts, parse_mountinfo};
pub use ops::{mount, mount_disk, unmount};
