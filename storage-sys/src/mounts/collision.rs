// SPDX-License-Identifier: GPL-3.0-only

//! Mount point collision resolution

use std::fs;
use std::path::Path;

use super::mountinfo::is_mount_point;
use crate::Result;

/// Upper bound on numeric suffixes tried before giving up.
pub const MAX_COLLISION_SUFFIX: u32 = 1024;

/// Whether `path` may receive a new mount: it is missing, or an empty
/// directory that is not already a mount point.
pub fn mount_point_available(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    if !path.is_dir() || is_mount_point(path)? {
        return Ok(false);
    }
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Candidate paths in probing order: `preferred`, `preferred1`, `preferred2`, ...
///
/// The suffix is appended to the final path component verbatim, so
/// `/mnt/disk1` is followed by `/mnt/disk11`.
pub fn collision_candidates(preferred: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(preferred.to_string())
        .chain((1..=MAX_COLLISION_SUFFIX).map(move |suffix| format!("{preferred}{suffix}")))
}
