// SPDX-License-Identifier: GPL-3.0-only

//! Mount and unmount operations

use std::fs;
use std::path::Path;

use nix::mount::{MntFlags, umount2};
use storage_types::{Mount, MountFilter};
use tracing::{info, warn};

use super::mountinfo::list_mounts;
use crate::command::{find_tool, render, run_raw};
use crate::{Result, SysError};

/// Exit status `mount(8)` uses for "incorrect invocation or permissions".
const MOUNT_EXIT_USAGE_OR_PERMISSIONS: i32 = 1;
/// Exit status `mount(8)` uses for "mount failure" (helpers such as FUSE report here).
const MOUNT_EXIT_FAILURE: i32 = 32;

const PERMISSION_MARKERS: &[&str] = &[
    "must be superuser",
    "only root",
    "operation not permitted",
    "permission denied",
];

/// Mount `source` at `mount_point` through `mount(8)`, creating the mount
/// point when missing, and return the resulting mount table entry. An empty
/// `fs_type` lets `mount(8)` detect the filesystem.
pub async fn mount(source: &str, mount_point: &str, fs_type: &str, options: &str) -> Result<Mount> {
    info!("Mounting {} ({}) at {}", source, fs_type, mount_point);

    ensure_mount_point_dir(Path::new(mount_point))?;

    run_mount(&mount_args(source, mount_point, fs_type, options)).await?;

    let mounted = list_mounts(&MountFilter::at(mount_point))?;
    mounted.into_iter().next_back().ok_or_else(|| {
        SysError::OperationFailed(format!(
            "mount reported success but {mount_point} is not in the mount table"
        ))
    })
}

/// An empty `fs_type` or `options` is left out of the command line.
fn mount_args<'a>(
    source: &'a str,
    mount_point: &'a str,
    fs_type: &'a str,
    options: &'a str,
) -> Vec<&'a str> {
    let mut args = Vec::with_capacity(6);
    if !fs_type.is_empty() {
        args.extend(["-t", fs_type]);
    }
    if !options.is_empty() {
        args.extend(["-o", options]);
    }
    args.extend([source, mount_point]);
    args
}

/// Mount a block device, letting `mount(8)` detect the filesystem type.
pub async fn mount_disk(device_path: &str, mount_point: &str) -> Result<()> {
    info!("Mounting disk {} at {}", device_path, mount_point);

    ensure_mount_point_dir(Path::new(mount_point))?;
    run_mount(&[device_path, mount_point]).await
}

pub fn unmount(mount_point: &str) -> Result<()> {
    info!("Unmounting {}", mount_point);
    umount2(mount_point, MntFlags::empty())
        .map_err(|errno| SysError::from_errno(errno, format!("umount {mount_point}")))
}

fn ensure_mount_point_dir(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => SysError::PermissionDenied(format!(
            "cannot create mount point {}: {e}",
            path.display()
        )),
        _ => SysError::Io(e),
    })
}

async fn run_mount(args: &[&str]) -> Result<()> {
    let binary = find_tool("mount")?;
    let output = run_raw(&binary, args).await?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    warn!("mount failed: {}", stderr);
    Err(classify_mount_failure(
        render(&binary, args),
        output.status.code(),
        stderr,
    ))
}

/// Map a failed `mount(8)` invocation onto an error kind.
pub(crate) fn classify_mount_failure(
    command: String,
    code: Option<i32>,
    stderr: String,
) -> SysError {
    let lowered = stderr.to_ascii_lowercase();
    let permission_message = PERMISSION_MARKERS.iter().any(|m| lowered.contains(m));
    let permission_status =
        code.is_none_or(|c| c == MOUNT_EXIT_USAGE_OR_PERMISSIONS || c == MOUNT_EXIT_FAILURE);

    if permission_message && permission_status {
        return SysError::PermissionDenied(stderr);
    }

    if lowered.contains("does not exist") || lowered.contains("no such file") {
        return SysError::NotFound(stderr);
    }

    SysError::CommandFailed { command, stderr }
}
