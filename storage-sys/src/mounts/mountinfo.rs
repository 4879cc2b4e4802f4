// SPDX-License-Identifier: GPL-3.0-only

//! `/proc/self/mountinfo` parsing

use std::fs;
use std::path::Path;

use storage_types::{Mount, MountFilter};

use crate::{Result, SysError};

const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Read the live mount table, keeping entries that match `filter`.
pub fn list_mounts(filter: &MountFilter) -> Result<Vec<Mount>> {
    let mount_info = fs::read_to_string(MOUNTINFO_PATH)?;
    let mut mounts = parse_mountinfo(&mount_info)?;
    mounts.retain(|mount| filter.matches(mount));
    Ok(mounts)
}

/// Whether `path` is currently a mount point.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let target = canonical.to_string_lossy();
    let mounts = list_mounts(&MountFilter::at(target.as_ref()))?;
    Ok(!mounts.is_empty())
}

pub fn parse_mountinfo(input: &str) -> Result<Vec<Mount>> {
    let mut mounts = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let (left, right) = line
            .split_once(" - ")
            .ok_or_else(|| SysError::InvalidOutput(format!("invalid mountinfo line: {line}")))?;

        let mut left_fields = left.split_whitespace();
        let mount_point = left_fields
            .nth(4)
            .ok_or_else(|| SysError::InvalidOutput(format!("invalid mountinfo line: {line}")))?;
        let options = left_fields.next().unwrap_or_default();

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields
            .next()
            .ok_or_else(|| SysError::InvalidOutput(format!("invalid mountinfo line: {line}")))?;
        let source = right_fields.next().unwrap_or("none");

        mounts.push(Mount {
            mount_point: unescape_mount_field(mount_point),
            source: unescape_mount_field(source),
            fs_type: fs_type.to_string(),
            options: options.to_string(),
        });
    }

    Ok(mounts)
}

/// Unescape octal sequences used by the kernel for whitespace (e.g. `\040` -> ` `)
pub(crate) fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num);
            index += 4;
            continue;
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
