// SPDX-License-Identifier: GPL-3.0-only

//! mergerfs runtime control
//!
//! A live mergerfs mount exposes its settings as extended attributes on
//! the pseudo file `<mount_point>/.mergerfs`. Sources are read and replaced
//! through `getfattr(1)` and `setfattr(1)` without remounting.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use storage_types::MERGE_SOURCE_SEPARATOR;
use tracing::{debug, info};

use crate::command::{find_tool, run_capture};
use crate::mounts::mountinfo::unescape_mount_field;
use crate::{Result, SysError};

/// Name of the control file at the root of every mergerfs mount.
pub const CONTROL_FILE: &str = ".mergerfs";

const ATTRIBUTE_PREFIX: &str = "user.mergerfs.";
const SRCMOUNTS_ATTRIBUTE: &str = "user.mergerfs.srcmounts";

/// Branch mode suffixes mergerfs may attach to a source (`/mnt/a=RW`).
const BRANCH_MODES: &[&str] = &["RW", "RO", "NC"];

/// Wrapper around the extended-attribute tools used to drive mergerfs
pub struct MergerFsCli {
    getfattr: PathBuf,
    setfattr: PathBuf,
}

impl MergerFsCli {
    /// Returns an error if either attr tool is not installed
    pub fn new() -> Result<Self> {
        let getfattr = find_tool("getfattr")?;
        let setfattr = find_tool("setfattr")?;
        info!("Found attr tools at {:?} and {:?}", getfattr, setfattr);
        Ok(Self { getfattr, setfattr })
    }

    pub fn control_file(mount_point: &str) -> PathBuf {
        Path::new(mount_point).join(CONTROL_FILE)
    }

    /// Ordered source directories of the mergerfs mount at `mount_point`.
    pub async fn get_source(&self, mount_point: &str) -> Result<Vec<String>> {
        let control = control_path_arg(mount_point)?;
        let value = run_capture(
            &self.getfattr,
            &[
                "--absolute-names",
                "--only-values",
                "-n",
                SRCMOUNTS_ATTRIBUTE,
                &control,
            ],
        )
        .await?;

        let sources = parse_source_list(&value);
        debug!("{} has {} merge sources", mount_point, sources.len());
        Ok(sources)
    }

    /// Replace the source list of a live mergerfs mount.
    pub async fn set_source(&self, mount_point: &str, sources: &[String]) -> Result<()> {
        if sources.is_empty() {
            return Err(SysError::OperationFailed(format!(
                "refusing to set an empty source list on {mount_point}"
            )));
        }

        let control = control_path_arg(mount_point)?;
        let value = sources.join(MERGE_SOURCE_SEPARATOR);
        info!("Setting merge sources of {} to {}", mount_point, value);

        run_capture(
            &self.setfattr,
            &["-n", SRCMOUNTS_ATTRIBUTE, "-v", &value, &control],
        )
        .await?;
        Ok(())
    }

    /// All `user.mergerfs.*` attributes of the mount, keyed by attribute name.
    ///
    /// Fails when `mount_point` is not a mergerfs mount, which makes this the
    /// cheapest check for "is this a live merge".
    pub async fn list_values(&self, mount_point: &str) -> Result<BTreeMap<String, String>> {
        let control = control_path_arg(mount_point)?;
        let output = run_capture(
            &self.getfattr,
            &[
                "--absolute-names",
                "--dump",
                "--match",
                "^user\\.mergerfs\\.",
                &control,
            ],
        )
        .await?;

        let values = parse_attribute_dump(&output);
        if values.is_empty() {
            return Err(SysError::NotFound(format!(
                "{mount_point} exposes no mergerfs attributes"
            )));
        }
        Ok(values)
    }
}

fn control_path_arg(mount_point: &str) -> Result<String> {
    let control = MergerFsCli::control_file(mount_point);
    control
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| SysError::InvalidOutput(format!("non UTF-8 path: {}", control.display())))
}

/// Split a `srcmounts` value into paths, dropping branch mode suffixes.
pub fn parse_source_list(value: &str) -> Vec<String> {
    value
        .trim()
        .split(MERGE_SOURCE_SEPARATOR)
        .map(strip_branch_mode)
        .filter(|source| !source.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Cut at the first `=` that starts a branch mode (`=RW`, `=NC,minfreespace=1M`).
fn strip_branch_mode(source: &str) -> &str {
    source
        .match_indices('=')
        .map(|(at, _)| at)
        .find(|&at| is_branch_mode(&source[at + 1..]))
        .map_or(source, |at| &source[..at])
}

fn is_branch_mode(suffix: &str) -> bool {
    let mode = suffix.split_once(',').map_or(suffix, |(mode, _)| mode);
    BRANCH_MODES.contains(&mode)
}

/// Parse `getfattr --dump` output (`name="value"` lines, `#` comments).
pub fn parse_attribute_dump(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(name, _)| name.starts_with(ATTRIBUTE_PREFIX))
        .map(|(name, raw)| (name.to_string(), decode_attribute_value(raw)))
        .collect()
}

fn decode_attribute_value(raw: &str) -> String {
    let quoted = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'));
    match quoted {
        Some(inner) => unescape_mount_field(inner),
        None => raw.to_string(),
    }
}
