// SPDX-License-Identifier: GPL-3.0-only

//! Thin helpers for running external tools
//!
//! Children are spawned with `kill_on_drop`, so a caller that stops
//! polling (a timeout, a cancelled task) also stops the tool.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::{Result, SysError};

/// Locate a required binary in PATH.
pub fn find_tool(name: &'static str) -> Result<PathBuf> {
    which::which(name).map_err(|_| SysError::ToolNotFound(name))
}

pub(crate) fn render(program: &Path, args: &[&str]) -> String {
    if args.is_empty() {
        program.display().to_string()
    } else {
        format!("{} {}", program.display(), args.join(" "))
    }
}

/// Run a command to completion without judging its exit status.
pub(crate) async fn run_raw(program: &Path, args: &[&str]) -> Result<Output> {
    debug!("Running {}", render(program, args));
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SysError::CommandFailed {
            command: render(program, args),
            stderr: e.to_string(),
        })
}

/// Run a command and return its stdout, failing on a non-zero exit status.
pub(crate) async fn run_capture(program: &Path, args: &[&str]) -> Result<String> {
    let output = run_raw(program, args).await?;
    if !output.status.success() {
        return Err(SysError::CommandFailed {
            command: render(program, args),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
