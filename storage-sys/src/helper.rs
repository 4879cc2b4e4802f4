// SPDX-License-Identifier: GPL-3.0-only

//! Maintenance helper script invocation

use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{find_tool, run_capture};
use crate::{Result, SysError};

pub const HELPER_SCRIPT: &str = "local-storage-helper.sh";
pub const CLEANUP_FUNCTION: &str = "AutoRemoveUnuseDir";

/// Runs functions defined in the helper shell script under `shell_path`
pub struct HelperScript {
    shell: PathBuf,
    script: PathBuf,
}

impl HelperScript {
    pub fn new(shell_path: &Path) -> Result<Self> {
        let shell = find_tool("sh")?;
        let script = shell_path.join(HELPER_SCRIPT);
        if !script.is_file() {
            return Err(SysError::NotFound(format!(
                "helper script {} is missing",
                script.display()
            )));
        }
        Ok(Self { shell, script })
    }

    /// Remove empty mount point directories left behind under `/mnt`.
    pub async fn cleanup_unused_dirs(&self) -> Result<()> {
        info!("Running {} from {}", CLEANUP_FUNCTION, self.script.display());
        let snippet = source_snippet(&self.script, CLEANUP_FUNCTION)?;
        run_capture(&self.shell, &["-c", &snippet]).await?;
        Ok(())
    }
}

fn source_snippet(script: &Path, function: &str) -> Result<String> {
    let script = script
        .to_str()
        .ok_or_else(|| SysError::InvalidOutput(format!("non UTF-8 path: {}", script.display())))?;
    Ok(format!(". '{}'; {}", script.replace('\'', r"'\''"), function))
}
