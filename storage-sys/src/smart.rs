// SPDX-License-Identifier: GPL-3.0-only

//! SMART monitoring through `smartctl(8)`

use std::path::PathBuf;

use tracing::{debug, info};

use crate::command::{find_tool, run_capture};
use crate::{Result, SysError};

pub struct SmartCtl {
    binary_path: PathBuf,
}

impl SmartCtl {
    pub fn new() -> Result<Self> {
        let binary_path = find_tool("smartctl")?;
        info!("Found smartctl binary at {:?}", binary_path);
        Ok(Self { binary_path })
    }

    /// Turn on SMART data collection for a whole disk (`/dev/sdb`).
    pub async fn enable(&self, device_path: &str) -> Result<()> {
        if !device_path.starts_with("/dev/") {
            return Err(SysError::NotFound(format!(
                "not a device node: {device_path}"
            )));
        }
        run_capture(&self.binary_path, &smart_on_args(device_path)).await?;
        debug!("SMART enabled on {}", device_path);
        Ok(())
    }
}

fn smart_on_args(device_path: &str) -> [&str; 2] {
    ["--smart=on", device_path]
}
