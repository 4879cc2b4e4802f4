// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use storage_contracts::{BlockDeviceDiscovery, HelperShell, MountOpsAdapter, UnionFsAdapter};
use tracing::warn;

use crate::adapters::system::{
    LsblkDiscovery, MergerFsAdapter, SystemHelperShell, SystemMountAdapter,
};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    Mounts,
    Discovery,
    Union,
    Maintenance,
}

const REQUIRED_CONCERNS: [Concern; 2] = [Concern::Mounts, Concern::Discovery];

pub struct AdapterRegistry {
    routes: HashMap<Concern, &'static str>,
    mounts: Arc<dyn MountOpsAdapter>,
    discovery: Arc<dyn BlockDeviceDiscovery>,
    union: Option<Arc<dyn UnionFsAdapter>>,
    helper: Option<Arc<dyn HelperShell>>,
}

impl AdapterRegistry {
    /// Build the system adapters. Mounts and discovery are required; the
    /// union driver and maintenance tools degrade to "unavailable".
    pub fn build_default(config: &Config) -> Result<Self> {
        let timeout = config.operation_timeout();
        let mut routes = HashMap::new();

        let mounts: Arc<dyn MountOpsAdapter> = Arc::new(SystemMountAdapter::new(timeout));
        routes.insert(Concern::Mounts, "mountinfo");

        let discovery: Arc<dyn BlockDeviceDiscovery> = match LsblkDiscovery::new(timeout) {
            Ok(adapter) => {
                routes.insert(Concern::Discovery, "lsblk");
                Arc::new(adapter)
            }
            Err(e) => return Err(anyhow!("Block device discovery unavailable: {}", e)),
        };

        let union: Option<Arc<dyn UnionFsAdapter>> = if !config.enable_mergerfs {
            warn!("mergerfs disabled in configuration; merge operations unavailable");
            None
        } else {
            match MergerFsAdapter::new(timeout) {
                Ok(adapter) => {
                    routes.insert(Concern::Union, "mergerfs");
                    Some(Arc::new(adapter))
                }
                Err(e) => {
                    warn!("mergerfs control tools not available: {}. Merges disabled.", e);
                    None
                }
            }
        };

        let maintenance = SystemHelperShell::new(&config.shell_path, timeout);
        let helper: Option<Arc<dyn HelperShell>> = match maintenance.route() {
            Some(route) => {
                routes.insert(Concern::Maintenance, route);
                Some(Arc::new(maintenance))
            }
            None => None,
        };

        for concern in REQUIRED_CONCERNS {
            if !routes.contains_key(&concern) {
                return Err(anyhow!(
                    "Missing required adapter routing for concern: {:?}",
                    concern
                ));
            }
        }

        Ok(Self {
            routes,
            mounts,
            discovery,
            union,
            helper,
        })
    }

    pub fn mounts(&self) -> Arc<dyn MountOpsAdapter> {
        self.mounts.clone()
    }

    pub fn discovery(&self) -> Arc<dyn BlockDeviceDiscovery> {
        self.discovery.clone()
    }

    pub fn union(&self) -> Option<Arc<dyn UnionFsAdapter>> {
        self.union.clone()
    }

    pub fn helper(&self) -> Option<Arc<dyn HelperShell>> {
        self.helper.clone()
    }

    pub fn route_for(&self, concern: Concern) -> Option<&'static str> {
        self.routes.get(&concern).copied()
    }
}
