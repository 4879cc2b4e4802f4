// SPDX-License-Identifier: GPL-3.0-only

//! Local storage daemon
//!
//! Keeps records of serial disks (volumes) and mergerfs union mounts,
//! remounts known disks at boot, publishes hotplug events and repairs
//! drifted union mounts in the background.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nix::unistd::Uid;
use serde::Serialize;
use storage_types::{MergeRequest, MountFilter, MountRequest, NewVolume, VolumeId};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod adapters;
mod boot;
mod bus;
mod config;
mod error;
mod hotplug;
mod logging;
mod merges;
mod routing;
mod storage;
mod store;
mod systemd;
#[cfg(test)]
mod testing;

use boot::RemountSupervisor;
use bus::{EventBus, EventBusError};
use config::{Config, DEFAULT_CONFIG_PATH};
use hotplug::HotplugListener;
use merges::{MergeCascade, MergeService};
use routing::{AdapterRegistry, Concern};
use storage::LocalStorage;
use store::{JsonFileBackend, Store};
use systemd::Readiness;

/// Local storage service: serial disks, union mounts and hotplug events
#[derive(Parser)]
#[command(name = "local-storage")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the database path from the configuration
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Serve,

    /// Run one merge reconciliation pass and print the report
    Reconcile,

    /// List live mounts
    Mounts {
        #[arg(long)]
        mount_point: Option<String>,
        #[arg(long)]
        fs_type: Option<String>,
    },

    /// Mount a filesystem
    Mount {
        #[arg(long)]
        source: String,
        #[arg(long)]
        mount_point: String,
        /// Filesystem type; detected by mount(8) when omitted
        #[arg(long, default_value = "")]
        fs_type: String,
        #[arg(long, default_value = "")]
        options: String,
        /// Ask for an fstab entry (unsupported; the mount still happens)
        #[arg(long)]
        persist: bool,
    },

    /// Unmount a filesystem
    Unmount { mount_point: String },

    /// List known volumes, or show one
    Volumes {
        #[arg(long)]
        id: Option<VolumeId>,
    },

    /// Register, update or forget a volume
    #[command(subcommand)]
    Volume(VolumeCommand),

    /// List declared merges
    Merges {
        #[arg(long)]
        mount_point: Option<String>,
    },

    /// Declare, change or remove a merge
    #[command(subcommand)]
    Merge(MergeCommand),

    /// Print the hotplug event types this service emits
    EventTypes,
}

#[derive(Subcommand)]
enum VolumeCommand {
    /// Register a volume, or refresh the record with the same UUID
    Add {
        #[arg(long)]
        uuid: String,
        /// Device node, e.g. /dev/sdb1
        #[arg(long)]
        path: String,
        /// Required for a new volume
        #[arg(long)]
        mount_point: Option<String>,
        #[arg(long, default_value = "")]
        bus: String,
        #[arg(long, default_value = "")]
        vendor: String,
        #[arg(long, default_value = "")]
        model: String,
    },

    /// Change the recorded mount point
    SetMountPoint {
        #[arg(long)]
        uuid: String,
        #[arg(long)]
        mount_point: String,
    },

    /// Forget a volume and drop it from every merge
    Delete {
        #[arg(long)]
        id: VolumeId,
    },
}

#[derive(Subcommand)]
enum MergeCommand {
    /// Declare a merge and mount it
    Create {
        #[arg(long)]
        mount_point: String,
        /// Directory holding the merge's own branch
        #[arg(long = "base")]
        source_base_path: String,
        /// Source volume device path, repeatable, in branch order
        #[arg(long = "source")]
        sources: Vec<String>,
        #[arg(long)]
        fs_type: Option<String>,
    },

    /// Replace the source volumes of a merge
    Update {
        #[arg(long)]
        mount_point: String,
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Unmount a merge and forget it
    Delete {
        #[arg(long)]
        mount_point: String,
    },
}

struct Services {
    store: Arc<Store>,
    adapters: AdapterRegistry,
    storage: Arc<LocalStorage>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    logging::init(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::EventTypes => print_json(&hotplug::event_types()),
        command => {
            let services = compose(&config)?;
            print_json(&execute(&services.storage, command).await?)
        }
    }
}

/// Run a one-shot command against the facade and return what to print.
async fn execute(storage: &LocalStorage, command: Command) -> Result<serde_json::Value> {
    let value = match command {
        Command::Serve => anyhow::bail!("serve is not a one-shot command"),
        Command::EventTypes => serde_json::to_value(hotplug::event_types())?,
        Command::Reconcile => serde_json::to_value(storage.reconcile_merges().await)?,
        Command::Mounts {
            mount_point,
            fs_type,
        } => {
            let filter = MountFilter {
                mount_point,
                source: None,
                fs_type,
            };
            serde_json::to_value(storage.list_mounts(&filter).await?)?
        }
        Command::Mount {
            source,
            mount_point,
            fs_type,
            options,
            persist,
        } => {
            let request = MountRequest {
                source,
                mount_point,
                fs_type,
                options,
                persist,
            };
            serde_json::to_value(storage.mount(request).await?)?
        }
        Command::Unmount { mount_point } => {
            storage.unmount(&mount_point).await?;
            serde_json::json!({ "unmounted": mount_point })
        }
        Command::Volumes { id: Some(id) } => serde_json::to_value(storage.get_volume(id)?)?,
        Command::Volumes { id: None } => serde_json::to_value(storage.list_volumes())?,
        Command::Volume(VolumeCommand::Add {
            uuid,
            path,
            mount_point,
            bus,
            vendor,
            model,
        }) => {
            let volume = NewVolume {
                uuid,
                path,
                mount_point,
                bus,
                vendor,
                model,
            };
            serde_json::to_value(storage.register_volume(volume)?)?
        }
        Command::Volume(VolumeCommand::SetMountPoint { uuid, mount_point }) => {
            serde_json::to_value(storage.update_volume_mount_point(&uuid, &mount_point)?)?
        }
        Command::Volume(VolumeCommand::Delete { id }) => {
            serde_json::to_value(storage.delete_volume(id)?)?
        }
        Command::Merges { mount_point } => {
            serde_json::to_value(storage.list_merges(mount_point.as_deref())?)?
        }
        Command::Merge(MergeCommand::Create {
            mount_point,
            source_base_path,
            sources,
            fs_type,
        }) => {
            let request = MergeRequest {
                fs_type,
                mount_point,
                source_base_path,
                source_volume_paths: Some(sources),
            };
            serde_json::to_value(storage.create_merge(request).await?)?
        }
        Command::Merge(MergeCommand::Update {
            mount_point,
            sources,
        }) => serde_json::to_value(storage.update_merge(&mount_point, &sources).await?)?,
        Command::Merge(MergeCommand::Delete { mount_point }) => {
            serde_json::to_value(storage.delete_merge(&mount_point).await?)?
        }
    };
    Ok(value)
}

fn compose(config: &Config) -> Result<Services> {
    let backend = JsonFileBackend::new(&config.db_path);
    debug!("Using database {}", backend.path().display());
    let store = Store::open(Box::new(backend))
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    let store = Arc::new(store);
    store.register_after_delete_volume(Arc::new(MergeCascade));

    // Fail fast if a required concern has no adapter.
    let adapters = AdapterRegistry::build_default(config)?;
    info!(
        "Adapter routing: Mounts -> {}, Discovery -> {}, Union -> {}, Maintenance -> {}",
        adapters.route_for(Concern::Mounts).unwrap_or("<missing>"),
        adapters.route_for(Concern::Discovery).unwrap_or("<missing>"),
        adapters.route_for(Concern::Union).unwrap_or("<disabled>"),
        adapters
            .route_for(Concern::Maintenance)
            .unwrap_or("<missing>")
    );

    let merges = Arc::new(MergeService::new(
        store.clone(),
        adapters.mounts(),
        adapters.union(),
        config.merge_options.clone(),
    ));
    let storage = Arc::new(LocalStorage::new(store.clone(), adapters.mounts(), merges));

    Ok(Services {
        store,
        adapters,
        storage,
    })
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting local storage service v{}", env!("CARGO_PKG_VERSION"));

    if !Uid::effective().is_root() {
        warn!("Not running as root; mount and unmount operations will likely be denied");
    }

    let services = compose(&config)?;
    let bus = Arc::new(EventBus::new(config.event_bus_capacity));

    RemountSupervisor::new(
        services.store.clone(),
        services.adapters.mounts(),
        services.adapters.discovery(),
        services.adapters.helper(),
    )
    .run()
    .await;

    let report = services.storage.reconcile_merges().await;
    info!(
        "Initial merge reconciliation: {} checked, {} mounted, {} updated, {} failed",
        report.checked, report.mounted, report.updated, report.failed
    );

    let cancel = CancellationToken::new();
    let event_log = tokio::spawn(log_events(bus.clone(), cancel.clone()));

    let listener = match HotplugListener::new(
        services.store.clone(),
        services.adapters.discovery(),
        bus.clone(),
    )
    .spawn(cancel.clone())
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Hotplug events unavailable: {}", e);
            None
        }
    };
    debug!(
        "{} event types registered, {} bus subscribers",
        hotplug::event_types().len(),
        bus.subscriber_count()
    );

    let reconciler = tokio::spawn(reconcile_loop(
        services.storage.clone(),
        config.reconcile_interval(),
        cancel.clone(),
    ));

    match systemd::notify_ready() {
        Ok(Readiness::Notified) => info!("Notified systemd that the service is ready"),
        Ok(Readiness::NotSupervised) => debug!("Not started by systemd, skipping readiness"),
        Err(e) => warn!("Failed to notify systemd: {}", e),
    }

    wait_for_shutdown().await?;
    info!("Shutting down");
    cancel.cancel();

    if let Some(handle) = listener {
        handle.join().await;
    }
    for (name, task) in [("reconcile loop", reconciler), ("event log", event_log)] {
        if let Err(e) = task.await {
            warn!("{} ended abnormally: {}", name, e);
        }
    }

    info!("Local storage service stopped");
    Ok(())
}

async fn reconcile_loop(
    storage: Arc<LocalStorage>,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; startup already ran a pass.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = storage.reconcile_merges().await;
                if report.mounted + report.updated + report.failed > 0 {
                    info!(
                        "Merge reconciliation: {} mounted, {} updated, {} failed",
                        report.mounted, report.updated, report.failed
                    );
                }
            }
        }
    }
    debug!("Merge reconciliation loop stopped");
}

async fn log_events(bus: Arc<EventBus>, cancel: CancellationToken) {
    let mut receiver = bus.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = receiver.recv() => {
                match event {
                    Ok(event) => info!(properties = ?event.properties, "{}", event.name),
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(EventBusError::Closed) => break,
                }
            }
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
