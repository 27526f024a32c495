//! Exporter configuration and activation per container.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::container::ContainerID;
use crate::error::{Error, Result, ResultOkLogExt};
use crate::inventory::{ContainerEntry, InventoryCache};
use crate::keyed_lock::KeyedLock;
use crate::persistence::{self, ConfigPersister, MySqlConfigPersister};
use crate::runtime::{ContainerRuntime, ExporterLaunch, RuntimeAdapter};

pub mod catalog;
mod config;

pub use config::{ExporterConfig, generate, normalize_stack};

/// Label put on exporter containers, naming the container they scrape.
pub const TARGET_LABEL: &str = "stackscout.exporter.target";
const STACK_LABEL: &str = "stackscout.exporter.stack";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterState {
    Active,
    Inactive,
}

impl ExporterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExporterState::Active => "active",
            ExporterState::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ExporterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated config together with its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigDescriptor {
    pub config_id: u64,
    pub container_id: ContainerID,
    pub config: ExporterConfig,
}

/// Activation state of a container's exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExporterStatus {
    pub container_id: ContainerID,
    pub state: ExporterState,
    pub port: Option<u16>,
    pub exporter_container_id: Option<ContainerID>,
    pub exporter_name: String,
    pub exporter_image: String,
    pub network: Option<String>,
    pub stack: String,
}

#[derive(Debug, Clone)]
struct ActiveExporter {
    port: u16,
    exporter_id: ContainerID,
    network: Option<String>,
}

#[derive(Debug, Clone)]
struct ExporterRecord {
    config_id: u64,
    config: ExporterConfig,
    active: Option<ActiveExporter>,
}

impl ExporterRecord {
    fn status(&self) -> ExporterStatus {
        let (state, port, exporter_container_id, network) = match &self.active {
            Some(active) => (
                ExporterState::Active,
                Some(active.port),
                Some(active.exporter_id.clone()),
                active.network.clone(),
            ),
            None => (ExporterState::Inactive, None, None, self.config.network.clone()),
        };
        ExporterStatus {
            container_id: self.config.container_id.clone(),
            state,
            port,
            exporter_container_id,
            exporter_name: self.config.exporter_name(),
            exporter_image: self.config.exporter_image.clone(),
            network,
            stack: self.config.stack.clone(),
        }
    }
}

/// Generates exporter configs and starts or stops the exporter containers.
///
/// At most one config and one active exporter exist per container. Activation and teardown
/// for the same container are serialized; a host port is held by at most one exporter.
pub struct ExporterOrchestrator<R, P = MySqlConfigPersister> {
    runtime: Arc<RuntimeAdapter<R>>,
    inventory: InventoryCache<R>,
    records: DashMap<ContainerID, ExporterRecord>,
    ports: DashMap<u16, ContainerID>,
    locks: KeyedLock,
    last_config_id: AtomicU64,
    persister: Option<P>,
}

impl<R: ContainerRuntime> ExporterOrchestrator<R> {
    pub fn new(runtime: Arc<RuntimeAdapter<R>>, inventory: InventoryCache<R>) -> Self {
        Self {
            runtime,
            inventory,
            records: DashMap::new(),
            ports: DashMap::new(),
            locks: KeyedLock::default(),
            last_config_id: AtomicU64::new(0),
            persister: None,
        }
    }
}

impl<R: ContainerRuntime, P: ConfigPersister> ExporterOrchestrator<R, P> {
    /// Records configs and state changes through `persister`.
    ///
    /// Call [`restore`](Self::restore) afterwards to pick up what a previous run stored.
    pub fn with_persister<Q: ConfigPersister>(self, persister: Q) -> ExporterOrchestrator<R, Q> {
        ExporterOrchestrator {
            runtime: self.runtime,
            inventory: self.inventory,
            records: self.records,
            ports: self.ports,
            locks: self.locks,
            last_config_id: self.last_config_id,
            persister: Some(persister),
        }
    }

    /// Loads the latest stored config of every container in the current snapshot and
    /// re-attaches exporters that are still running. Config ids continue after the highest
    /// stored one.
    ///
    /// Containers that already have a config in memory are left alone. An exporter recorded
    /// as active whose container is gone is restored as inactive.
    ///
    /// # Errors
    ///
    /// Returns the persistence error if the stored configs cannot be read.
    pub async fn restore(&self) -> persistence::Result<usize> {
        let Some(persister) = &self.persister else {
            return Ok(0);
        };
        let last_config_id = persister.last_config_id().await?;
        self.last_config_id.fetch_max(last_config_id, Ordering::Relaxed);
        let rows = persister.latest_configs().await?;

        let snapshot = self.inventory.get_snapshot();
        let exporters: HashMap<&str, &ContainerEntry> = snapshot
            .values()
            .filter(|entry| entry.info.status().is_running())
            .filter_map(|entry| Some((entry.info.label(TARGET_LABEL)?, entry)))
            .collect();

        let mut restored = 0;
        for row in rows {
            let id = row.container_id.clone();
            if !snapshot.contains_key(&id) {
                log::debug!("Skipping stored exporter config of missing container `{id}`");
                continue;
            }
            let mut config = match row.decode_config() {
                Ok(config) => config,
                Err(err) => {
                    log::warn!("skipping undecodable exporter config {}: {err}", row.config_id);
                    continue;
                }
            };

            let _guard = self.locks.lock(&id).await;
            if self.records.contains_key(&id) {
                continue;
            }

            let mut active = None;
            if row.exporter_state() == ExporterState::Active {
                active = match (row.host_port, exporters.get(id.as_str())) {
                    (Some(port), Some(exporter)) => self.reattach(&id, port, exporter),
                    _ => None,
                };
                if active.is_none() {
                    log::warn!("exporter of `{id}` is no longer running, marking it inactive");
                    self.persist_state(row.config_id, ExporterState::Inactive, None).await;
                }
            }

            config.host_port = active.as_ref().map(|active| active.port);
            self.records.insert(
                id,
                ExporterRecord {
                    config_id: row.config_id,
                    config,
                    active,
                },
            );
            restored += 1;
        }

        log::info!(
            "Restored {restored} exporter configs, continuing after config id {last_config_id}"
        );
        Ok(restored)
    }

    fn reattach(
        &self,
        id: &ContainerID,
        port: u16,
        exporter: &ContainerEntry,
    ) -> Option<ActiveExporter> {
        match self.ports.entry(port) {
            Entry::Vacant(vacant) => {
                vacant.insert(id.clone());
            }
            Entry::Occupied(owner) => {
                log::warn!(
                    "stored exporter of `{id}` claims port {port}, already held for `{}`",
                    owner.get()
                );
                return None;
            }
        }
        log::debug!("Re-attached exporter {} of `{id}` on port {port}", exporter.info.id);
        Some(ActiveExporter {
            port,
            exporter_id: exporter.info.id.clone(),
            network: exporter.info.primary_network().map(str::to_owned),
        })
    }

    pub fn config(&self, id: &ContainerID) -> Option<ExporterConfig> {
        self.records.get(id).map(|record| record.config.clone())
    }

    pub fn status(&self, id: &ContainerID) -> Option<ExporterStatus> {
        self.records.get(id).map(|record| record.status())
    }

    /// Generates, or regenerates, the exporter config of a container in the current snapshot.
    ///
    /// Regeneration bumps the version and leaves an active exporter running.
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` error if the container is not in the snapshot or its stack has
    /// no exporter definition.
    pub async fn generate_config(&self, id: &ContainerID) -> Result<ConfigDescriptor> {
        let entry = self
            .inventory
            .get_snapshot()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::container_not_found(id))?;
        let mut config = generate(&entry)?;

        let _guard = self.locks.lock(id).await;
        let config_id = self.last_config_id.fetch_add(1, Ordering::Relaxed) + 1;
        match self.records.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                config.version = record.config.version + 1;
                config.host_port = record.config.host_port;
                record.config_id = config_id;
                record.config = config.clone();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ExporterRecord {
                    config_id,
                    config: config.clone(),
                    active: None,
                });
            }
        }
        log::info!(
            "Generated exporter config {config_id} (v{}) for container `{id}`",
            config.version
        );

        if let Some(persister) = &self.persister {
            let state = match config.host_port {
                Some(_) => ExporterState::Active,
                None => ExporterState::Inactive,
            };
            persister
                .persist_config(config_id, &config, state)
                .await
                .ok_log();
        }

        Ok(ConfigDescriptor {
            config_id,
            container_id: id.clone(),
            config,
        })
    }

    /// Starts the exporter of a container, published on host `port`.
    ///
    /// Calling it again with the same port returns the existing status without launching
    /// a second exporter.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no config was generated or the container is gone.
    /// - `Conflict` if the exporter is active on another port or `port` is held by another
    ///   container's exporter.
    /// - `InvalidState` if the container is not running.
    /// - `Runtime` if the exporter cannot be launched.
    pub async fn up_exporter(&self, id: &ContainerID, port: u16) -> Result<ExporterStatus> {
        let _guard = self.locks.lock(id).await;
        let record = self.records.get(id).map(|record| record.clone()).ok_or_else(|| {
            Error::NotFound(format!(
                "no exporter config for container `{id}`; generate one first"
            ))
        })?;

        if let Some(active) = &record.active {
            if active.port == port {
                log::debug!("Exporter of `{id}` is already active on port {port}");
                return Ok(record.status());
            }
            return Err(Error::Conflict(format!(
                "exporter of container `{id}` is already active on port {}",
                active.port
            )));
        }

        let container = self.runtime.inspect(id).await?;
        if !container.status().is_running() {
            return Err(Error::InvalidState(format!(
                "container `{id}` is {}; exporters can only be started for running containers",
                container.status()
            )));
        }

        match self.ports.entry(port) {
            Entry::Occupied(owner) if owner.get() != id => {
                return Err(Error::Conflict(format!(
                    "port {port} is already used by the exporter of container `{}`",
                    owner.get()
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(vacant) => {
                vacant.insert(id.clone());
            }
        }

        let config = &record.config;
        let network = container
            .primary_network()
            .map(str::to_owned)
            .or_else(|| config.network.clone());
        let launch = ExporterLaunch {
            image: config.exporter_image.clone(),
            name: config.exporter_name(),
            env: config.env.clone(),
            labels: BTreeMap::from([
                (TARGET_LABEL.to_owned(), id.to_string()),
                (STACK_LABEL.to_owned(), config.stack.clone()),
            ]),
            network: network.clone(),
            container_port: config.exporter_port,
            host_port: port,
        };

        let exporter_id = match self.runtime.run_exporter(&launch).await {
            Ok(exporter_id) => exporter_id,
            Err(err) => {
                self.ports.remove_if(&port, |_, owner| owner == id);
                log::error!("failed to launch exporter for `{id}`: {err}");
                return Err(err);
            }
        };
        log::info!("Started exporter `{}` ({exporter_id}) for `{id}` on port {port}", launch.name);

        let status = {
            let mut record = self.records.get_mut(id).ok_or_else(|| {
                Error::Runtime(format!("exporter config of `{id}` vanished during launch"))
            })?;
            record.active = Some(ActiveExporter {
                port,
                exporter_id,
                network,
            });
            record.config.host_port = Some(port);
            (record.config_id, record.status())
        };

        self.persist_state(status.0, ExporterState::Active, Some(port)).await;
        Ok(status.1)
    }

    /// Removes the active exporter of a container and releases its port.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no config was generated for the container.
    /// - `InvalidState` if no exporter is active.
    /// - `Runtime` if the exporter container cannot be removed; it stays active.
    pub async fn down_exporter(&self, id: &ContainerID) -> Result<ExporterStatus> {
        let _guard = self.locks.lock(id).await;
        let active = match self.records.get(id) {
            None => {
                return Err(Error::NotFound(format!(
                    "no exporter config for container `{id}`"
                )));
            }
            Some(record) => record.active.clone(),
        };
        let Some(active) = active else {
            return Err(Error::InvalidState(format!(
                "no exporter is active for container `{id}`"
            )));
        };

        self.runtime.remove_exporter(&active.exporter_id).await?;
        self.ports.remove_if(&active.port, |_, owner| owner == id);
        log::info!("Removed exporter {} of `{id}`", active.exporter_id);

        let status = {
            let mut record = self.records.get_mut(id).ok_or_else(|| {
                Error::Runtime(format!("exporter config of `{id}` vanished during teardown"))
            })?;
            record.active = None;
            record.config.host_port = None;
            (record.config_id, record.status())
        };

        self.persist_state(status.0, ExporterState::Inactive, None).await;
        Ok(status.1)
    }

    /// Forgets the config of a removed container, removing its active exporter first.
    ///
    /// Failures are logged; the config is kept if the exporter could not be removed.
    pub async fn release_target(&self, id: &ContainerID) {
        match self.down_exporter(id).await {
            Ok(_) | Err(Error::InvalidState(_)) => {}
            Err(Error::NotFound(_)) => return,
            Err(err) => {
                log::error!("failed to remove the exporter of removed container `{id}`: {err}");
                return;
            }
        }

        let guard = self.locks.lock(id).await;
        if let Some((_, record)) = self.records.remove(id) {
            log::info!(
                "Dropped exporter config {} of removed container `{id}`",
                record.config_id
            );
        }
        drop(guard);
        self.locks.forget(id);
    }

    async fn persist_state(&self, config_id: u64, state: ExporterState, host_port: Option<u16>) {
        if let Some(persister) = &self.persister {
            persister
                .persist_state(config_id, state, host_port)
                .await
                .ok_log();
        }
    }
}
