//! In-memory [`ContainerRuntime`] for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use crate::container::{
    Container, ContainerConfig, ContainerID, ContainerState, ContainerStatus, EndpointSettings,
    NetworkSettings,
};
use crate::error::{Error, Result};

use super::{ContainerRuntime, ExporterLaunch};

/// Builds a container attached to the `bridge` network.
pub(crate) fn container(id: &str, image: &str, status: ContainerStatus) -> Container {
    let mut networks = BTreeMap::new();
    networks.insert(
        "bridge".to_owned(),
        EndpointSettings {
            ip_address: "172.17.0.2".to_owned(),
            ..Default::default()
        },
    );
    Container {
        id: ContainerID::new(id).unwrap(),
        name: format!("/{id}"),
        state: ContainerState { status },
        config: ContainerConfig {
            image: image.to_owned(),
            ..Default::default()
        },
        network_settings: NetworkSettings {
            networks,
            ..Default::default()
        },
        host_config: Default::default(),
    }
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<ContainerID, Container>,
    calls: HashMap<&'static str, usize>,
    active: HashMap<&'static str, usize>,
    max_active: HashMap<&'static str, usize>,
    latency: HashMap<&'static str, Duration>,
    settle: HashMap<&'static str, Duration>,
    failures: HashMap<&'static str, Error>,
    launches: Vec<ExporterLaunch>,
}

#[derive(Debug, Default)]
pub(crate) struct StubRuntime {
    state: Mutex<State>,
}

impl StubRuntime {
    pub(crate) fn with_containers(containers: Vec<Container>) -> Self {
        let runtime = Self::default();
        for container in containers {
            runtime.insert(container);
        }
        runtime
    }

    pub(crate) fn insert(&self, container: Container) {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(container.id.clone(), container);
    }

    pub(crate) fn set_status(&self, id: &str, status: ContainerStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = state.containers.get_mut(id) {
            container.state.status = status;
        }
    }

    pub(crate) fn set_latency(&self, operation: &'static str, latency: Duration) {
        self.state.lock().unwrap().latency.insert(operation, latency);
    }

    /// Delays `operation` after its result has been taken, so the engine can change meanwhile.
    pub(crate) fn set_settle(&self, operation: &'static str, settle: Duration) {
        self.state.lock().unwrap().settle.insert(operation, settle);
    }

    /// Makes the next call of `operation` fail with `err`.
    pub(crate) fn fail_next(&self, operation: &'static str, err: Error) {
        self.state.lock().unwrap().failures.insert(operation, err);
    }

    pub(crate) fn calls(&self, operation: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.get(operation).copied().unwrap_or_default()
    }

    pub(crate) fn max_concurrent(&self, operation: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.max_active.get(operation).copied().unwrap_or_default()
    }

    pub(crate) fn launches(&self) -> Vec<ExporterLaunch> {
        self.state.lock().unwrap().launches.clone()
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(operation).or_default() += 1;
            let active = state.active.entry(operation).or_default();
            *active += 1;
            let now = *active;
            let max = state.max_active.entry(operation).or_default();
            *max = (*max).max(now);
            state.latency.get(operation).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(active) = state.active.get_mut(operation) {
            *active -= 1;
        }
        match state.failures.remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_container<T>(
        &self,
        id: &ContainerID,
        f: impl FnOnce(&mut Container) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::container_not_found(id))?;
        f(container)
    }
}

impl ContainerRuntime for StubRuntime {
    async fn list(&self) -> Result<Vec<Container>> {
        self.enter("list").await?;
        let (containers, settle) = {
            let state = self.state.lock().unwrap();
            let containers: Vec<_> = state.containers.values().cloned().collect();
            (containers, state.settle.get("list").copied())
        };
        if let Some(settle) = settle {
            tokio::time::sleep(settle).await;
        }
        Ok(containers)
    }

    async fn inspect(&self, id: &ContainerID) -> Result<Container> {
        self.enter("inspect").await?;
        self.with_container(id, |container| Ok(container.clone()))
    }

    async fn start(&self, id: &ContainerID) -> Result<()> {
        self.enter("start").await?;
        self.with_container(id, |container| {
            if container.status().is_running() {
                return Err(Error::InvalidState("already started".to_owned()));
            }
            container.state.status = ContainerStatus::Running;
            Ok(())
        })
    }

    async fn stop(&self, id: &ContainerID) -> Result<()> {
        self.enter("stop").await?;
        self.with_container(id, |container| {
            if !container.status().is_active() {
                return Err(Error::InvalidState("already stopped".to_owned()));
            }
            container.state.status = ContainerStatus::Exited;
            Ok(())
        })
    }

    async fn remove(&self, id: &ContainerID, force: bool) -> Result<()> {
        self.enter("remove").await?;
        self.with_container(id, |container| {
            if container.status().is_active() && !force {
                return Err(Error::Conflict("container is running".to_owned()));
            }
            Ok(())
        })?;
        self.state.lock().unwrap().containers.remove(id);
        Ok(())
    }

    async fn run_exporter(&self, launch: &ExporterLaunch) -> Result<ContainerID> {
        self.enter("run_exporter").await?;
        let mut state = self.state.lock().unwrap();
        state.launches.push(launch.clone());
        let id = ContainerID::new(format!("exporter{}", state.launches.len()))?;

        let mut exporter = container(id.as_str(), &launch.image, ContainerStatus::Running);
        exporter.name = format!("/{}", launch.name);
        exporter.config.labels = launch.labels.clone();
        state.containers.insert(id.clone(), exporter);
        Ok(id)
    }
}
