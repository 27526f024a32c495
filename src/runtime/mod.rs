//! Container runtime access.
//!
//! [`ContainerRuntime`] is the raw control API of a container engine. [`RuntimeAdapter`]
//! wraps any runtime with the lifecycle rules of the service: state guards, forced removal,
//! per-container serialization and bounded call durations.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::container::{Container, ContainerID};
use crate::error::Result;

mod adapter;
mod docker;
#[cfg(test)]
pub(crate) mod stub;

pub use adapter::RuntimeAdapter;
pub use docker::DockerRuntime;

/// Everything needed to start an exporter container next to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterLaunch {
    pub image: String,
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub network: Option<String>,
    /// Port the exporter listens on inside its container.
    pub container_port: u16,
    /// Host port the exporter is published on.
    pub host_port: u16,
}

/// Raw control API of a container engine.
///
/// Implementations report failures with the service [`Error`](crate::error::Error) kinds:
/// unknown containers as `NotFound`, "already in that state" answers as `InvalidState`,
/// engine-side contention as `Conflict` and everything else as `Runtime`.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Lists all containers, running or not.
    fn list(&self) -> impl Future<Output = Result<Vec<Container>>> + Send;

    fn inspect(&self, id: &ContainerID) -> impl Future<Output = Result<Container>> + Send;

    fn start(&self, id: &ContainerID) -> impl Future<Output = Result<()>> + Send;

    fn stop(&self, id: &ContainerID) -> impl Future<Output = Result<()>> + Send;

    /// Removes a container. With `force`, a running container is killed first.
    fn remove(&self, id: &ContainerID, force: bool) -> impl Future<Output = Result<()>> + Send;

    /// Pulls the exporter image, creates the exporter container and starts it.
    ///
    /// Returns the id of the new container.
    fn run_exporter(
        &self,
        launch: &ExporterLaunch,
    ) -> impl Future<Output = Result<ContainerID>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Start,
    Stop,
    Remove,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Remove => "remove",
        }
    }
}

/// Result of a successful lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleOutcome {
    pub message: String,
    pub id: ContainerID,
    pub action: LifecycleAction,
    /// State the container was left in: `running`, `exited` or `removed`.
    pub status: &'static str,
}

impl LifecycleOutcome {
    fn new(id: &ContainerID, action: LifecycleAction) -> Self {
        let (verb, status) = match action {
            LifecycleAction::Start => ("started", "running"),
            LifecycleAction::Stop => ("stopped", "exited"),
            LifecycleAction::Remove => ("removed", "removed"),
        };
        Self {
            message: format!("Container {id} {verb} successfully"),
            id: id.clone(),
            action,
            status,
        }
    }
}
