use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding};
use futures::TryStreamExt;

use crate::container::{Container, ContainerID};
use crate::error::{Error, Result, ResultOkLogExt};

use super::{ContainerRuntime, ExporterLaunch};

/// Seconds the engine waits for a graceful stop before killing the container.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Seconds `bollard` waits for a single engine request.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Docker Engine API client on top of `bollard`.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Arc<Docker>,
}

impl DockerRuntime {
    /// Connects to the engine listening on the Unix socket at `socket`.
    ///
    /// # Errors
    ///
    /// Returns a `Runtime` error if the client cannot be set up for the socket.
    pub fn connect(socket: impl AsRef<Path>) -> Result<Self> {
        let socket = socket.as_ref().to_string_lossy();
        let docker =
            Docker::connect_with_socket(&socket, REQUEST_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(|err| {
                    Error::runtime(&format!("failed to connect to docker at {socket}"), err)
                })?;
        log::debug!("Using docker engine at {socket}");
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(info) = progress
            .try_next()
            .await
            .map_err(|err| map_error(&format!("failed to pull `{image}`"), err))?
        {
            if let Some(err) = info.error {
                return Err(Error::Runtime(format!("failed to pull `{image}`: {err}")));
            }
        }
        log::debug!("Pulled image `{image}`");
        Ok(())
    }
}

/// Maps engine answers onto the error taxonomy: 404 is `NotFound`, 304 ("already in that
/// state") is `InvalidState`, 409 is `Conflict` and everything else is `Runtime`.
fn map_error(context: &str, err: DockerError) -> Error {
    match err {
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => Error::NotFound(message),
            304 => Error::InvalidState(format!("{context}: not modified")),
            409 => Error::Conflict(message),
            _ => Error::Runtime(format!("{context} failed with {status_code}: {message}")),
        },
        err => Error::runtime(context, err),
    }
}

fn not_found_as(id: &ContainerID, err: Error) -> Error {
    match err {
        Error::NotFound(_) => Error::container_not_found(id),
        err => err,
    }
}

/// The engine and the service share the engine's JSON field names, so the inspect response
/// is converted through its serialized form.
fn into_container(details: ContainerInspectResponse) -> Result<Container> {
    let value = serde_json::to_value(details)
        .map_err(|err| Error::runtime("failed to encode inspect response", err))?;
    serde_json::from_value(value)
        .map_err(|err| Error::runtime("failed to decode inspect response", err))
}

fn create_config(launch: &ExporterLaunch) -> Config<String> {
    let port_key = format!("{}/tcp", launch.container_port);
    let port_bindings = HashMap::from([(
        port_key.clone(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(launch.host_port.to_string()),
        }]),
    )]);

    Config {
        image: Some(launch.image.clone()),
        env: Some(
            launch
                .env
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
        ),
        labels: Some(launch.labels.clone().into_iter().collect()),
        exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: launch.network.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl ContainerRuntime for DockerRuntime {
    async fn list(&self) -> Result<Vec<Container>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|err| map_error("list containers", err))?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id.as_deref().and_then(|id| ContainerID::new(id).ok()) else {
                log::warn!("Skipping container without a usable id: {:?}", summary.names);
                continue;
            };
            match self.inspect(&id).await {
                Ok(container) => containers.push(container),
                // Removed between list and inspect.
                Err(Error::NotFound(_)) => log::debug!("Container `{id}` vanished while listing"),
                Err(err) => return Err(err),
            }
        }
        Ok(containers)
    }

    async fn inspect(&self, id: &ContainerID) -> Result<Container> {
        let details = self
            .docker
            .inspect_container(id.as_str(), None)
            .await
            .map_err(|err| not_found_as(id, map_error(&format!("inspect `{id}`"), err)))?;
        into_container(details)
    }

    async fn start(&self, id: &ContainerID) -> Result<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|err| match map_error(&format!("start `{id}`"), err) {
                Error::InvalidState(_) => {
                    Error::InvalidState(format!("container `{id}` is already running"))
                }
                err => not_found_as(id, err),
            })
    }

    async fn stop(&self, id: &ContainerID) -> Result<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        self.docker
            .stop_container(id.as_str(), Some(options))
            .await
            .map_err(|err| match map_error(&format!("stop `{id}`"), err) {
                Error::InvalidState(_) => {
                    Error::InvalidState(format!("container `{id}` is already stopped"))
                }
                err => not_found_as(id, err),
            })
    }

    async fn remove(&self, id: &ContainerID, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(|err| not_found_as(id, map_error(&format!("remove `{id}`"), err)))
    }

    async fn run_exporter(&self, launch: &ExporterLaunch) -> Result<ContainerID> {
        self.pull(&launch.image).await?;

        let options = CreateContainerOptions {
            name: launch.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), create_config(launch))
            .await
            .map_err(|err| map_error(&format!("create `{}`", launch.name), err))?;
        let id = ContainerID::new(&created.id)?;
        log::debug!("Created exporter container `{}` ({id})", launch.name);

        if let Err(err) = self.start(&id).await {
            log::error!("failed to start exporter `{}`: {err}", launch.name);
            self.remove(&id, true).await.ok_log();
            return Err(err);
        }
        Ok(id)
    }
}
