//! Typed view of a container as reported by the engine's inspect endpoint.
//!
//! The field names follow the engine's PascalCase JSON so that the same types can be
//! deserialized from the Docker engine and serialized on the `/api/v1` wire contract.
//! Only the fields the service consumes are modelled; everything else is ignored.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ContainerID;
use super::utils::null_as_default;

const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    /// Returns true if the container has live processes, i.e., removing it requires a stop.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ContainerStatus::Running | ContainerStatus::Paused | ContainerStatus::Restarting
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    pub status: ContainerStatus,
}

/// Placeholder for the engine's `{}` values, e.g., in `ExposedPorts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub image: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hostname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub exposed_ports: BTreeMap<String, EmptyObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default, deserialize_with = "null_as_default")]
    pub host_ip: String,
    #[serde(rename = "HostPort", default, deserialize_with = "null_as_default")]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    #[serde(rename = "IPAddress", default, deserialize_with = "null_as_default")]
    pub ip_address: String,
    #[serde(rename = "NetworkID", default, deserialize_with = "null_as_default")]
    pub network_id: String,
    #[serde(rename = "Gateway", default, deserialize_with = "null_as_default")]
    pub gateway: String,
    #[serde(rename = "MacAddress", default, deserialize_with = "null_as_default")]
    pub mac_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(rename = "IPAddress", default, deserialize_with = "null_as_default")]
    pub ip_address: String,
    #[serde(rename = "Networks", default, deserialize_with = "null_as_default")]
    pub networks: BTreeMap<String, EndpointSettings>,
    #[serde(rename = "Ports", default, deserialize_with = "null_as_default")]
    pub ports: BTreeMap<String, Option<Vec<PortBinding>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub network_mode: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub port_bindings: BTreeMap<String, Option<Vec<PortBinding>>>,
}

/// A container together with the metadata used for classification and exporter generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    pub id: ContainerID,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub state: ContainerState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: ContainerConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub network_settings: NetworkSettings,
    #[serde(default, deserialize_with = "null_as_default")]
    pub host_config: HostConfig,
}

impl Container {
    pub fn status(&self) -> ContainerStatus {
        self.state.status
    }

    /// Returns the container name without the engine's leading `/`.
    ///
    /// Falls back to the configured hostname and finally to the short id.
    pub fn display_name(&self) -> &str {
        let name = self.name.trim_start_matches('/');
        if !name.is_empty() {
            return name;
        }
        if !self.config.hostname.is_empty() {
            return &self.config.hostname;
        }
        self.id.short()
    }

    pub fn image(&self) -> Option<&str> {
        let image = self.config.image.trim();
        (!image.is_empty()).then_some(image)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.config.labels.get(key).map(String::as_str)
    }

    pub fn compose_service(&self) -> Option<&str> {
        self.label(COMPOSE_SERVICE_LABEL)
    }

    pub fn compose_project(&self) -> Option<&str> {
        self.label(COMPOSE_PROJECT_LABEL)
    }

    /// Parses `Env` into a map. Entries without `=` are skipped; later duplicates win.
    pub fn env_map(&self) -> BTreeMap<&str, &str> {
        self.config
            .env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .collect()
    }

    /// Port numbers from `ExposedPorts` without the protocol suffix, e.g., `80/tcp` -> `80`.
    pub fn exposed_ports(&self) -> Vec<&str> {
        strip_protocols(self.config.exposed_ports.keys())
    }

    /// Port numbers the runtime reports in `NetworkSettings.Ports`.
    pub fn published_ports(&self) -> Vec<&str> {
        strip_protocols(self.network_settings.ports.keys())
    }

    /// Returns the first host port bound in `HostConfig.PortBindings`.
    pub fn host_port(&self) -> Option<&str> {
        self.host_config
            .port_bindings
            .values()
            .filter_map(|bindings| bindings.as_ref()?.first())
            .map(|binding| binding.host_port.as_str())
            .find(|port| !port.is_empty())
    }

    /// Returns the container's IP address, if it has one (stopped containers do not).
    pub fn ip_address(&self) -> Option<&str> {
        if !self.network_settings.ip_address.is_empty() {
            return Some(&self.network_settings.ip_address);
        }
        self.network_settings
            .networks
            .values()
            .map(|endpoint| endpoint.ip_address.as_str())
            .find(|ip| !ip.is_empty())
    }

    /// Returns the IP address on the named network.
    pub fn ip_address_on(&self, network: &str) -> Option<&str> {
        self.network_settings
            .networks
            .get(network)
            .map(|endpoint| endpoint.ip_address.as_str())
            .filter(|ip| !ip.is_empty())
            .or_else(|| (network == "bridge").then(|| self.ip_address()).flatten())
    }

    /// Returns the network an exporter should join: `bridge` if attached, else the first one.
    pub fn primary_network(&self) -> Option<&str> {
        let networks = &self.network_settings.networks;
        if networks.contains_key("bridge") {
            return Some("bridge");
        }
        networks.keys().next().map(String::as_str)
    }
}

fn strip_protocols<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    keys.map(|key| key.split('/').next().unwrap_or(key.as_str()))
        .collect()
}
