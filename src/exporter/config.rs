use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::container::{Container, ContainerID};
use crate::error::{Error, Result};
use crate::inventory::ContainerEntry;

use super::catalog::{self, ExporterSpec};

const SCRAPE_INTERVAL: &str = "15s";
const SCRAPE_TIMEOUT: &str = "10s";
const MONITOR_LABEL: &str = "docker-container-monitor";
const UNKNOWN: &str = "unknown";

/// Everything needed to run and scrape the exporter of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExporterConfig {
    pub container_id: ContainerID,
    pub container_name: String,
    pub stack: String,
    pub exporter_image: String,
    /// Port the exporter listens on inside its own container.
    pub exporter_port: u16,
    pub metrics_path: String,
    /// `host:port` the exporter connects to.
    pub target_address: String,
    /// `host:port` Prometheus scrapes.
    pub scrape_target: String,
    pub job_name: String,
    pub network: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Prometheus configuration in JSON syntax, which is also valid YAML.
    pub scrape_config: String,
    pub version: u32,
    /// Host port the exporter is published on while it is active.
    pub host_port: Option<u16>,
}

impl ExporterConfig {
    pub fn exporter_name(&self) -> String {
        exporter_name(&self.container_name)
    }
}

pub(super) fn exporter_name(container_name: &str) -> String {
    format!("{container_name}-exporter")
}

/// Lowercases a classification label and replaces spaces with underscores.
pub fn normalize_stack(label: &str) -> String {
    label.to_lowercase().replace(' ', "_")
}

/// Host the exporter should connect to: the container's IP when it sits on `bridge`,
/// else its compose service name, else its container name.
fn target_host(container: &Container, network: Option<&str>) -> String {
    if network == Some("bridge") {
        if let Some(ip) = container.ip_address_on("bridge") {
            return ip.to_owned();
        }
    }
    container
        .compose_service()
        .unwrap_or_else(|| container.display_name())
        .to_owned()
}

/// Picks the port matching the stack default, else the first port, from the exposed ports
/// and then from the published ones.
fn target_port(container: &Container, default: u16) -> u16 {
    let parse = |ports: Vec<&str>| -> Vec<u16> {
        ports.into_iter().filter_map(|port| port.parse().ok()).collect()
    };
    for ports in [
        parse(container.exposed_ports()),
        parse(container.published_ports()),
    ] {
        if ports.contains(&default) {
            return default;
        }
        if let Some(first) = ports.first() {
            return *first;
        }
    }
    default
}

fn scrape_config(
    container: &Container,
    name: &str,
    stack: &str,
    spec: &ExporterSpec,
    job_name: &str,
    scrape_target: &str,
) -> String {
    let mut labels = BTreeMap::new();
    labels.insert("container_id", container.id.short().to_owned());
    labels.insert("container_name", name.to_owned());
    labels.insert("stack", stack.to_owned());
    labels.insert(
        "service",
        container.compose_service().unwrap_or(UNKNOWN).to_owned(),
    );
    labels.insert(
        "project",
        container.compose_project().unwrap_or(UNKNOWN).to_owned(),
    );
    labels.insert("exporter_image", spec.image.to_owned());
    if let Some(host_port) = container.host_port() {
        labels.insert("host_port", host_port.to_owned());
    }

    let config = json!({
        "global": {
            "scrape_interval": SCRAPE_INTERVAL,
            "evaluation_interval": SCRAPE_INTERVAL,
            "external_labels": { "monitor": MONITOR_LABEL },
        },
        "scrape_configs": [{
            "job_name": job_name,
            "scrape_interval": SCRAPE_INTERVAL,
            "scrape_timeout": SCRAPE_TIMEOUT,
            "metrics_path": spec.metrics_path,
            "static_configs": [{
                "targets": [scrape_target],
                "labels": labels,
            }],
            "relabel_configs": [
                {
                    "source_labels": ["__address__"],
                    "target_label": "instance",
                    "replacement": name,
                },
                {
                    "source_labels": ["__meta_docker_container_name"],
                    "regex": "/(.*)",
                    "target_label": "container_name",
                },
            ],
        }],
    });
    format!("{config:#}")
}

/// Derives the exporter configuration of a classified container.
///
/// The result depends only on the entry; `version` starts at 1 and `host_port` is unset.
///
/// # Errors
///
/// Returns a `NotFound` error if the top classification label has no exporter definition.
pub fn generate(entry: &ContainerEntry) -> Result<ExporterConfig> {
    let container = &entry.info;
    let label = entry.classification.top().unwrap_or(UNKNOWN);
    let stack = normalize_stack(label);
    let spec = catalog::lookup(&stack).ok_or_else(|| {
        Error::NotFound(format!(
            "no exporter definition for stack `{stack}` of container `{}`",
            container.id
        ))
    })?;

    let name = container.display_name().to_owned();
    let network = container.primary_network().map(str::to_owned);
    let host = target_host(container, network.as_deref());
    let port = target_port(container, catalog::default_port(&stack));
    let credentials = catalog::credentials(&stack, &container.env_map());
    let env = spec
        .env
        .iter()
        .map(|(key, template)| {
            (
                (*key).to_owned(),
                catalog::render(template, &host, port, &credentials),
            )
        })
        .collect();

    let job_name = format!("{name}{}", spec.job_suffix);
    let scrape_target = format!("{}:{}", exporter_name(&name), spec.port);
    let scrape_config = scrape_config(container, &name, &stack, spec, &job_name, &scrape_target);
    log::debug!("Generated {stack} exporter config for `{name}` targeting {host}:{port}");

    Ok(ExporterConfig {
        container_id: container.id.clone(),
        container_name: name,
        stack,
        exporter_image: spec.image.to_owned(),
        exporter_port: spec.port,
        metrics_path: spec.metrics_path.to_owned(),
        target_address: format!("{host}:{port}"),
        scrape_target,
        job_name,
        network,
        env,
        scrape_config,
        version: 1,
        host_port: None,
    })
}
