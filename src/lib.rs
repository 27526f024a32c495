use std::sync::Arc;

use classify::{Classifier, RuleClassifier};
use error::ResultOkLogExt;

/// Stackscout: inventories the containers of a Docker engine, classifies the technology each
/// one runs and provisions Prometheus exporters next to them.
///
/// The HTTP gateway in [`api`] exposes container lifecycle control and exporter management.
pub mod api;
pub mod classify;
pub mod config;
pub mod container;
pub mod error;
pub mod exporter;
pub mod fsutil;
pub mod inventory;
pub mod keyed_lock;
pub mod persistence;
pub mod runtime;

/// Runs the Stackscout service.
///
/// Connects to the Docker engine, loads the classifier, builds the initial inventory, keeps
/// it refreshed in the background and serves the API until the process is stopped.
///
/// # Errors
///
/// Possible errors include:
/// - Invalid configuration values in the environment.
/// - An unreadable classifier rules file.
/// - Failure to connect to, migrate or read the database when `DATABASE_URL` is set.
/// - Failure to bind the listen address.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::from_env()?;
    log::debug!("Configuration: {config:?}");

    let docker = runtime::DockerRuntime::connect(&config.docker_socket)?;
    let runtime = Arc::new(runtime::RuntimeAdapter::new(docker, config.runtime_timeout));

    let classifier: Arc<dyn Classifier> = match &config.classifier_rules {
        Some(path) => Arc::new(RuleClassifier::from_file(path)?),
        None => Arc::new(RuleClassifier::default()),
    };

    let inventory = inventory::InventoryCache::new(Arc::clone(&runtime), classifier);

    if let Some(snapshot) = inventory.refresh().await.ok_log() {
        log::info!("Initial inventory contains {} containers", snapshot.len());
    }
    inventory.spawn_periodic_refresh(config.refresh_interval);

    let mut exporters =
        exporter::ExporterOrchestrator::new(Arc::clone(&runtime), inventory.clone());
    if let Some(url) = &config.database_url {
        let persister = persistence::MySqlConfigPersister::connect(url).await?;
        exporters = exporters.with_persister(persister);
        exporters.restore().await?;
    }

    let state = api::AppState {
        runtime,
        inventory,
        exporters: Arc::new(exporters),
    };
    api::APIServer::new(state).listen(config.listen_addr).await?;
    Ok(())
}
