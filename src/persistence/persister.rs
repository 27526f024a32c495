use crate::exporter::{ExporterConfig, ExporterState};

use super::{ExporterConfigRow, Result};

pub trait ConfigPersister: Send + Sync {
    /// Stores a generated config under `config_id`.
    fn persist_config(
        &self,
        config_id: u64,
        config: &ExporterConfig,
        state: ExporterState,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Records an activation state change of the config stored under `config_id`.
    fn persist_state(
        &self,
        config_id: u64,
        state: ExporterState,
        host_port: Option<u16>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns the highest stored config id, or 0 if nothing was stored yet.
    fn last_config_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Returns the most recently generated config of every container.
    fn latest_configs(&self) -> impl Future<Output = Result<Vec<ExporterConfigRow>>> + Send;
}
