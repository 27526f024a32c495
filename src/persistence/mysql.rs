use std::time::Duration;

use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

use crate::container::ContainerID;
use crate::exporter::{ExporterConfig, ExporterState};

use super::{ConfigPersister, Error, ExporterConfigRow, Result};

#[derive(Debug, Clone)]
pub struct MySqlConfigPersister {
    db: MySqlPool,
}

impl MySqlConfigPersister {
    pub fn new(db: MySqlPool) -> Self {
        Self { db }
    }

    /// Connects to `url` and applies the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an `Error::ConnectionError` if the database is unreachable and an
    /// `Error::MigrationError` if the schema cannot be brought up to date.
    pub async fn connect(url: &str) -> Result<Self> {
        let db = MySqlPoolOptions::new()
            .acquire_timeout(Duration::from_secs(10))
            .max_connections(10)
            .connect(url)
            .await
            .map_err(Error::ConnectionError)?;
        sqlx::migrate!().run(&db).await.map_err(Error::MigrationError)?;
        log::debug!("Connected to exporter config database");

        Ok(Self::new(db))
    }

    /// Returns the most recently generated config of a container.
    pub async fn latest_for(
        &self,
        container_id: &ContainerID,
    ) -> Result<Option<ExporterConfigRow>> {
        const SELECT_QUERY: &str = r#"
SELECT
    config_id, container_id, container_name, stack, exporter_image,
    exporter_port, job_name, version, state, host_port, config
FROM exporter_configs
WHERE container_id = ?
ORDER BY config_id DESC
LIMIT 1
"#;
        sqlx::query_as::<_, ExporterConfigRow>(SELECT_QUERY)
            .bind(container_id.as_str())
            .fetch_optional(&self.db)
            .await
            .map_err(Error::ReadError)
    }
}

impl ConfigPersister for MySqlConfigPersister {
    /// Inserts a generated config.
    ///
    /// # Arguments
    ///
    /// * `config_id` - Identifier handed out to the client for this config.
    /// * `config` - The generated config; stored as JSON next to its searchable columns.
    /// * `state` - Activation state at generation time.
    ///
    /// # Errors
    ///
    /// Returns an `Error::EncodeError` if the config cannot be serialized and an
    /// `Error::WriteError` if the insert fails.
    async fn persist_config(
        &self,
        config_id: u64,
        config: &ExporterConfig,
        state: ExporterState,
    ) -> Result<()> {
        const INSERT_QUERY: &str = r#"
INSERT INTO exporter_configs (
    config_id, container_id, container_name, stack, exporter_image,
    exporter_port, job_name, version, state, host_port, config
) VALUES (
    ?, ?, ?, ?, ?,
    ?, ?, ?, ?, ?, ?
)
"#;
        let row = ExporterConfigRow::new(config_id, config, state).map_err(Error::EncodeError)?;
        sqlx::query(INSERT_QUERY)
            .bind(row.config_id)
            .bind(row.container_id.as_str())
            .bind(row.container_name)
            .bind(row.stack)
            .bind(row.exporter_image)
            .bind(row.exporter_port)
            .bind(row.job_name)
            .bind(row.version)
            .bind(row.state)
            .bind(row.host_port)
            .bind(row.config)
            .execute(&self.db)
            .await
            .map_err(Error::WriteError)?;

        Ok(())
    }

    async fn persist_state(
        &self,
        config_id: u64,
        state: ExporterState,
        host_port: Option<u16>,
    ) -> Result<()> {
        const UPDATE_QUERY: &str = r#"
UPDATE exporter_configs
SET state = ?, host_port = ?
WHERE config_id = ?
"#;
        sqlx::query(UPDATE_QUERY)
            .bind(state.as_str())
            .bind(host_port)
            .bind(config_id)
            .execute(&self.db)
            .await
            .map_err(Error::WriteError)?;

        Ok(())
    }

    async fn last_config_id(&self) -> Result<u64> {
        let last: Option<u64> = sqlx::query_scalar("SELECT MAX(config_id) FROM exporter_configs")
            .fetch_one(&self.db)
            .await
            .map_err(Error::ReadError)?;
        Ok(last.unwrap_or_default())
    }

    async fn latest_configs(&self) -> Result<Vec<ExporterConfigRow>> {
        const SELECT_QUERY: &str = r#"
SELECT
    config_id, container_id, container_name, stack, exporter_image,
    exporter_port, job_name, version, state, host_port, config
FROM exporter_configs AS c
WHERE config_id = (
    SELECT MAX(config_id) FROM exporter_configs WHERE container_id = c.container_id
)
ORDER BY config_id
"#;
        sqlx::query_as::<_, ExporterConfigRow>(SELECT_QUERY)
            .fetch_all(&self.db)
            .await
            .map_err(Error::ReadError)
    }
}
