use sqlx::error::BoxDynError;
use sqlx::mysql::{MySql, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Decode, Type};

use crate::container::ContainerID;
use crate::exporter::{ExporterConfig, ExporterState};

impl Type<MySql> for ContainerID {
    fn type_info() -> MySqlTypeInfo {
        <&str as Type<MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        <&str as Type<MySql>>::compatible(ty)
    }
}

impl<'r> Decode<'r, MySql> for ContainerID {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<MySql>>::decode(value)?;
        Ok(ContainerID::new(raw)?)
    }
}

/// A stored exporter config with its latest activation state.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExporterConfigRow {
    pub config_id: u64,
    pub container_id: ContainerID,
    pub container_name: String,
    pub stack: String,
    pub exporter_image: String,
    pub exporter_port: u16,
    pub job_name: String,
    pub version: u32,
    pub state: String,
    pub host_port: Option<u16>,
    pub config: String,
}

impl ExporterConfigRow {
    /// Builds the row stored for a freshly generated config.
    pub fn new(
        config_id: u64,
        config: &ExporterConfig,
        state: ExporterState,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            config_id,
            container_id: config.container_id.clone(),
            container_name: config.container_name.clone(),
            stack: config.stack.clone(),
            exporter_image: config.exporter_image.clone(),
            exporter_port: config.exporter_port,
            job_name: config.job_name.clone(),
            version: config.version,
            state: state.as_str().to_owned(),
            host_port: config.host_port,
            config: serde_json::to_string(config)?,
        })
    }

    /// Parses the stored state; unknown values read as inactive.
    pub fn exporter_state(&self) -> ExporterState {
        match self.state.as_str() {
            "active" => ExporterState::Active,
            _ => ExporterState::Inactive,
        }
    }

    pub fn decode_config(&self) -> serde_json::Result<ExporterConfig> {
        serde_json::from_str(&self.config)
    }
}
