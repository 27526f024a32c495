#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to database: {0}")]
    ConnectionError(#[source] sqlx::Error),
    #[error("failed to run initial migration: {0}")]
    MigrationError(#[source] sqlx::migrate::MigrateError),
    #[error("failed to encode exporter config: {0}")]
    EncodeError(#[source] serde_json::Error),
    #[error("failed to write exporter config: {0}")]
    WriteError(#[source] sqlx::Error),
    #[error("failed to read exporter configs: {0}")]
    ReadError(#[source] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
