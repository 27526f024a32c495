mod error;
mod models;
mod mysql;
mod persister;

pub use error::{Error, Result};
pub use models::ExporterConfigRow;
pub use mysql::MySqlConfigPersister;
pub use persister::ConfigPersister;
