//! Startup configuration read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const LISTEN_ADDR_VAR: &str = "STACKSCOUT_LISTEN_ADDR";
pub const DOCKER_SOCKET_VAR: &str = "DOCKER_SOCKET";
pub const RUNTIME_TIMEOUT_VAR: &str = "STACKSCOUT_RUNTIME_TIMEOUT_SECS";
pub const CLASSIFIER_RULES_VAR: &str = "STACKSCOUT_CLASSIFIER_RULES";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const REFRESH_INTERVAL_VAR: &str = "STACKSCOUT_REFRESH_INTERVAL_SECS";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";
const DEFAULT_RUNTIME_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value `{value}` for `{var}`: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub docker_socket: PathBuf,
    pub runtime_timeout: Duration,
    /// Period of the background inventory refresh.
    pub refresh_interval: Duration,
    /// JSON rules file replacing the built-in classifier rules.
    pub classifier_rules: Option<PathBuf>,
    /// Enables persistence of exporter configs when set.
    pub database_url: Option<String>,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a variable if set.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if a variable is set to an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup(LISTEN_ADDR_VAR).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned());
        let listen_addr = listen_addr
            .parse()
            .map_err(|err: std::net::AddrParseError| Error::InvalidValue {
                var: LISTEN_ADDR_VAR,
                value: listen_addr.clone(),
                reason: err.to_string(),
            })?;

        let docker_socket = match lookup(DOCKER_SOCKET_VAR) {
            Some(path) if path.trim().is_empty() => return Err(Error::Empty(DOCKER_SOCKET_VAR)),
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_DOCKER_SOCKET),
        };

        let runtime_timeout = seconds(&lookup, RUNTIME_TIMEOUT_VAR, DEFAULT_RUNTIME_TIMEOUT_SECS)?;
        let refresh_interval =
            seconds(&lookup, REFRESH_INTERVAL_VAR, DEFAULT_REFRESH_INTERVAL_SECS)?;

        let non_empty = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        Ok(Self {
            listen_addr,
            docker_socket,
            runtime_timeout,
            refresh_interval,
            classifier_rules: non_empty(CLASSIFIER_RULES_VAR).map(PathBuf::from),
            database_url: non_empty(DATABASE_URL_VAR),
        })
    }
}

/// Reads a positive number of seconds.
fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration> {
    let Some(raw) = lookup(var) else {
        return Ok(Duration::from_secs(default));
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|err: std::num::ParseIntError| Error::InvalidValue {
            var,
            value: raw.clone(),
            reason: err.to_string(),
        })?;
    if secs == 0 {
        return Err(Error::InvalidValue {
            var,
            value: raw,
            reason: "must be at least one second".to_owned(),
        });
    }
    Ok(Duration::from_secs(secs))
}
