use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod error;
mod model;
pub(crate) mod utils;

pub use error::{Error, Result};
pub use model::{
    Container, ContainerConfig, ContainerState, ContainerStatus, EmptyObject, EndpointSettings,
    HostConfig, NetworkSettings, PortBinding,
};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 128;

/// The length of the abbreviated id shown by the Docker CLI.
pub const SHORT_ID_LEN: usize = 12;

/// A validated container reference: an engine id, an id prefix or a container name.
///
/// # Examples
///
/// ```
/// # use stackscout::container::{ContainerID, Error};
/// let raw_id = "abc123abc123abc123abc123abc123abc123abc123abc123abc123abc123abcd";
/// let container_id = ContainerID::new(raw_id).unwrap();
/// assert_eq!(container_id.as_ref(), "abc123abc123abc123abc123abc123abc123abc123abc123abc123abc123abcd");
/// assert!(ContainerID::new("../../etc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyContainerID`] for empty input and [`Error::InvalidContainerID`]
    /// if the input exceeds [`CONTAINER_ID_MAX_LEN`] or contains characters outside of
    /// `[a-zA-Z0-9_.-]` (or does not start with an alphanumeric character).
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() {
            return Err(Error::EmptyContainerID);
        }
        if src.len() > CONTAINER_ID_MAX_LEN || !utils::is_valid_reference(src.as_bytes()) {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first [`SHORT_ID_LEN`] characters of the id.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(SHORT_ID_LEN);
        &self.0[..end]
    }
}

impl FromStr for ContainerID {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for ContainerID {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ContainerID {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <std::borrow::Cow<'de, str> as serde::Deserialize>::deserialize(deserializer)?;
        ContainerID::new(raw.as_ref()).map_err(serde::de::Error::custom)
    }
}
