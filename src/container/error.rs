#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid container id: `{0}`")]
    InvalidContainerID(String),
    #[error("container id must not be empty")]
    EmptyContainerID,
}
pub type Result<T> = std::result::Result<T, Error>;
