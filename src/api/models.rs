use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::container::ContainerID;
use crate::error::{Error, ErrorKind, Result, StepStatus};

/// `?id=` of the lifecycle endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct IdParams {
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveParams {
    pub id: Option<String>,
    pub force: Option<String>,
}

/// `?container_id=` of the exporter endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ContainerParams {
    pub container_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpExporterParams {
    pub container_id: Option<String>,
    pub port: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepStatus>>,
}

/// Renders an [`Error`] as `{kind, message}` with the status code of its kind.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        Self(value)
    }
}

pub fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::PartialFailure | ErrorKind::Runtime => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_code(kind);
        if status.is_server_error() {
            log::error!("{}", self.0);
        } else {
            log::debug!("Rejected request: {}", self.0);
        }

        let message = self.0.to_string();
        let steps = match self.0 {
            Error::PartialFailure { steps, .. } => Some(steps),
            _ => None,
        };
        (
            status,
            Json(ErrorBody {
                kind,
                message,
                steps,
            }),
        )
            .into_response()
    }
}

pub fn required(name: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
        _ => Err(Error::Validation(format!(
            "missing required parameter `{name}`"
        ))),
    }
}

pub fn parse_id(name: &str, value: Option<String>) -> Result<ContainerID> {
    let raw = required(name, value)?;
    ContainerID::new(&raw)
        .map_err(|err| Error::Validation(format!("invalid parameter `{name}`: {err}")))
}

pub fn parse_port(value: Option<String>) -> Result<u16> {
    let raw = required("port", value)?;
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::Validation(format!(
            "invalid parameter `port`: `{raw}` is not in 1..=65535"
        ))),
    }
}

pub fn parse_flag(name: &str, value: Option<String>) -> Result<bool> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(raw) if raw.eq_ignore_ascii_case("true") || raw == "1" => Ok(true),
        Some(raw) if raw.eq_ignore_ascii_case("false") || raw == "0" => Ok(false),
        Some(raw) => Err(Error::Validation(format!(
            "invalid parameter `{name}`: `{raw}` is not a boolean"
        ))),
    }
}
