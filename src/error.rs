use kube_core::ErrorResponse;
use thiserror::Error;

/// Errors raised while listing or watching a collection.
///
/// Everything except [`Error::Decode`] ends the current list or watch attempt;
/// the reflector decides whether to resume, relist or back off.
#[derive(Debug, Error)]
pub enum Error {
    #[error("request to the API server failed: {0}")]
    Transport(#[source] kube_client::Error),

    #[error("API server rejected the watch: {} ({})", .0.message, .0.code)]
    Api(ErrorResponse),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource version too old: {0}")]
    StaleVersion(String),

    #[error("failed to decode object: {0}")]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Classifies an API server status response.
    pub fn from_status(status: ErrorResponse) -> Self {
        match status.code {
            404 => Self::NotFound(status.message),
            410 => Self::StaleVersion(status.message),
            _ => Self::Api(status),
        }
    }
}

impl From<kube_client::Error> for Error {
    fn from(err: kube_client::Error) -> Self {
        match err {
            kube_client::Error::Api(status) if matches!(status.code, 404 | 410) => {
                Self::from_status(status)
            }
            err => Self::Transport(err),
        }
    }
}

/// A payload that does not have the shape expected for the watched kind.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("object has no name")]
    MissingName,

    #[error("object has no resource version")]
    MissingResourceVersion,

    #[error("resource version {0:?} is not a revision number")]
    InvalidResourceVersion(String),

    #[error("object is not a valid {kind}: {source}")]
    Shape {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
