use shared::error::ApiException;
use thiserror::Error;

/// Failure of a single call to the modeller API.
#[derive(Debug, Error)]
pub enum ApiCallError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Api(#[from] ApiException),
    #[error("status {status}: no JSON content could be decoded")]
    Status { status: u16 },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl ApiCallError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(err) => Some(err.status),
            Self::Status { status } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Text for the blocking alert shown to the user.
    pub fn alert_text(&self) -> String {
        match self {
            Self::Api(err) => format!(
                "An API error occurred!\n\nStatus: {}\n{}",
                err.status, err.message
            ),
            Self::Status { status } => format!(
                "An API error occurred!\n\nStatus: {status}\nNo JSON content could be decoded."
            ),
            other => format!("An API error occurred!\n\n{other}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModellerError {
    #[error(transparent)]
    Api(#[from] ApiCallError),
    #[error("a model run is already in progress")]
    JobInProgress,
    #[error("the map extent is not known yet")]
    MissingViewport,
    #[error("no model configuration has been selected")]
    MissingConfiguration,
    #[error("{0}")]
    UnavailableSelection(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("Failed to connect/authenticate to the modeller API.")]
    NotAuthenticated,
    #[error("the model cannot be run right now: {0}")]
    RunNotPermitted(String),
}

impl ModellerError {
    /// Text for the blocking alert shown to the user.
    pub fn alert_text(&self) -> String {
        match self {
            Self::Api(err) => err.alert_text(),
            Self::NotAuthenticated => format!("An API error occurred!\n\n{self}"),
            other => other.to_string(),
        }
    }
}
