//! ---
//! vnfm_section: "05-external-interfaces"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Remote call failures surfaced by the service clients."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::path::PathBuf;

/// Result alias used throughout the client crate.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Failure of a single call against the orchestration service or image store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The addressed object does not exist (HTTP 404).
    #[error("{what} not found")]
    NotFound {
        /// Human readable description of the missing object.
        what: String,
    },
    /// The service answered with an unexpected HTTP status.
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        /// HTTP method of the failed request.
        method: String,
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The request never produced a response (connect, timeout, reset).
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// The response body did not match the expected shape.
    #[error("malformed response from {url}: {source}")]
    Decode {
        /// Request URL.
        url: String,
        /// Underlying decoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// Local upload data could not be opened.
    #[error("unable to read upload source {}: {source}", path.display())]
    Source {
        /// File that was being uploaded.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A request URL could not be built from the configured endpoint.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

impl RemoteError {
    /// True when the addressed object is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }

    /// True for failures where no response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Transport(err)
    }
}
