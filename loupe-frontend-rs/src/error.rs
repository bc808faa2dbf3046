//! The error surface of every remote operation.
//!
//! Every gateway call returns `Result<_, RemoteError>`; nothing is swallowed
//! and "no result" is never used to signal failure. The kind is derived from
//! the HTTP status (or the absence of a response) so callers can distinguish
//! at least the four classes they react to differently.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The request never produced an HTTP response.
    Network,
    NotFound,
    /// The backend rejected the request, or the request was malformed locally.
    Validation,
    Server,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::Network => "network",
            RemoteErrorKind::NotFound => "not_found",
            RemoteErrorKind::Validation => "validation",
            RemoteErrorKind::Server => "server",
        }
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed remote operation. `Clone` because in-flight query results are
/// shared between concurrent readers, failures included.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[error("remote {kind} failure: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Validation, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Server, message)
    }

    /// Classify an HTTP error status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 => RemoteErrorKind::NotFound,
            400..=499 => RemoteErrorKind::Validation,
            _ => RemoteErrorKind::Server,
        };
        Self::new(kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(RemoteError::from_status(404, "").kind, RemoteErrorKind::NotFound);
        assert_eq!(RemoteError::from_status(400, "").kind, RemoteErrorKind::Validation);
        assert_eq!(RemoteError::from_status(401, "").kind, RemoteErrorKind::Validation);
        assert_eq!(RemoteError::from_status(500, "").kind, RemoteErrorKind::Server);
        assert_eq!(RemoteError::from_status(503, "").kind, RemoteErrorKind::Server);
    }

    #[test]
    fn test_display_names_the_kind() {
        let error = RemoteError::network("fetch aborted");
        assert_eq!(error.to_string(), "remote network failure: fetch aborted");
    }
}
