//! The seam between the viewer and the profiling results server.

use profview_protocol::Request;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A failed round trip to the server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The server answered with a non-success HTTP status.
    #[error("HTTP {0}")]
    Status(u16),
    /// No usable reply (connection refused, timeout, unreadable body).
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            Self::Transport(_) => None,
        }
    }
}

/// A reply that arrived but could not be decoded.
#[derive(Debug, Error)]
#[error("malformed {what} payload: {source}")]
pub struct PayloadError {
    pub what: &'static str,
    #[source]
    pub source: serde_json::Error,
}

/// Posts requests for a session and returns the raw reply body.
///
/// Implemented over HTTP by the terminal front end and by scripted replies
/// in tests. The browser build drives the load state machine directly instead.
pub trait Backend {
    fn post(&mut self, session: &str, request: &Request) -> Result<String, FetchError>;
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn post(&mut self, session: &str, request: &Request) -> Result<String, FetchError> {
        (**self).post(session, request)
    }
}

/// Decode a JSON reply into its typed payload.
pub fn decode<T: DeserializeOwned>(what: &'static str, body: &str) -> Result<T, PayloadError> {
    serde_json::from_str(body).map_err(|source| PayloadError { what, source })
}
