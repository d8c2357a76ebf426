use thiserror::Error;

use crate::backend::{FetchError, PayloadError};
use crate::resolver::MapError;
use crate::session::LoadError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("callchain mappings lack the {0:?} category")]
    MissingCategory(&'static str),
    #[error("no session is selected")]
    NoSession,
    #[error("unknown timeline group {0:?}")]
    UnknownGroup(String),
    #[error("unknown window {0:?}")]
    UnknownWindow(String),
    #[error("unsupported analysis {0:?}")]
    UnknownAnalysis(String),
    #[error("window {window:?} is not a {expected} window")]
    WrongPanel {
        window: String,
        expected: &'static str,
    },
    #[error("no source index for {0:?}")]
    NoSource(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
