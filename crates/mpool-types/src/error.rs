use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("unknown open mode: {0}")]
    UnknownOpenMode(String),

    #[error("unknown media class: {0}")]
    UnknownMediaClass(String),
}
