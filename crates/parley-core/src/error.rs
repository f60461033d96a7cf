//! Error types for parley-core

use thiserror::Error;

/// Result type alias using parley-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the backend layer
    #[error(transparent)]
    Api(#[from] parley_api::Error),

    /// The same message id arrived with a contradictory kind or thread
    #[error("Duplicate id with contradictory identity: {id}")]
    DuplicateIdMismatch { id: String },

    /// Submit rejected: no text and no usable attachments
    #[error("Nothing to submit")]
    EmptySubmit,

    /// A generic core error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this wraps a classified billing/limit backend error
    pub fn is_limit(&self) -> bool {
        match self {
            Error::Api(e) => e.is_limit(),
            _ => false,
        }
    }
}
