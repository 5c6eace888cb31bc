use kv_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("unknown permission: {0}")]
    UnknownPermission(String),

    #[error("invalid role name: {0}")]
    InvalidRole(String),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed record at {key}: {source}")]
    Codec {
        key: String,
        source: serde_json::Error,
    },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AccessError {
    /// True for errors raised by input validation before any I/O, as
    /// opposed to backend (storage/codec) failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AccessError::InvalidSubject(_)
                | AccessError::UnknownResourceType(_)
                | AccessError::UnknownPermission(_)
                | AccessError::InvalidRole(_)
                | AccessError::InvalidObjectId(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AccessError>;
