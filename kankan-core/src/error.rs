use thiserror::Error;

/// Errors raised while merging or decoding replicated state.
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    #[error("malformed update or state vector: {0}")]
    Decode(String),

    #[error("failed to apply update: {0}")]
    Apply(String),
}

impl From<yrs::encoding::read::Error> for DocumentError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        DocumentError::Decode(e.to_string())
    }
}
