use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No such key: {key}")]
    NotFound { key: String },

    #[error("Invalid storage key: {key:?}")]
    InvalidKey { key: String },

    #[error("Storage transport error: {0}")]
    Transport(String),

    #[error("Storage service error ({code}): {message}")]
    Service { code: String, message: String },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse storage response: {0}")]
    Parse(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
