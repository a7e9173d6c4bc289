use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<MemoryError> for hiboss_core::ErrorKind {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Database(e) => hiboss_core::ErrorKind::Internal(e.to_string()),
            MemoryError::NotFound(m) => hiboss_core::ErrorKind::NotFound(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
