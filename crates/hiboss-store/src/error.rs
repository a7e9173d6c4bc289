use thiserror::Error;

/// Store-layer failure kinds Callers (RPC handlers) map
/// these onto the wire `ErrorKind` defined in `hiboss-core`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("store io error: {0}")]
    Io(#[from] rusqlite::Error),
}

impl From<StoreError> for hiboss_core::ErrorKind {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => hiboss_core::ErrorKind::NotFound(m),
            StoreError::AlreadyExists(m) => hiboss_core::ErrorKind::AlreadyExists(m),
            StoreError::InvalidInput(m) => hiboss_core::ErrorKind::InvalidParams(m),
            StoreError::Invariant(m) => hiboss_core::ErrorKind::Internal(m),
            StoreError::Io(e) => hiboss_core::ErrorKind::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
