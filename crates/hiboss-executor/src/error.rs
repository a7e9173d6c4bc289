use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Core(#[from] hiboss_core::ErrorKind),

    #[error(transparent)]
    Store(#[from] hiboss_store::StoreError),

    #[error(transparent)]
    Session(#[from] hiboss_sessions::SessionError),

    #[error("provider CLI unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider CLI exited with a non-zero status: {0}")]
    ProviderFailed(String),

    #[error("turn was cancelled")]
    Cancelled,

    #[error("failed to parse provider CLI output: {0}")]
    ProviderParse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecutorError> for hiboss_core::ErrorKind {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Core(k) => k,
            ExecutorError::Store(e) => e.into(),
            ExecutorError::Session(e) => e.into(),
            ExecutorError::ProviderUnavailable(m) => {
                hiboss_core::ErrorKind::Internal(format!("provider CLI unavailable: {m}"))
            }
            ExecutorError::ProviderFailed(m) => {
                hiboss_core::ErrorKind::Internal(format!("provider CLI failed: {m}"))
            }
            ExecutorError::ProviderParse(m) => {
                hiboss_core::ErrorKind::Internal(format!("failed to parse provider CLI output: {m}"))
            }
            ExecutorError::Cancelled => hiboss_core::ErrorKind::Internal("turn was cancelled".to_string()),
            ExecutorError::Io(e) => hiboss_core::ErrorKind::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
