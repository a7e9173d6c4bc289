use thiserror::Error;

/// Errors raised while resolving or mutating per-agent provider session state
///.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] hiboss_store::StoreError),

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
}

impl From<SessionError> for hiboss_core::ErrorKind {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Store(e) => e.into(),
            SessionError::InvalidTimezone(tz) => hiboss_core::ErrorKind::Internal(format!("invalid timezone: {tz}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
