use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Core(#[from] hiboss_core::ErrorKind),

    /// The envelope was persisted but the channel adapter rejected the
    /// send — `envelope_id` lets the caller (and the envelope scheduler)
    /// retry later ( step 3).
    #[error("adapter send failed for envelope {envelope_id}: {source}")]
    AdapterSendFailed {
        envelope_id: String,
        #[source]
        source: hiboss_channels::adapter::AdapterError,
    },
}

impl RouteError {
    /// The persisted envelope id, if this failure still produced one.
    pub fn envelope_id(&self) -> Option<&str> {
        match self {
            RouteError::AdapterSendFailed { envelope_id, .. } => Some(envelope_id),
            RouteError::Core(_) => None,
        }
    }
}

impl From<RouteError> for hiboss_core::ErrorKind {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::Core(k) => k,
            RouteError::AdapterSendFailed { envelope_id, source } => {
                hiboss_core::ErrorKind::Internal(format!("envelope {envelope_id}: {source}"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RouteError>;
