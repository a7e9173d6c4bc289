use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Core(#[from] hiboss_core::ErrorKind),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("cron schedule is exhausted: no future fire time")]
    Exhausted,
}

impl From<SchedulerError> for hiboss_core::ErrorKind {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Core(k) => k,
            SchedulerError::InvalidCron { expr, reason } => {
                hiboss_core::ErrorKind::InvalidParams(format!("invalid cron expression '{expr}': {reason}"))
            }
            SchedulerError::InvalidTimezone(tz) => {
                hiboss_core::ErrorKind::InvalidParams(format!("unknown timezone '{tz}'"))
            }
            SchedulerError::Exhausted => {
                hiboss_core::ErrorKind::Internal("cron schedule is exhausted: no future fire time".to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
