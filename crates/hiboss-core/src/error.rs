use thiserror::Error;

/// The small set of error shapes every crate's domain error converges to at
/// the RPC boundary (`hiboss-daemon` maps these to wire codes, see §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("ambiguous id prefix: {0}")]
    AmbiguousIdPrefix(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// JSON-RPC wire code for this kind/§7.
    pub fn wire_code(&self) -> i64 {
        match self {
            ErrorKind::InvalidParams(_) => -32602,
            ErrorKind::Unauthorized(_) => -32001,
            ErrorKind::NotFound(_) => -32002,
            ErrorKind::AlreadyExists(_) => -32003,
            ErrorKind::AmbiguousIdPrefix(_) => -32602,
            ErrorKind::Internal(_) => -32603,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, ErrorKind>;
