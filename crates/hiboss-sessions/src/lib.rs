//! C8 SessionManager — per-agent provider session identity,
//! open-vs-resume decisions, and refresh policies.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{Result, SessionError};
pub use manager::SessionManager;
pub use types::{OpenMode, SessionHandle};
