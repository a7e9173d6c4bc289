//! C9 AgentExecutor — per-agent turn loop, provider CLI
//! invocation, cancellation, and session refresh requests.

pub mod error;
pub mod executor;
pub mod provider;
pub mod turn;

pub use error::{ExecutorError, Result};
pub use executor::AgentExecutor;
pub use provider::{ChildSlot, ClaudeCliRunner, CodexCliRunner, ProviderRunner, TurnContext, TurnResult, TurnStatus};
pub use turn::render_turn_input;
