//! The `ChatAdapter` collaborator contract and a registry
//! that looks adapters up by platform name. The core daemon treats an
//! adapter as a thin, pluggable boundary — it only ever calls the methods
//! below; attachment download, message parsing, and rate limiting are each
//! adapter's own concern.

pub mod adapter;
pub mod registry;
pub mod telegram;

pub use adapter::{AttachmentToSend, ChatAdapter, SendOptions, SendResult};
pub use registry::AdapterRegistry;
pub use telegram::TelegramAdapter;
