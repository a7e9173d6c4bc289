use async_trait::async_trait;
use hiboss_core::types::ParseMode;

/// Rendering hints attached to an outbound message.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub parse_mode: Option<ParseMode>,
    pub reply_to_message_id: Option<String>,
}

/// An attachment to push outbound, resolved to local bytes by the caller.
#[derive(Debug, Clone)]
pub struct AttachmentToSend {
    pub source: String,
    pub filename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub channel_message_id: String,
}

/// Collaborator interface. The daemon calls `sendText` /
/// `sendAttachment` for envelopes addressed to `channel:<platform>:<chatId>`,
/// and hands every inbound message it receives to `Router::route_envelope`
/// with `from = channel:<platform>:<chatId>`.
///
/// Implementations must be safe to call concurrently from multiple tasks
///.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    fn platform(&self) -> &str;

    async fn start(&self) -> Result<(), AdapterError>;
    async fn stop(&self) -> Result<(), AdapterError>;

    async fn send_text(&self, chat_id: &str, text: &str, options: &SendOptions) -> Result<SendResult, AdapterError>;
    async fn send_attachment(
        &self,
        chat_id: &str,
        attachment: &AttachmentToSend,
        options: &SendOptions,
    ) -> Result<SendResult, AdapterError>;

    /// Optional — not every platform supports reactions.
    async fn set_reaction(&self, _chat_id: &str, _channel_message_id: &str, _emoji: &str) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("reactions not supported by this adapter".to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("adapter transport error: {0}")]
    Transport(String),
    #[error("adapter rejected the request: {0}")]
    Rejected(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}
