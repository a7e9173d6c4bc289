//! Reference `ChatAdapter` implementation for Telegram: a `getUpdates`
//! long-poll loop. This is a thin, best-effort reference, not a complete
//! Bot API client — attachment download and full reaction support are left
//! to a fuller adapter.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterError, AttachmentToSend, ChatAdapter, SendOptions, SendResult};

/// Inbound message handed to the daemon's `Router::route_envelope` path.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: String,
    pub text: Option<String>,
    pub author: Option<String>,
    pub channel_message_id: String,
    pub reply_to_message_id: Option<String>,
}

/// Callback invoked for every inbound message this adapter receives.
pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

pub struct TelegramAdapter {
    bot_token: String,
    client: reqwest::Client,
    on_message: InboundHandler,
    running: Arc<AtomicBool>,
    offset: Arc<AtomicI64>,
    poll_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TelegramAdapter {
    pub fn new(bot_token: impl Into<String>, on_message: InboundHandler) -> Self {
        Self {
            bot_token: bot_token.into(),
            client: reqwest::Client::new(),
            on_message,
            running: Arc::new(AtomicBool::new(false)),
            offset: Arc::new(AtomicI64::new(0)),
            poll_task: std::sync::Mutex::new(None),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    async fn poll_once(&self) -> Result<(), AdapterError> {
        #[derive(Deserialize)]
        struct UpdatesResponse {
            ok: bool,
            result: Vec<Update>,
        }
        #[derive(Deserialize)]
        struct Update {
            update_id: i64,
            message: Option<Message>,
        }
        #[derive(Deserialize)]
        struct Message {
            message_id: i64,
            chat: Chat,
            text: Option<String>,
            from: Option<From>,
            reply_to_message: Option<Box<Message>>,
        }
        #[derive(Deserialize)]
        struct Chat {
            id: i64,
        }
        #[derive(Deserialize)]
        struct From {
            username: Option<String>,
            first_name: String,
        }

        let offset = self.offset.load(Ordering::SeqCst);
        let resp = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[("timeout", "25"), ("offset", &offset.to_string())])
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?
            .json::<UpdatesResponse>()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        if !resp.ok {
            return Err(AdapterError::Rejected("getUpdates returned ok=false".to_string()));
        }

        for update in resp.result {
            self.offset.store(update.update_id + 1, Ordering::SeqCst);
            let Some(msg) = update.message else { continue };
            let author = msg.from.map(|f| f.username.unwrap_or(f.first_name));
            (self.on_message)(InboundMessage {
                chat_id: msg.chat.id.to_string(),
                text: msg.text,
                author,
                channel_message_id: msg.message_id.to_string(),
                reply_to_message_id: msg.reply_to_message.map(|m| m.message_id.to_string()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatAdapter for TelegramAdapter {
    fn platform(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let running = self.running.clone();
        let client = self.client.clone();
        let token = self.bot_token.clone();
        let offset = self.offset.clone();
        let on_message = self.on_message.clone();
        let adapter = Arc::new(TelegramAdapter {
            bot_token: token,
            client,
            on_message,
            running: running.clone(),
            offset,
            poll_task: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(async move {
            info!("telegram adapter: poll loop started");
            while running.load(Ordering::SeqCst) {
                if let Err(e) = adapter.poll_once().await {
                    warn!(error = %e, "telegram getUpdates failed, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
            debug!("telegram adapter: poll loop exited");
        });
        *self.poll_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poll_task.lock().unwrap().take() {
            handle.abort();
        }
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str, options: &SendOptions) -> Result<SendResult, AdapterError> {
        let parse_mode = options.parse_mode.as_ref().and_then(|m| match m {
            hiboss_core::types::ParseMode::Plain => None,
            hiboss_core::types::ParseMode::Markdownv2 => Some("MarkdownV2"),
            hiboss_core::types::ParseMode::Html => Some("HTML"),
        });
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
        if let Some(pm) = parse_mode {
            body["parse_mode"] = serde_json::Value::String(pm.to_string());
        }
        if let Some(reply_id) = &options.reply_to_message_id {
            body["reply_to_message_id"] = serde_json::Value::String(reply_id.clone());
        }

        let resp: serde_json::Value = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        if resp.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(AdapterError::Rejected(resp.to_string()));
        }
        let message_id = resp
            .pointer("/result/message_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AdapterError::Rejected("sendMessage response missing message_id".to_string()))?;
        Ok(SendResult {
            channel_message_id: message_id.to_string(),
        })
    }

    async fn send_attachment(
        &self,
        chat_id: &str,
        attachment: &AttachmentToSend,
        _options: &SendOptions,
    ) -> Result<SendResult, AdapterError> {
        // Thin reference implementation: only `sendDocument` by URL/file_id
        // is supported; local-path attachment upload is left to a fuller
        // adapter implementation (out of scope here).
        let resp: serde_json::Value = self
            .client
            .post(self.api_url("sendDocument"))
            .json(&serde_json::json!({ "chat_id": chat_id, "document": attachment.source }))
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        if resp.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(AdapterError::Rejected(resp.to_string()));
        }
        let message_id = resp
            .pointer("/result/message_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AdapterError::Rejected("sendDocument response missing message_id".to_string()))?;
        Ok(SendResult {
            channel_message_id: message_id.to_string(),
        })
    }

    async fn set_reaction(&self, chat_id: &str, channel_message_id: &str, emoji: &str) -> Result<(), AdapterError> {
        let resp: serde_json::Value = self
            .client
            .post(self.api_url("setMessageReaction"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "message_id": channel_message_id,
                "reaction": [{ "type": "emoji", "emoji": emoji }],
            }))
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        if resp.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(AdapterError::Rejected(resp.to_string()));
        }
        Ok(())
    }
}
