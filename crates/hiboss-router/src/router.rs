use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use hiboss_channels::registry::AdapterRegistry;
use hiboss_channels::{AttachmentToSend, SendOptions};
use hiboss_core::hooks::{AgentWaker, EnvelopeDispatcher, ReplyDispatcher};
use hiboss_core::time::now_ms;
use hiboss_core::types::{Attachment, Envelope, EnvelopeMetadata, ParseMode};
use hiboss_core::Address;
use hiboss_core::ids::new_id;
use hiboss_core::ErrorKind;
use hiboss_store::{NewEnvelope, Store};

use crate::error::{RouteError, Result};

/// Input to `Router::route_envelope`. `id` lets a retrying
/// caller make the send idempotent.
#[derive(Debug, Clone, Default)]
pub struct RouteEnvelopeInput {
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    pub from_boss: bool,
    pub content_text: Option<String>,
    pub content_attachments: Vec<Attachment>,
    pub metadata: Option<EnvelopeMetadata>,
    pub deliver_at: Option<i64>,
}

/// C5. Validates, persists, then dispatches new envelopes —
/// the single entry point both `envelope.send` and the two schedulers go
/// through to deliver a pending envelope.
pub struct Router {
    store: Arc<Store>,
    adapters: AdapterRegistry,
    waker: Arc<dyn AgentWaker>,
}

impl Router {
    pub fn new(store: Arc<Store>, adapters: AdapterRegistry, waker: Arc<dyn AgentWaker>) -> Self {
        Self { store, adapters, waker }
    }

    #[instrument(skip(self, input), fields(from = %input.from, to = %input.to))]
    pub async fn route_envelope(&self, input: RouteEnvelopeInput) -> Result<Envelope> {
        let from = Address::parse(&input.from)?;
        let to = Address::parse(&input.to)?;
        self.validate(&from, &to, &input)?;

        if let Some(deliver_at) = input.deliver_at {
            let now = now_ms();
            if deliver_at < now {
                return Err(RouteError::Core(ErrorKind::InvalidParams(format!(
                    "deliverAt {deliver_at} is before createdAt {now}"
                ))));
            }
        }

        let envelope = self
            .store
            .insert_envelope(NewEnvelope {
                id: input.id.clone().unwrap_or_else(new_id),
                from: from.format(),
                to: to.format(),
                from_boss: input.from_boss,
                content_text: input.content_text,
                content_attachments: input.content_attachments,
                metadata: input.metadata,
                deliver_at: input.deliver_at,
            })
            .map_err(ErrorKind::from)?;

        // The immediate-send path surfaces an adapter failure to the caller
        // ( step 3) — the envelope stays `pending` either way, so
        // a retry (by the caller or the EnvelopeScheduler) can still deliver
        // it; only the synchronous acknowledgement is an error here.
        self.dispatch_result(&envelope).await?;
        Ok(envelope)
    }

    /// Validation ( step 1): addresses already parsed by the
    /// caller; here we check the binding/metadata invariants that need
    /// the Store.
    fn validate(&self, from: &Address, to: &Address, input: &RouteEnvelopeInput) -> Result<()> {
        if let Address::Channel { adapter, .. } = to {
            let agent_name = from.agent_name().ok_or_else(|| {
                RouteError::Core(ErrorKind::InvalidParams(
                    "a channel destination requires from to be agent:<name>".to_string(),
                ))
            })?;
            let binding = self
                .store
                .get_agent_binding_by_type(agent_name, adapter)
                .map_err(ErrorKind::from)?;
            if binding.is_none() {
                return Err(RouteError::Core(ErrorKind::InvalidParams(format!(
                    "agent '{agent_name}' has no active binding to adapter '{adapter}'"
                ))));
            }
        } else if let Some(metadata) = &input.metadata {
            if metadata.parse_mode.is_some() || metadata.reply_to_message_id.is_some() {
                return Err(RouteError::Core(ErrorKind::InvalidParams(
                    "parseMode/replyToMessageId are only valid when to is a channel".to_string(),
                )));
            }
        }
        Ok(())
    }

    /// Dispatch ( step 3), swallowing an adapter failure into a
    /// `warn!` — correct for re-dispatch of an already-acknowledged envelope
    /// (the `EnvelopeScheduler`'s due-envelope sweep, the `CronScheduler`'s
    /// materialize-and-dispatch), where there is no synchronous caller left
    /// to hand the error to. The immediate `envelope.send` path must instead
    /// call `dispatch_result` directly so the caller observes the failure.
    #[instrument(skip(self, envelope), fields(id = %envelope.id, to = %envelope.to))]
    pub async fn dispatch(&self, envelope: &Envelope) {
        if let Err(e) = self.dispatch_result(envelope).await {
            warn!(envelope_id = %envelope.id, error = %e, "adapter send failed, envelope remains persisted for retry");
        }
    }

    /// Dispatch ( step 3), surfacing a channel-adapter failure to
    /// the caller instead of swallowing it. The envelope is already
    /// persisted by the time this runs, so the caller's error handling only
    /// decides what to tell its own caller — the envelope itself is left
    /// `pending` for a later retry regardless of the outcome here.
    async fn dispatch_result(&self, envelope: &Envelope) -> Result<()> {
        if envelope.deliver_at.is_some_and(|at| at > now_ms()) {
            return Ok(());
        }

        let to = Address::parse(&envelope.to).map_err(|e| {
            warn!(to = %envelope.to, "envelope has an unparseable destination, skipping dispatch");
            e
        })?;

        match to {
            Address::Agent(name) => {
                self.waker.wake(&name).await;
                Ok(())
            }
            Address::Channel { adapter, chat_id } => self.dispatch_to_channel(envelope, &adapter, &chat_id).await,
        }
    }

    async fn dispatch_to_channel(&self, envelope: &Envelope, adapter: &str, chat_id: &str) -> Result<()> {
        let Some(adapter_handle) = self.adapters.get(adapter) else {
            return Err(RouteError::Core(ErrorKind::Internal(format!(
                "no adapter registered for platform '{adapter}'"
            ))));
        };

        let options = SendOptions {
            parse_mode: envelope
                .metadata
                .as_ref()
                .and_then(|m| m.parse_mode)
                .or(Some(ParseMode::Plain)),
            reply_to_message_id: envelope
                .metadata
                .as_ref()
                .and_then(|m| m.reply_to_message_id.clone()),
        };

        if let Some(text) = &envelope.content_text {
            adapter_handle
                .send_text(chat_id, text, &options)
                .await
                .map_err(|source| RouteError::AdapterSendFailed {
                    envelope_id: envelope.id.clone(),
                    source,
                })?;
        }
        for attachment in &envelope.content_attachments {
            adapter_handle
                .send_attachment(
                    chat_id,
                    &AttachmentToSend {
                        source: attachment.source.clone(),
                        filename: attachment.filename.clone(),
                    },
                    &options,
                )
                .await
                .map_err(|source| RouteError::AdapterSendFailed {
                    envelope_id: envelope.id.clone(),
                    source,
                })?;
        }
        info!(envelope_id = %envelope.id, adapter = %adapter, "delivered envelope to channel");
        Ok(())
    }
}

#[async_trait]
impl EnvelopeDispatcher for Router {
    async fn dispatch(&self, envelope: &Envelope) {
        Router::dispatch(self, envelope).await
    }
}

#[async_trait]
impl ReplyDispatcher for Router {
    #[instrument(skip(self, text, metadata), fields(from = %from, to = %to))]
    async fn send_reply(&self, from: &str, to: &str, text: &str, metadata: Option<EnvelopeMetadata>) {
        let input = RouteEnvelopeInput {
            id: None,
            from: from.to_string(),
            to: to.to_string(),
            from_boss: false,
            content_text: Some(text.to_string()),
            content_attachments: Vec::new(),
            metadata,
            deliver_at: None,
        };
        if let Err(e) = self.route_envelope(input).await {
            warn!(from, to, error = %e, "failed to route turn reply");
        }
    }
}
