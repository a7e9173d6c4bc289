use std::sync::Arc;

use serde_json::Value;

use hiboss_authz::Principal;
use hiboss_core::{Address, ErrorKind};
use hiboss_protocol::frames::JsonRpcError;
use hiboss_protocol::params::{EnvelopeGetParams, EnvelopeListParams, EnvelopeSendParams, ReactionSetParams};
use hiboss_router::RouteEnvelopeInput;

use super::{parse, require_self_or_boss, to_value};
use crate::app::AppState;

/// `envelope.send`. A boss principal may set `fromBoss` and name
/// any `from`; an agent's token implicitly authenticates as itself, it never
/// sets `fromBoss` and may only name itself as `from`.
pub async fn send(app: &Arc<AppState>, principal: &Principal, params: Value) -> Result<Value, JsonRpcError> {
    let input: EnvelopeSendParams = parse(params)?;
    if input.from_boss && !principal.is_boss() {
        return Err(JsonRpcError::from(ErrorKind::Unauthorized(
            "only the boss principal may set fromBoss".to_string(),
        )));
    }

    match Address::parse(&input.from).map_err(JsonRpcError::from)? {
        Address::Agent(name) => require_self_or_boss(principal, &name)?,
        Address::Channel { .. } if !principal.is_boss() => {
            return Err(JsonRpcError::from(ErrorKind::Unauthorized(
                "an agent principal may not send envelopes from a channel address".to_string(),
            )))
        }
        Address::Channel { .. } => {}
    }

    let envelope = app
        .router
        .route_envelope(RouteEnvelopeInput {
            id: input.id,
            from: input.from,
            to: input.to,
            from_boss: input.from_boss,
            content_text: input.content_text,
            content_attachments: input.content_attachments,
            metadata: input.metadata,
            deliver_at: input.deliver_at,
        })
        .await
        .map_err(|e| {
            // The envelope is still persisted (`pending`) on an adapter
            // failure — attach its id so the caller can correlate and the
            // EnvelopeScheduler's later retry.
            let envelope_id = e.envelope_id().map(str::to_string);
            let error = JsonRpcError::from(ErrorKind::from(e));
            match envelope_id {
                Some(id) => error.with_data(serde_json::json!({ "envelopeId": id })),
                None => error,
            }
        })?;

    if envelope.deliver_at.is_some() {
        app.envelope_scheduler.on_envelope_created();
    }

    to_value(envelope)
}

pub async fn list(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: EnvelopeListParams = parse(params)?;
    let envelopes = app
        .store
        .list_envelopes(input.address.as_deref(), input.limit)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(envelopes)
}

pub async fn get(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: EnvelopeGetParams = parse(params)?;
    let envelope = app.store.get_envelope(&input.id).map_err(ErrorKind::from).map_err(JsonRpcError::from)?;
    to_value(envelope)
}

/// `reaction.set` ( `setReaction?`). Best-effort: adapters that
/// don't implement reactions surface `AdapterError::Unsupported`.
pub async fn reaction_set(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: ReactionSetParams = parse(params)?;
    let to = hiboss_core::Address::parse(&input.address).map_err(JsonRpcError::from)?;
    let (adapter_type, chat_id) = match to {
        hiboss_core::Address::Channel { adapter, chat_id } => (adapter, chat_id),
        hiboss_core::Address::Agent(_) => {
            return Err(JsonRpcError::from(ErrorKind::InvalidParams(
                "reaction.set requires a channel address".to_string(),
            )))
        }
    };
    let adapter = app.adapters.get(&adapter_type).ok_or_else(|| {
        JsonRpcError::from(ErrorKind::Internal(format!(
            "no adapter registered for platform '{adapter_type}'"
        )))
    })?;
    adapter
        .set_reaction(&chat_id, &input.channel_message_id, &input.emoji)
        .await
        .map_err(|e| JsonRpcError::from(ErrorKind::Internal(e.to_string())))?;
    to_value(serde_json::json!({}))
}
