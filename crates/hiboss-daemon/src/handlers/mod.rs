//! RPC handler table. One async fn per method, grouped by the domain the
//! teacher's `ws::dispatch` groups by — except dispatch here resolves a
//! principal and checks the operation's required level before a handler
//! ever sees the request.

mod agent;
mod cron;
mod daemon;
mod envelope;
mod memory;
mod setup;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use hiboss_authz::{assert_may_act_on, assert_operation_allowed, resolve_principal, Principal};
use hiboss_core::ErrorKind;
use hiboss_protocol::frames::{JsonRpcError, JsonRpcRequest};
use hiboss_protocol::methods::*;

use crate::app::AppState;

pub async fn dispatch(app: &Arc<AppState>, request: JsonRpcRequest) -> Result<Value, JsonRpcError> {
    let method = request.method.as_str();
    let params = request.params.unwrap_or(Value::Null);

    if SETUP_EXEMPT.contains(&method) {
        return match method {
            DAEMON_PING => daemon::ping(app).await,
            DAEMON_STATUS => daemon::status(app).await,
            SETUP_CHECK => setup::check(app).await,
            SETUP_EXECUTE => setup::execute(app, params).await,
            _ => unreachable!("SETUP_EXEMPT lists exactly the methods handled above"),
        };
    }

    let token = params
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::from(ErrorKind::InvalidParams("missing 'token'".to_string())))?;
    let principal = resolve_principal(&app.store, token).map_err(JsonRpcError::from)?;
    assert_operation_allowed(&app.policy, method, &principal).map_err(JsonRpcError::from)?;

    match method {
        BOSS_VERIFY => setup::verify(&principal, token),

        AGENT_REGISTER => agent::register(app, params).await,
        AGENT_LIST => agent::list(app).await,
        AGENT_STATUS => agent::status(app, params).await,
        AGENT_SET => agent::set(app, params).await,
        AGENT_DELETE => agent::delete(app, params).await,
        AGENT_BIND => agent::bind(app, params).await,
        AGENT_UNBIND => agent::unbind(app, params).await,
        AGENT_REFRESH => agent::refresh(app, &principal, params).await,
        AGENT_ABORT => agent::abort(app, &principal, params).await,
        AGENT_SELF => agent::self_info(app, &principal).await,
        AGENT_SESSION_POLICY_SET => agent::session_policy_set(app, params).await,

        ENVELOPE_SEND => envelope::send(app, &principal, params).await,
        ENVELOPE_LIST => envelope::list(app, params).await,
        ENVELOPE_GET => envelope::get(app, params).await,
        REACTION_SET => envelope::reaction_set(app, params).await,

        CRON_CREATE => cron::create(app, params).await,
        CRON_LIST => cron::list(app, params).await,
        CRON_ENABLE => cron::enable(app, params).await,
        CRON_DISABLE => cron::disable(app, params).await,
        CRON_DELETE => cron::delete(app, params).await,

        MEMORY_REMEMBER => memory::remember(app, params).await,
        MEMORY_RECALL => memory::recall(app, params).await,
        MEMORY_CLEAR => memory::clear(app, params).await,

        other => Err(JsonRpcError::method_not_found(other)),
    }
}

/// Deserialize `params` into `T`, mapping a shape mismatch to `-32602`.
pub(crate) fn parse<T: DeserializeOwned>(params: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::from(ErrorKind::InvalidParams(format!("invalid params: {e}"))))
}

pub(crate) fn to_value(result: impl serde::Serialize) -> Result<Value, JsonRpcError> {
    serde_json::to_value(result)
        .map_err(|e| JsonRpcError::from(ErrorKind::Internal(format!("failed to serialize result: {e}"))))
}

/// Enforce "an agent principal may only name itself" for the per-op checks
/// the permission-level table doesn't capture.
pub(crate) fn require_self_or_boss(principal: &Principal, target: &str) -> Result<(), JsonRpcError> {
    assert_may_act_on(principal, target).map_err(JsonRpcError::from)
}
