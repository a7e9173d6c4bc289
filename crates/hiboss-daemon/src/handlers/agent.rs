use std::sync::Arc;

use serde_json::Value;

use hiboss_authz::Principal;
use hiboss_core::ErrorKind;
use hiboss_protocol::frames::JsonRpcError;
use hiboss_protocol::params::{
    AgentAbortParams, AgentAbortResult, AgentBindParams, AgentDeleteParams, AgentRefreshParams,
    AgentRegisterParams, AgentRegisterResult, AgentSessionPolicySetParams, AgentSetParams,
    AgentStatusParams, AgentStatusResult, AgentUnbindParams,
};
use hiboss_store::RegisterAgentInput;

use super::{parse, require_self_or_boss, to_value};
use crate::app::AppState;

const RECENT_RUNS_LIMIT: usize = 10;

pub async fn register(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentRegisterParams = parse(params)?;
    let register_input = RegisterAgentInput {
        name: input.name,
        description: input.description,
        workspace: input.workspace,
        provider: input.provider,
        model: input.model,
        reasoning_effort: input.reasoning_effort,
        permission_level: input.permission_level.unwrap_or_default(),
        session_policy: input.session_policy,
        metadata: input.metadata,
    };
    let (agent, plaintext_token) = app
        .store
        .register_agent(register_input)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(AgentRegisterResult {
        agent,
        plaintext_token,
    })
}

pub async fn list(app: &Arc<AppState>) -> Result<Value, JsonRpcError> {
    let agents = app.store.list_agents().map_err(ErrorKind::from).map_err(JsonRpcError::from)?;
    to_value(agents)
}

pub async fn status(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentStatusParams = parse(params)?;
    let agent = app
        .store
        .get_agent(&input.name)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    let recent_runs = app
        .store
        .list_agent_runs(&input.name, RECENT_RUNS_LIMIT)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(AgentStatusResult { agent, recent_runs })
}

pub async fn set(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentSetParams = parse(params)?;
    let agent = app
        .store
        .update_agent(
            &input.name,
            input.description,
            input.workspace,
            input.model,
            input.reasoning_effort,
            input.permission_level,
            input.session_policy,
            input.metadata,
        )
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(agent)
}

pub async fn delete(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentDeleteParams = parse(params)?;
    // Best-effort: drop runtime state before the row goes away.
    app.sessions.request_refresh(&input.name, "agent deleted");
    app.executor.abort_current_run(&input.name, "agent deleted");
    app.store
        .delete_agent(&input.name)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(serde_json::json!({}))
}

pub async fn bind(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentBindParams = parse(params)?;
    let binding = app
        .store
        .create_binding(&input.name, &input.adapter_type, &input.adapter_token)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(binding)
}

pub async fn unbind(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentUnbindParams = parse(params)?;
    app.store
        .delete_binding(&input.name, &input.adapter_type)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(serde_json::json!({}))
}

pub async fn refresh(app: &Arc<AppState>, principal: &Principal, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentRefreshParams = parse(params)?;
    require_self_or_boss(principal, &input.name)?;
    app.sessions
        .request_refresh(&input.name, input.reason.as_deref().unwrap_or("requested via agent.refresh"));
    to_value(serde_json::json!({}))
}

pub async fn abort(app: &Arc<AppState>, principal: &Principal, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentAbortParams = parse(params)?;
    require_self_or_boss(principal, &input.name)?;
    let aborted = app
        .executor
        .abort_current_run(&input.name, input.reason.as_deref().unwrap_or("requested via agent.abort"));
    to_value(AgentAbortResult { aborted })
}

pub async fn self_info(app: &Arc<AppState>, principal: &Principal) -> Result<Value, JsonRpcError> {
    let name = principal
        .agent_name()
        .ok_or_else(|| JsonRpcError::from(ErrorKind::InvalidParams("the boss principal has no agent identity".to_string())))?;
    let agent = app.store.get_agent(name).map_err(ErrorKind::from).map_err(JsonRpcError::from)?;
    to_value(agent)
}

pub async fn session_policy_set(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: AgentSessionPolicySetParams = parse(params)?;
    let agent = app
        .store
        .update_agent(&input.name, None, None, None, None, None, Some(input.session_policy), None)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(agent)
}
