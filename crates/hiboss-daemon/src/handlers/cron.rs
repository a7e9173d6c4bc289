use std::sync::Arc;

use serde_json::Value;

use hiboss_core::ids::is_valid_id_prefix;
use hiboss_core::ErrorKind;
use hiboss_protocol::frames::JsonRpcError;
use hiboss_protocol::params::{CronCreateParams, CronIdParams, CronListParams};
use hiboss_scheduler::CreateScheduleInput;

use super::{parse, to_value};
use crate::app::AppState;

pub async fn create(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: CronCreateParams = parse(params)?;
    let schedule = app
        .cron_scheduler
        .create_schedule(CreateScheduleInput {
            agent_name: input.agent_name,
            cron: input.cron,
            timezone: input.timezone,
            to: input.to,
            content: input.content,
            metadata: input.metadata,
        })
        .await
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(schedule)
}

pub async fn list(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: CronListParams = parse(params)?;
    let schedules = app
        .store
        .list_cron_schedules(input.agent_name.as_deref())
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(schedules)
}

pub async fn enable(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: CronIdParams = parse(params)?;
    let id = resolve_id(app, &input.agent_name, &input.id)?;
    let schedule = app
        .cron_scheduler
        .enable_schedule(&id)
        .await
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(schedule)
}

pub async fn disable(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: CronIdParams = parse(params)?;
    let id = resolve_id(app, &input.agent_name, &input.id)?;
    let schedule = app
        .cron_scheduler
        .disable_schedule(&id)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(schedule)
}

pub async fn delete(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: CronIdParams = parse(params)?;
    let id = resolve_id(app, &input.agent_name, &input.id)?;
    app.cron_scheduler
        .delete_schedule(&id)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(serde_json::json!({}))
}

/// Resolve a full id or a short hex prefix against
/// one agent's cron schedules, failing with `ambiguous-id-prefix` and a
/// candidate list when more than one row matches.
fn resolve_id(app: &Arc<AppState>, agent_name: &str, id: &str) -> Result<String, JsonRpcError> {
    if !is_valid_id_prefix(id) {
        return Err(JsonRpcError::from(ErrorKind::InvalidParams(format!(
            "'{id}' is not a valid cron schedule id or short prefix (>= 8 hex characters)"
        ))));
    }
    if app.store.get_cron_schedule(id).is_ok() {
        return Ok(id.to_string());
    }

    let matches = app
        .store
        .find_cron_schedules_by_id_prefix(agent_name, id)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;

    match matches.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => Err(JsonRpcError::from(ErrorKind::NotFound(format!(
            "no cron schedule for agent '{agent_name}' matches id prefix '{id}'"
        )))),
        many => {
            let candidates: Vec<Value> = many
                .iter()
                .map(|c| serde_json::json!({ "id": c.id, "label": c.cron }))
                .collect();
            Err(JsonRpcError::from(ErrorKind::AmbiguousIdPrefix(format!(
                "'{id}' matches {} cron schedules for agent '{agent_name}'",
                many.len()
            )))
            .with_data(serde_json::json!({ "kind": "ambiguous-id-prefix", "candidates": candidates })))
        }
    }
}
