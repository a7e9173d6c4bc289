use std::sync::Arc;

use serde_json::Value;

use hiboss_core::ErrorKind;
use hiboss_protocol::frames::JsonRpcError;
use hiboss_protocol::params::{MemoryClearParams, MemoryClearResult, MemoryRecallParams, MemoryRememberParams};

use super::{parse, to_value};
use crate::app::AppState;

pub async fn remember(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: MemoryRememberParams = parse(params)?;
    let entry = app
        .memory
        .remember(&input.agent_name, &input.key, &input.value)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(entry)
}

pub async fn recall(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: MemoryRecallParams = parse(params)?;
    let entries = app
        .memory
        .recall(&input.agent_name, input.query.as_deref(), input.limit)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(entries)
}

pub async fn clear(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: MemoryClearParams = parse(params)?;
    let cleared = app
        .memory
        .clear(&input.agent_name, input.key.as_deref())
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?;
    to_value(MemoryClearResult { cleared })
}
