use std::sync::Arc;

use serde_json::Value;

use hiboss_core::config::keys;
use hiboss_core::ErrorKind;
use hiboss_protocol::frames::JsonRpcError;
use hiboss_protocol::params::DaemonStatusResult;

use super::to_value;
use crate::app::AppState;

pub async fn ping(_app: &Arc<AppState>) -> Result<Value, JsonRpcError> {
    to_value(serde_json::json!({ "pong": true }))
}

pub async fn status(app: &Arc<AppState>) -> Result<Value, JsonRpcError> {
    let agents_registered = app
        .store
        .list_agents()
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?
        .len();
    let setup_completed = app
        .store
        .get_config(keys::SETUP_COMPLETED)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?
        .as_deref()
        == Some("true");

    to_value(DaemonStatusResult {
        pid: std::process::id(),
        uptime_ms: app.uptime_ms(),
        agents_registered,
        setup_completed,
    })
}
