use std::sync::Arc;

use rand::RngCore;
use serde_json::Value;

use hiboss_authz::Principal;
use hiboss_core::config::keys;
use hiboss_core::ErrorKind;
use hiboss_protocol::frames::JsonRpcError;
use hiboss_protocol::params::{Authenticated, SetupCheckResult, SetupExecuteParams, SetupExecuteResult};

use super::{parse, to_value};
use crate::app::AppState;

pub async fn check(app: &Arc<AppState>) -> Result<Value, JsonRpcError> {
    let setup_completed = app
        .store
        .get_config(keys::SETUP_COMPLETED)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?
        .as_deref()
        == Some("true");
    to_value(SetupCheckResult { setup_completed })
}

/// One-time bootstrap: mints the boss token and persists the boss's name
/// and timezone. Refuses once `setup_completed` is already set — there is
/// exactly one boss token for the lifetime of a data dir.
pub async fn execute(app: &Arc<AppState>, params: Value) -> Result<Value, JsonRpcError> {
    let input: SetupExecuteParams = parse(params)?;

    let already_done = app
        .store
        .get_config(keys::SETUP_COMPLETED)
        .map_err(ErrorKind::from)
        .map_err(JsonRpcError::from)?
        .as_deref()
        == Some("true");
    if already_done {
        return Err(JsonRpcError::from(ErrorKind::AlreadyExists(
            "setup has already been completed".to_string(),
        )));
    }

    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let boss_token = hex::encode(raw);
    let token_hash = hiboss_store::hashing::hash_token(&boss_token);

    let store = &app.store;
    let set = |key: &str, value: &str| store.set_config(key, value).map_err(ErrorKind::from).map_err(JsonRpcError::from);
    set(keys::BOSS_TOKEN_HASH, &token_hash)?;
    if let Some(name) = &input.boss_name {
        set(keys::BOSS_NAME, name)?;
    }
    set(keys::BOSS_TIMEZONE, &input.boss_timezone)?;
    set(keys::SETUP_COMPLETED, "true")?;

    to_value(SetupExecuteResult { boss_token })
}

/// `boss.verify`: the bearer of a valid token simply learns
/// whether it resolved to the boss principal — `assertOperationAllowed`
/// already rejected anything below `boss` before this runs.
pub fn verify(principal: &Principal, token: &str) -> Result<Value, JsonRpcError> {
    debug_assert!(principal.is_boss());
    to_value(Authenticated {
        token: token.to_string(),
    })
}
