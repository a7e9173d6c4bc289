//! C8 SessionManager. Resolves the open-vs-resume decision
//! for the next turn and tracks the in-memory session slot per agent; the
//! authoritative best-effort copy is persisted into `agents.metadata.
//! sessionHandle` via the Store so a restart can still attempt a resume.

use std::sync::Arc;

use chrono::TimeZone;
use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use hiboss_core::time::now_ms;
use hiboss_core::types::{Agent, SessionPolicy};
use hiboss_store::Store;

use crate::error::{Result, SessionError};
use crate::types::{OpenMode, SessionHandle};

/// Per-agent pending refresh reasons, appended by `AgentExecutor::
/// request_session_refresh` and drained on the next
/// `resolve_open_mode` call.
#[derive(Default)]
struct PendingRefresh(std::sync::Mutex<Vec<String>>);

/// C8. One instance shared across all agents; per-agent state
/// lives in `pending_refresh` and the persisted `SessionHandle`.
pub struct SessionManager {
    store: Arc<Store>,
    /// IANA timezone the boss's `dailyResetAt` boundary is computed in
    /// (spec.md §4.8: "compute the most recent reset boundary in the boss
    /// timezone").
    boss_timezone: String,
    pending_refresh: DashMap<String, PendingRefresh>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, boss_timezone: impl Into<String>) -> Self {
        Self {
            store,
            boss_timezone: boss_timezone.into(),
            pending_refresh: DashMap::new(),
        }
    }

    /// Queue a refresh reason for the next turn. Safe to
    /// call concurrently with an in-flight turn — it never touches the
    /// persisted handle until the *next* `resolve_open_mode` call.
    pub fn request_refresh(&self, agent_name: &str, reason: &str) {
        self.pending_refresh
            .entry(agent_name.to_string())
            .or_default()
            .0
            .lock()
            .unwrap()
            .push(reason.to_string());
    }

    /// Drop the in-memory and persisted session handle unconditionally
    /// ( `refreshSession`). Does not touch a running turn.
    #[instrument(skip(self), fields(agent_name))]
    pub fn refresh_now(&self, agent_name: &str, reason: &str) -> Result<()> {
        self.store
            .set_agent_session_handle(agent_name, None)
            .map_err(SessionError::from)?;
        self.request_refresh(agent_name, reason);
        debug!(agent_name, reason, "session handle cleared");
        Ok(())
    }

    /// `(agent) -> (open|resume, reason)`, evaluated before each turn. Order
    /// is significant: pending refresh, then handle presence/provider match,
    /// then daily-reset, then idle-timeout, else resume.
    #[instrument(skip(self, agent), fields(agent_name = %agent.name))]
    pub fn resolve_open_mode(&self, agent: &Agent) -> OpenMode {
        let now = now_ms();

        if let Some(entry) = self.pending_refresh.get(&agent.name) {
            let mut reasons = entry.0.lock().unwrap();
            if !reasons.is_empty() {
                let drained: Vec<String> = reasons.drain(..).collect();
                return OpenMode::Open { reasons: drained };
            }
        }

        let Some(raw) = agent
            .metadata
            .get(hiboss_core::types::RESERVED_METADATA_KEY_SESSION_HANDLE)
        else {
            return OpenMode::Open {
                reasons: vec!["no-session-handle".to_string()],
            };
        };

        let Some(handle) = SessionHandle::from_json(raw) else {
            return OpenMode::Open {
                reasons: vec!["no-session-handle".to_string()],
            };
        };

        if handle.provider() != agent.provider {
            return OpenMode::Open {
                reasons: vec!["persisted-provider-mismatch".to_string()],
            };
        }

        let mut reasons = Vec::new();
        let policy = &agent.session_policy;

        if let Some(daily_reset_at) = &policy.daily_reset_at {
            match most_recent_reset_boundary_ms_in_tz(daily_reset_at, now, &self.boss_timezone) {
                Ok(boundary) => {
                    if handle.created_at_ms() < boundary {
                        reasons.push(format!("daily-reset-at:{daily_reset_at}"));
                    }
                }
                Err(e) => {
                    warn!(agent_name = %agent.name, error = %e, "failed to compute daily-reset boundary, skipping");
                }
            }
        }

        if let Some(idle_timeout_ms) = policy.idle_timeout_ms {
            let last_active = handle.last_run_completed_at_ms().unwrap_or_else(|| handle.created_at_ms());
            if now - last_active > idle_timeout_ms {
                reasons.push(format!("idle-timeout-ms:{idle_timeout_ms}"));
            }
        }

        if reasons.is_empty() {
            OpenMode::Resume
        } else {
            OpenMode::Open { reasons }
        }
    }

    /// Look up the currently persisted handle, if any, so the executor can
    /// pass `sessionId` to the `ProviderRunner` on a resume.
    pub fn current_handle(&self, agent: &Agent) -> Option<SessionHandle> {
        agent
            .metadata
            .get(hiboss_core::types::RESERVED_METADATA_KEY_SESSION_HANDLE)
            .and_then(SessionHandle::from_json)
    }

    /// Start a fresh handle for `agent` (called by the executor right before
    /// invoking the `ProviderRunner` in `open` mode).
    pub fn open_new(&self, agent: &Agent) -> SessionHandle {
        SessionHandle::new(agent.provider, now_ms())
    }

    /// Persist the handle produced/updated by a completed turn (spec.md
    /// §5 "Session persistence writes are ordered with the run's completion
    /// write" — callers must call this *after* `Store::complete_agent_run`).
    pub fn persist(&self, agent_name: &str, handle: &SessionHandle) -> Result<()> {
        self.store
            .set_agent_session_handle(agent_name, Some(handle.to_json()))
            .map_err(SessionError::from)
    }
}

/// Compute the most recent `HH:MM` boundary, interpreted in the boss's
/// IANA timezone `tz`, at or before `now`.
fn most_recent_reset_boundary_ms_in_tz(daily_reset_at: &str, now_ms: i64, tz: &str) -> Result<i64> {
    let tz: chrono_tz::Tz = tz
        .parse()
        .map_err(|_| SessionError::InvalidTimezone(tz.to_string()))?;
    let (hh, mm) = daily_reset_at
        .split_once(':')
        .ok_or_else(|| SessionError::InvalidTimezone(daily_reset_at.to_string()))?;
    let hour: u32 = hh.parse().map_err(|_| SessionError::InvalidTimezone(daily_reset_at.to_string()))?;
    let minute: u32 = mm.parse().map_err(|_| SessionError::InvalidTimezone(daily_reset_at.to_string()))?;

    let now_local = tz
        .timestamp_millis_opt(now_ms)
        .single()
        .ok_or_else(|| SessionError::InvalidTimezone(tz.to_string()))?;
    let today = now_local.date_naive();
    let today_boundary = today
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| SessionError::InvalidTimezone(daily_reset_at.to_string()))?;
    let today_boundary_tz = tz
        .from_local_datetime(&today_boundary)
        .single()
        .ok_or_else(|| SessionError::InvalidTimezone(tz.to_string()))?;

    let boundary = if today_boundary_tz.timestamp_millis() <= now_ms {
        today_boundary_tz
    } else {
        let yesterday = today
            .pred_opt()
            .ok_or_else(|| SessionError::InvalidTimezone(daily_reset_at.to_string()))?;
        let yb = yesterday
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| SessionError::InvalidTimezone(daily_reset_at.to_string()))?;
        tz.from_local_datetime(&yb)
            .single()
            .ok_or_else(|| SessionError::InvalidTimezone(tz.to_string()))?
    };

    Ok(boundary.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use hiboss_core::types::Provider;
    use hiboss_store::RegisterAgentInput;

    fn make_agent(store: &Store, policy: SessionPolicy) -> Agent {
        let (agent, _) = store
            .register_agent(RegisterAgentInput {
                name: "nex".to_string(),
                description: None,
                workspace: None,
                provider: Provider::Claude,
                model: None,
                reasoning_effort: None,
                permission_level: Default::default(),
                session_policy: policy,
                metadata: BTreeMap::new(),
            })
            .unwrap();
        agent
    }

    #[test]
    fn no_handle_opens_fresh() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), "UTC");
        let agent = make_agent(&store, Default::default());
        assert_eq!(manager.resolve_open_mode(&agent), OpenMode::Open { reasons: vec!["no-session-handle".to_string()] });
    }

    #[test]
    fn fresh_handle_with_no_policy_resumes() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), "UTC");
        let agent = make_agent(&store, Default::default());
        let handle = manager.open_new(&agent);
        manager.persist(&agent.name, &handle).unwrap();
        let agent = store.get_agent(&agent.name).unwrap();
        assert_eq!(manager.resolve_open_mode(&agent), OpenMode::Resume);
    }

    #[test]
    fn persisted_provider_mismatch_opens_fresh() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), "UTC");
        let agent = make_agent(&store, Default::default());
        let handle = SessionHandle::new(Provider::Codex, now_ms());
        manager.persist(&agent.name, &handle).unwrap();
        let agent = store.get_agent(&agent.name).unwrap();
        assert_eq!(
            manager.resolve_open_mode(&agent),
            OpenMode::Open { reasons: vec!["persisted-provider-mismatch".to_string()] }
        );
    }

    #[test]
    fn idle_timeout_triggers_open() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), "UTC");
        let policy = SessionPolicy {
            idle_timeout_ms: Some(1000),
            ..Default::default()
        };
        let agent = make_agent(&store, policy);
        let handle = SessionHandle::new(Provider::Claude, now_ms() - 5_000).with_last_run_completed_at_ms(now_ms() - 5_000);
        manager.persist(&agent.name, &handle).unwrap();
        let agent = store.get_agent(&agent.name).unwrap();
        let mode = manager.resolve_open_mode(&agent);
        assert!(mode.is_open());
        assert!(mode.reason().starts_with("idle-timeout-ms:"));
    }

    #[test]
    fn pending_refresh_takes_priority_and_drains_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), "UTC");
        let agent = make_agent(&store, Default::default());
        let handle = manager.open_new(&agent);
        manager.persist(&agent.name, &handle).unwrap();
        let agent = store.get_agent(&agent.name).unwrap();

        manager.request_refresh(&agent.name, "max-context-length");
        let mode = manager.resolve_open_mode(&agent);
        assert!(mode.is_open());
        assert_eq!(mode.reason(), "max-context-length");

        // Draining is one-shot: the next call sees no pending reasons left.
        assert_eq!(manager.resolve_open_mode(&agent), OpenMode::Resume);
    }

    #[test]
    fn refresh_now_clears_persisted_handle() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), "UTC");
        let agent = make_agent(&store, Default::default());
        let handle = manager.open_new(&agent);
        manager.persist(&agent.name, &handle).unwrap();

        manager.refresh_now(&agent.name, "manual").unwrap();
        let agent = store.get_agent(&agent.name).unwrap();
        assert!(manager.resolve_open_mode(&agent).is_open());
    }

    #[test]
    fn daily_reset_boundary_is_computed_in_the_given_timezone() {
        // 2024-01-01T05:00:00Z.
        let now = 1_704_085_200_000_i64;
        // Midnight boundary in UTC, same instant: 2024-01-01T00:00:00Z.
        let utc_boundary = most_recent_reset_boundary_ms_in_tz("00:00", now, "UTC").unwrap();
        assert_eq!(utc_boundary, 1_704_067_200_000);
        // Midnight boundary in America/Los_Angeles (UTC-8, no DST in January):
        // 2023-12-31T00:00:00-08:00 == 2023-12-31T08:00:00Z.
        let la_boundary = most_recent_reset_boundary_ms_in_tz("00:00", now, "America/Los_Angeles").unwrap();
        assert_eq!(la_boundary, 1_703_923_200_000);
        assert_ne!(utc_boundary, la_boundary);
    }

    #[test]
    fn daily_reset_boundary_rejects_unknown_timezone() {
        assert!(most_recent_reset_boundary_ms_in_tz("00:00", now_ms(), "Not/A_Zone").is_err());
    }

    #[test]
    fn daily_reset_with_invalid_timezone_skips_rather_than_panics() {
        // An agent somehow persisted with a garbage boss timezone must not
        // crash `resolve_open_mode` — the daily-reset check is skipped and
        // the rest of the policy (none, here) still resolves.
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), "Not/A_Zone");
        let policy = SessionPolicy {
            daily_reset_at: Some("00:00".to_string()),
            ..Default::default()
        };
        let agent = make_agent(&store, policy);
        let handle = manager.open_new(&agent);
        manager.persist(&agent.name, &handle).unwrap();
        let agent = store.get_agent(&agent.name).unwrap();
        assert_eq!(manager.resolve_open_mode(&agent), OpenMode::Resume);
    }
}
