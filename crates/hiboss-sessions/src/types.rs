use serde::{Deserialize, Serialize};

use hiboss_core::types::TokenUsage;

/// The persisted shape of `agents.metadata.sessionHandle` — a sum type
/// discriminated by provider. Tagged by `provider` so a reader only ever
/// sees the fields relevant to the CLI that produced the handle.
///
/// Deserializing an unknown `provider` tag must discard the handle rather
/// than fall back to a default variant — see `SessionHandle::from_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SessionHandle {
    Claude {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        created_at_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_run_completed_at_ms: Option<i64>,
    },
    Codex {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        created_at_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_run_completed_at_ms: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        codex_cumulative_usage: Option<TokenUsage>,
    },
}

impl SessionHandle {
    pub fn new(provider: hiboss_core::types::Provider, created_at_ms: i64) -> Self {
        match provider {
            hiboss_core::types::Provider::Claude => SessionHandle::Claude {
                session_id: None,
                created_at_ms,
                last_run_completed_at_ms: None,
            },
            hiboss_core::types::Provider::Codex => SessionHandle::Codex {
                session_id: None,
                created_at_ms,
                last_run_completed_at_ms: None,
                codex_cumulative_usage: None,
            },
        }
    }

    pub fn provider(&self) -> hiboss_core::types::Provider {
        match self {
            SessionHandle::Claude { .. } => hiboss_core::types::Provider::Claude,
            SessionHandle::Codex { .. } => hiboss_core::types::Provider::Codex,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionHandle::Claude { session_id, .. } => session_id.as_deref(),
            SessionHandle::Codex { session_id, .. } => session_id.as_deref(),
        }
    }

    pub fn created_at_ms(&self) -> i64 {
        match self {
            SessionHandle::Claude { created_at_ms, .. } => *created_at_ms,
            SessionHandle::Codex { created_at_ms, .. } => *created_at_ms,
        }
    }

    pub fn last_run_completed_at_ms(&self) -> Option<i64> {
        match self {
            SessionHandle::Claude { last_run_completed_at_ms, .. } => *last_run_completed_at_ms,
            SessionHandle::Codex { last_run_completed_at_ms, .. } => *last_run_completed_at_ms,
        }
    }

    pub fn with_session_id(mut self, id: Option<String>) -> Self {
        match &mut self {
            SessionHandle::Claude { session_id, .. } => *session_id = id,
            SessionHandle::Codex { session_id, .. } => *session_id = id,
        }
        self
    }

    pub fn with_last_run_completed_at_ms(mut self, at: i64) -> Self {
        match &mut self {
            SessionHandle::Claude { last_run_completed_at_ms, .. } => *last_run_completed_at_ms = Some(at),
            SessionHandle::Codex { last_run_completed_at_ms, .. } => *last_run_completed_at_ms = Some(at),
        }
        self
    }

    pub fn with_codex_usage(mut self, usage: TokenUsage) -> Self {
        if let SessionHandle::Codex { codex_cumulative_usage, .. } = &mut self {
            *codex_cumulative_usage = Some(usage);
        }
        self
    }

    /// Deserialize a persisted handle, discarding (returning `None`) rather
    /// than erroring on an unrecognized `provider` tag.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Why a turn should `open` a fresh session rather than `resume` (spec.md
/// §4.8). Carried through so callers/tests can assert on the exact reason
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenMode {
    Open { reasons: Vec<String> },
    Resume,
}

impl OpenMode {
    pub fn is_open(&self) -> bool {
        matches!(self, OpenMode::Open { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            OpenMode::Open { reasons } => reasons.join(","),
            OpenMode::Resume => "resume".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_tag_is_discarded_not_defaulted() {
        let raw = serde_json::json!({ "provider": "bedrock", "session_id": "abc", "created_at_ms": 1 });
        assert!(SessionHandle::from_json(&raw).is_none());
    }

    #[test]
    fn claude_handle_roundtrips() {
        let handle = SessionHandle::new(hiboss_core::types::Provider::Claude, 1000).with_session_id(Some("s1".to_string()));
        let json = handle.to_json();
        let back = SessionHandle::from_json(&json).unwrap();
        assert_eq!(back, handle);
    }
}
