use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Totally ordered principal/agent permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Restricted,
    Standard,
    Privileged,
    Boss,
}

impl Default for PermissionLevel {
    fn default() -> Self {
        PermissionLevel::Restricted
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PermissionLevel::Restricted => "restricted",
            PermissionLevel::Standard => "standard",
            PermissionLevel::Privileged => "privileged",
            PermissionLevel::Boss => "boss",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restricted" => Ok(PermissionLevel::Restricted),
            "standard" => Ok(PermissionLevel::Standard),
            "privileged" => Ok(PermissionLevel::Privileged),
            "boss" => Ok(PermissionLevel::Boss),
            other => Err(format!("unknown permission level: {other}")),
        }
    }
}

/// Provider CLI this agent is driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Claude => write!(f, "claude"),
            Provider::Codex => write!(f, "codex"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Provider::Claude),
            "codex" => Ok(Provider::Codex),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
    Xhigh,
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReasoningEffort::None => "none",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::Xhigh => "xhigh",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReasoningEffort {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ReasoningEffort::None),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            "xhigh" => Ok(ReasoningEffort::Xhigh),
            other => Err(format!("unknown reasoning effort: {other}")),
        }
    }
}

/// Per-agent session refresh policy. Any subset of fields may be present
///.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Local `HH:MM`, normalized (zero-padded, 24h).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_reset_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_length: Option<u32>,
}

impl SessionPolicy {
    /// Normalize `HH:MM`, rejecting anything that isn't exactly that shape
    /// with valid ranges. Returns the zero-padded canonical form.
    pub fn normalize_daily_reset_at(raw: &str) -> Result<String, String> {
        let (h, m) = raw
            .split_once(':')
            .ok_or_else(|| format!("dailyResetAt must be HH:MM, got: {raw}"))?;
        let hour: u32 = h.parse().map_err(|_| format!("invalid hour: {h}"))?;
        let minute: u32 = m.parse().map_err(|_| format!("invalid minute: {m}"))?;
        if hour > 23 || minute > 59 {
            return Err(format!("hour/minute out of range: {raw}"));
        }
        Ok(format!("{hour:02}:{minute:02}"))
    }
}

/// Full agent configuration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    /// `salt:hex` PBKDF2-HMAC-SHA512 hash; never serialized to RPC clients.
    #[serde(skip)]
    pub token_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub permission_level: PermissionLevel,
    #[serde(default)]
    pub session_policy: SessionPolicy,
    /// Opaque map; the reserved key `sessionHandle` is stripped from any
    /// user-supplied input and is only ever written by `hiboss-sessions`.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<i64>,
}

pub const RESERVED_METADATA_KEY_SESSION_HANDLE: &str = "sessionHandle";

/// Strip the reserved `sessionHandle` key from caller-supplied metadata —
/// only `hiboss-sessions` may write it.
pub fn sanitize_agent_metadata(mut metadata: BTreeMap<String, serde_json::Value>) -> BTreeMap<String, serde_json::Value> {
    metadata.remove(RESERVED_METADATA_KEY_SESSION_HANDLE);
    metadata
}

/// `(agentName, adapterType) -> adapterToken` authorization record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub id: String,
    pub agent_name: String,
    pub adapter_type: String,
    pub adapter_token: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    Plain,
    Markdownv2,
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Adapter-specific envelope metadata.
/// Unrecognized keys are preserved in `extra` so adapters can round-trip
/// their own data without the core needing to know about it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "channelMessageId")]
    pub channel_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "parseMode")]
    pub parse_mode: Option<ParseMode>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "replyToMessageId")]
    pub reply_to_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "replyToEnvelopeId")]
    pub reply_to_envelope_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "cronScheduleId")]
    pub cron_schedule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "fromName")]
    pub from_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Pending,
    Done,
}

/// The durable, addressed unit of communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub from_boss: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
    #[serde(default)]
    pub content_attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EnvelopeMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_at: Option<i64>,
    pub status: EnvelopeStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Token usage for one turn. Any non-negative value is accepted; only
/// `context_length` is used for session-refresh policy decisions
/// ( Open Questions).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Audit record for one executor turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub agent_name: String,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    pub status: AgentRunStatus,
    pub envelope_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Materialized envelope content template for a cron rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    pub id: String,
    pub agent_name: String,
    pub cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub enabled: bool,
    pub to: String,
    pub content: CronContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_envelope_id: Option<String>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_levels_are_totally_ordered() {
        assert!(PermissionLevel::Restricted < PermissionLevel::Standard);
        assert!(PermissionLevel::Standard < PermissionLevel::Privileged);
        assert!(PermissionLevel::Privileged < PermissionLevel::Boss);
    }

    #[test]
    fn normalize_daily_reset_at_pads_zero() {
        assert_eq!(SessionPolicy::normalize_daily_reset_at("9:5").unwrap(), "09:05");
        assert!(SessionPolicy::normalize_daily_reset_at("24:00").is_err());
        assert!(SessionPolicy::normalize_daily_reset_at("bogus").is_err());
    }

    #[test]
    fn sanitize_strips_reserved_key() {
        let mut m = BTreeMap::new();
        m.insert("sessionHandle".to_string(), serde_json::json!({"foo": 1}));
        m.insert("nickname".to_string(), serde_json::json!("nex"));
        let cleaned = sanitize_agent_metadata(m);
        assert!(!cleaned.contains_key("sessionHandle"));
        assert!(cleaned.contains_key("nickname"));
    }
}
