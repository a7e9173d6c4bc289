//! Typed `params`/`result` payloads for the RPC methods named in §6.3. Every
//! struct here still carries `token` as its first field, matching the wire
//! convention that JSON-RPC 2.0 has no header channel over a raw socket.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hiboss_core::types::{
    Agent, AgentRun, Attachment, CronContent, PermissionLevel, Provider, ReasoningEffort,
    SessionPolicy,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authenticated {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupCheckResult {
    pub setup_completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupExecuteParams {
    pub boss_name: Option<String>,
    pub boss_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupExecuteResult {
    pub boss_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BossVerifyParams {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisterParams {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    pub provider: Provider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub permission_level: Option<PermissionLevel>,
    #[serde(default)]
    pub session_policy: SessionPolicy,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisterResult {
    pub agent: hiboss_core::types::Agent,
    pub plaintext_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSetParams {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub workspace: Option<Option<String>>,
    #[serde(default)]
    pub model: Option<Option<String>>,
    #[serde(default)]
    pub reasoning_effort: Option<Option<ReasoningEffort>>,
    #[serde(default)]
    pub permission_level: Option<PermissionLevel>,
    #[serde(default)]
    pub session_policy: Option<SessionPolicy>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDeleteParams {
    pub token: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBindParams {
    pub token: String,
    pub name: String,
    pub adapter_type: String,
    pub adapter_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUnbindParams {
    pub token: String,
    pub name: String,
    pub adapter_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRefreshParams {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAbortParams {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAbortResult {
    pub aborted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSessionPolicySetParams {
    pub token: String,
    pub name: String,
    pub session_policy: SessionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSendParams {
    pub token: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub from_boss: bool,
    #[serde(default)]
    pub content_text: Option<String>,
    #[serde(default)]
    pub content_attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: Option<hiboss_core::types::EnvelopeMetadata>,
    #[serde(default)]
    pub deliver_at: Option<i64>,
    /// Caller-supplied id, for idempotent retries.
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeListParams {
    pub token: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_envelope_list_limit")]
    pub limit: usize,
}

fn default_envelope_list_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeGetParams {
    pub token: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionSetParams {
    pub token: String,
    pub address: String,
    pub channel_message_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronCreateParams {
    pub token: String,
    pub agent_name: String,
    pub cron: String,
    #[serde(default)]
    pub timezone: Option<String>,
    pub to: String,
    pub content: CronContent,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronListParams {
    pub token: String,
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronIdParams {
    pub token: String,
    /// Full id or any prefix of >= 8 hex characters.
    pub id: String,
    /// Required to disambiguate a short id against one agent's schedules.
    pub agent_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusParams {
    pub token: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusResult {
    pub agent: Agent,
    pub recent_runs: Vec<AgentRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRememberParams {
    pub token: String,
    pub agent_name: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecallParams {
    pub token: String,
    pub agent_name: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_memory_recall_limit")]
    pub limit: usize,
}

fn default_memory_recall_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryClearParams {
    pub token: String,
    pub agent_name: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryClearResult {
    pub cleared: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatusResult {
    pub pid: u32,
    pub uptime_ms: i64,
    pub agents_registered: usize,
    pub setup_completed: bool,
}
