use serde::{Deserialize, Serialize};

/// A single remembered fact, scoped to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub agent_name: String,
    pub key: String,
    pub value: String,
    pub created_at: i64,
    pub updated_at: i64,
}
