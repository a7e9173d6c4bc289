//! MemoryService collaborator backing `memory.*`. Deliberately thin:
//! keyword-match storage, no embeddings or vector similarity search.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use hiboss_core::time::now_ms;

use crate::db::init_db;
use crate::error::{MemoryError, Result};
use crate::types::MemoryEntry;

pub struct MemoryManager {
    conn: Mutex<Connection>,
}

impl MemoryManager {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// `memory.remember` — upsert a key/value fact for an agent.
    #[instrument(skip(self, value), fields(agent_name, key))]
    pub fn remember(&self, agent_name: &str, key: &str, value: &str) -> Result<MemoryEntry> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO agent_memory (agent_name, key, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(agent_name, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![agent_name, key, value, now],
        )?;
        conn.query_row(
            "SELECT id, agent_name, key, value, created_at, updated_at FROM agent_memory WHERE agent_name = ?1 AND key = ?2",
            params![agent_name, key],
            row_to_entry,
        )
        .map_err(MemoryError::from)
    }

    /// `memory.recall` — keyword match over `key`/`value`; `query = None`
    /// returns every fact for the agent, most recently updated first.
    #[instrument(skip(self), fields(agent_name, query))]
    pub fn recall(&self, agent_name: &str, query: Option<&str>, limit: usize) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let rows = match query {
            Some(q) => {
                let pattern = format!("%{}%", q.to_lowercase());
                let mut stmt = conn.prepare(
                    "SELECT id, agent_name, key, value, created_at, updated_at FROM agent_memory
                     WHERE agent_name = ?1 AND (lower(key) LIKE ?2 OR lower(value) LIKE ?2)
                     ORDER BY updated_at DESC LIMIT ?3",
                )?;
                stmt.query_map(params![agent_name, pattern, limit as i64], row_to_entry)?
                    .filter_map(|r| r.ok())
                    .collect()
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, agent_name, key, value, created_at, updated_at FROM agent_memory
                     WHERE agent_name = ?1 ORDER BY updated_at DESC LIMIT ?2",
                )?;
                stmt.query_map(params![agent_name, limit as i64], row_to_entry)?
                    .filter_map(|r| r.ok())
                    .collect()
            }
        };
        Ok(rows)
    }

    /// `memory.clear` — drop one key, or every fact for the agent if `key`
    /// is `None`. Returns the number of rows removed.
    #[instrument(skip(self), fields(agent_name, key))]
    pub fn clear(&self, agent_name: &str, key: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = match key {
            Some(k) => conn.execute(
                "DELETE FROM agent_memory WHERE agent_name = ?1 AND key = ?2",
                params![agent_name, k],
            )?,
            None => conn.execute("DELETE FROM agent_memory WHERE agent_name = ?1", params![agent_name])?,
        };
        Ok(n)
    }

    pub fn get(&self, agent_name: &str, key: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, agent_name, key, value, created_at, updated_at FROM agent_memory WHERE agent_name = ?1 AND key = ?2",
            params![agent_name, key],
            row_to_entry,
        )
        .optional()
        .map_err(MemoryError::from)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_then_recall_by_keyword() {
        let mem = MemoryManager::open_in_memory().unwrap();
        mem.remember("nex", "favorite-color", "teal").unwrap();
        mem.remember("nex", "timezone", "America/Los_Angeles").unwrap();

        let hits = mem.recall("nex", Some("teal"), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "favorite-color");
    }

    #[test]
    fn remember_is_an_upsert() {
        let mem = MemoryManager::open_in_memory().unwrap();
        mem.remember("nex", "k", "v1").unwrap();
        let updated = mem.remember("nex", "k", "v2").unwrap();
        assert_eq!(updated.value, "v2");
        assert_eq!(mem.recall("nex", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn clear_one_key_leaves_others() {
        let mem = MemoryManager::open_in_memory().unwrap();
        mem.remember("nex", "a", "1").unwrap();
        mem.remember("nex", "b", "2").unwrap();
        assert_eq!(mem.clear("nex", Some("a")).unwrap(), 1);
        assert_eq!(mem.recall("nex", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn memory_is_scoped_per_agent() {
        let mem = MemoryManager::open_in_memory().unwrap();
        mem.remember("nex", "k", "v").unwrap();
        assert!(mem.get("other", "k").unwrap().is_none());
    }
}
