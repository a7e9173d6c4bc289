use rusqlite::Connection;

use crate::error::Result;

/// Initialise the memory table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_memory (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_name  TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL,
            UNIQUE(agent_name, key)
        );
        CREATE INDEX IF NOT EXISTS idx_agent_memory_agent ON agent_memory(agent_name);",
    )?;
    Ok(())
}
