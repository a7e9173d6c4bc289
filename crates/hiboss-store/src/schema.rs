use rusqlite::Connection;

use crate::error::Result;

/// Current schema version, tracked in `config.schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Create every table from if absent. Idempotent — safe to call
/// on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS agents (
            name                TEXT PRIMARY KEY NOT NULL COLLATE NOCASE,
            token_hash          TEXT NOT NULL,
            description         TEXT,
            workspace           TEXT,
            provider            TEXT NOT NULL,
            model               TEXT,
            reasoning_effort    TEXT,
            permission_level    TEXT NOT NULL DEFAULT 'restricted',
            session_policy      TEXT NOT NULL DEFAULT '{}',
            metadata            TEXT NOT NULL DEFAULT '{}',
            created_at          INTEGER NOT NULL,
            last_seen_at        INTEGER
        );

        CREATE TABLE IF NOT EXISTS agent_bindings (
            id              TEXT PRIMARY KEY NOT NULL,
            agent_name      TEXT NOT NULL COLLATE NOCASE REFERENCES agents(name) ON DELETE CASCADE,
            adapter_type    TEXT NOT NULL,
            adapter_token   TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            UNIQUE(agent_name, adapter_type),
            UNIQUE(adapter_type, adapter_token)
        );

        CREATE TABLE IF NOT EXISTS envelopes (
            id                      TEXT PRIMARY KEY NOT NULL,
            \"from\"                TEXT NOT NULL,
            \"to\"                  TEXT NOT NULL,
            from_boss               INTEGER NOT NULL DEFAULT 0,
            content_text            TEXT,
            content_attachments     TEXT NOT NULL DEFAULT '[]',
            metadata                TEXT,
            deliver_at              INTEGER,
            status                  TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','done')),
            created_at              INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_envelopes_to_status_deliver
            ON envelopes(\"to\", status, deliver_at);
        CREATE INDEX IF NOT EXISTS idx_envelopes_created
            ON envelopes(created_at, id);

        CREATE TABLE IF NOT EXISTS agent_runs (
            id              TEXT PRIMARY KEY NOT NULL,
            agent_name      TEXT NOT NULL,
            envelope_ids    TEXT NOT NULL DEFAULT '[]',
            started_at      INTEGER NOT NULL,
            completed_at    INTEGER,
            status          TEXT NOT NULL CHECK(status IN ('running','completed','failed','cancelled')),
            response        TEXT,
            error           TEXT,
            context_length  INTEGER,
            usage_json      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_agent_runs_agent_started
            ON agent_runs(agent_name, started_at DESC);

        CREATE TABLE IF NOT EXISTS cron_schedules (
            id                      TEXT PRIMARY KEY NOT NULL,
            agent_name              TEXT NOT NULL,
            cron                    TEXT NOT NULL,
            timezone                TEXT,
            enabled                 INTEGER NOT NULL DEFAULT 1,
            to_address              TEXT NOT NULL,
            content_text            TEXT,
            content_attachments     TEXT NOT NULL DEFAULT '[]',
            metadata                TEXT,
            pending_envelope_id     TEXT,
            created_at              INTEGER NOT NULL,
            updated_at              INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_cron_agent ON cron_schedules(agent_name);

        CREATE TABLE IF NOT EXISTS config (
            key         TEXT PRIMARY KEY NOT NULL,
            value       TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}
