use std::collections::BTreeMap;
use std::sync::Mutex;

use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{info, instrument};

use hiboss_core::ids::new_id;
use hiboss_core::time::now_ms;
use hiboss_core::types::{
    Agent, AgentRun, AgentRunStatus, Attachment, Binding, CronContent, CronSchedule, Envelope,
    EnvelopeMetadata, EnvelopeStatus, PermissionLevel, Provider, ReasoningEffort, SessionPolicy,
    TokenUsage,
};
use hiboss_core::types::sanitize_agent_metadata;

use crate::error::{Result, StoreError};
use crate::hashing;
use crate::schema::{init_db, SCHEMA_VERSION};

/// Input to `Store::register_agent`.
pub struct RegisterAgentInput {
    pub name: String,
    pub description: Option<String>,
    pub workspace: Option<String>,
    pub provider: Provider,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub permission_level: PermissionLevel,
    pub session_policy: SessionPolicy,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Input to `Store::insert_envelope`. Caller supplies `id` so retries are
/// idempotent.
pub struct NewEnvelope {
    pub id: String,
    pub from: String,
    pub to: String,
    pub from_boss: bool,
    pub content_text: Option<String>,
    pub content_attachments: Vec<Attachment>,
    pub metadata: Option<EnvelopeMetadata>,
    pub deliver_at: Option<i64>,
}

/// The sole owner of the SQLite handle.
///
/// A single writer connection guarded by a mutex — every write goes through
/// one serialized path rather than relying on SQLite's own locking.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_db(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema_version()?;
        Ok(store)
    }

    /// Open an in-memory database. Used by tests in this crate and by other
    /// crates' test suites that need a throwaway `Store`.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema_version()?;
        Ok(store)
    }

    fn ensure_schema_version(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO config (key, value, created_at) VALUES ('schema_version', ?1, ?2)",
            params![SCHEMA_VERSION.to_string(), now_ms()],
        )?;
        Ok(())
    }

    /// Run `f` inside a single SQLite transaction, committing on `Ok` and
    /// rolling back on `Err`.
    pub fn run_in_transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ---- agents --------------------------------------------------------

    /// Generate a 6-hex-char token, hash it, persist the agent row.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub fn register_agent(&self, input: RegisterAgentInput) -> Result<(Agent, String)> {
        validate_agent_name(&input.name)?;

        let conn = self.conn.lock().unwrap();
        // `name` is `COLLATE NOCASE`, so this lookup (and the column's own
        // uniqueness constraint) already treats "Nex" and "nex" as the same
        // agent.
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM agents WHERE name = ?1",
                params![input.name],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "agent already exists: {}",
                input.name
            )));
        }

        let mut raw = [0u8; 3];
        rand::thread_rng().fill_bytes(&mut raw);
        let plaintext_token = hex::encode(raw);
        let token_hash = hashing::hash_token(&plaintext_token);
        let now = now_ms();
        let metadata = sanitize_agent_metadata(input.metadata);

        conn.execute(
            "INSERT INTO agents
             (name, token_hash, description, workspace, provider, model, reasoning_effort,
              permission_level, session_policy, metadata, created_at, last_seen_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,NULL)",
            params![
                input.name,
                token_hash,
                input.description,
                input.workspace,
                input.provider.to_string(),
                input.model,
                input.reasoning_effort.map(|r| r.to_string()),
                input.permission_level.to_string(),
                serde_json::to_string(&input.session_policy).unwrap(),
                serde_json::to_string(&metadata).unwrap(),
                now,
            ],
        )?;

        info!(agent = %input.name, "agent registered");

        let agent = Agent {
            name: input.name,
            token_hash,
            description: input.description,
            workspace: input.workspace,
            provider: input.provider,
            model: input.model,
            reasoning_effort: input.reasoning_effort,
            permission_level: input.permission_level,
            session_policy: input.session_policy,
            metadata,
            created_at: now,
            last_seen_at: None,
        };
        Ok((agent, plaintext_token))
    }

    pub fn get_agent(&self, name: &str) -> Result<Agent> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT name, token_hash, description, workspace, provider, model,
                    reasoning_effort, permission_level, session_policy, metadata,
                    created_at, last_seen_at
             FROM agents WHERE name = ?1",
            params![name],
            row_to_agent,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("agent not found: {name}")))
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name, token_hash, description, workspace, provider, model,
                    reasoning_effort, permission_level, session_policy, metadata,
                    created_at, last_seen_at
             FROM agents ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_agent)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Find the agent whose token hash matches `token` (constant-time per
    /// hash). O(n) in agent count, acceptable for a single-boss daemon.
    pub fn find_agent_by_token(&self, token: &str) -> Result<Option<Agent>> {
        for agent in self.list_agents()? {
            if hashing::verify_token(token, &agent.token_hash) {
                return Ok(Some(agent));
            }
        }
        Ok(None)
    }

    pub fn verify_boss_token(&self, token: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'boss_token_hash'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(match stored {
            Some(hash) => hashing::verify_token(token, &hash),
            None => false,
        })
    }

    /// Update mutable agent fields. `name` is immutable.
    #[allow(clippy::too_many_arguments)]
    pub fn update_agent(
        &self,
        name: &str,
        description: Option<Option<String>>,
        workspace: Option<Option<String>>,
        model: Option<Option<String>>,
        reasoning_effort: Option<Option<ReasoningEffort>>,
        permission_level: Option<PermissionLevel>,
        session_policy: Option<SessionPolicy>,
        metadata: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<Agent> {
        let mut agent = self.get_agent(name)?;
        if let Some(v) = description {
            agent.description = v;
        }
        if let Some(v) = workspace {
            agent.workspace = v;
        }
        if let Some(v) = model {
            agent.model = v;
        }
        if let Some(v) = reasoning_effort {
            agent.reasoning_effort = v;
        }
        if let Some(v) = permission_level {
            agent.permission_level = v;
        }
        if let Some(v) = session_policy {
            agent.session_policy = v;
        }
        if let Some(v) = metadata {
            agent.metadata = sanitize_agent_metadata(v);
        }

        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE agents SET description=?2, workspace=?3, model=?4, reasoning_effort=?5,
                               permission_level=?6, session_policy=?7, metadata=?8
             WHERE name=?1",
            params![
                name,
                agent.description,
                agent.workspace,
                agent.model,
                agent.reasoning_effort.map(|r| r.to_string()),
                agent.permission_level.to_string(),
                serde_json::to_string(&agent.session_policy).unwrap(),
                serde_json::to_string(&agent.metadata).unwrap(),
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("agent not found: {name}")));
        }
        Ok(agent)
    }

    pub fn touch_agent_last_seen(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE agents SET last_seen_at = ?2 WHERE name = ?1",
            params![name, now_ms()],
        )?;
        Ok(())
    }

    /// Best-effort persistence of the provider session handle into
    /// `agents.metadata.sessionHandle`.
    pub fn set_agent_session_handle(&self, name: &str, handle: Option<serde_json::Value>) -> Result<()> {
        let mut agent = self.get_agent(name)?;
        match handle {
            Some(v) => {
                agent.metadata.insert("sessionHandle".to_string(), v);
            }
            None => {
                agent.metadata.remove("sessionHandle");
            }
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE agents SET metadata = ?2 WHERE name = ?1",
            params![name, serde_json::to_string(&agent.metadata).unwrap()],
        )?;
        Ok(())
    }

    /// Delete an agent, cascading to bindings (FK) and closing any pending
    /// envelopes materialized by its cron schedules.
    #[instrument(skip(self))]
    pub fn delete_agent(&self, name: &str) -> Result<()> {
        self.run_in_transaction(|tx| {
            let exists: Option<String> = tx
                .query_row("SELECT name FROM agents WHERE name = ?1", params![name], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("agent not found: {name}")));
            }

            let pending_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT pending_envelope_id FROM cron_schedules
                     WHERE agent_name = ?1 AND pending_envelope_id IS NOT NULL",
                )?;
                let rows = stmt.query_map(params![name], |r| r.get::<_, String>(0))?;
                rows.filter_map(|r| r.ok()).collect()
            };
            for id in &pending_ids {
                tx.execute(
                    "UPDATE envelopes SET status='done' WHERE id=?1 AND status='pending'",
                    params![id],
                )?;
            }
            tx.execute("DELETE FROM cron_schedules WHERE agent_name = ?1", params![name])?;
            tx.execute("DELETE FROM agents WHERE name = ?1", params![name])?;
            Ok(())
        })
    }

    // ---- bindings --------------------------------------------------------

    pub fn create_binding(&self, agent_name: &str, adapter_type: &str, adapter_token: &str) -> Result<Binding> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let now = now_ms();
        conn.execute(
            "INSERT INTO agent_bindings (id, agent_name, adapter_type, adapter_token, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![id, agent_name, adapter_type, adapter_token, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                StoreError::AlreadyExists(format!(
                    "binding already exists for agent {agent_name} / adapter {adapter_type}"
                ))
            }
            other => StoreError::Io(other),
        })?;
        Ok(Binding {
            id,
            agent_name: agent_name.to_string(),
            adapter_type: adapter_type.to_string(),
            adapter_token: adapter_token.to_string(),
            created_at: now,
        })
    }

    pub fn delete_binding(&self, agent_name: &str, adapter_type: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM agent_bindings WHERE agent_name = ?1 AND adapter_type = ?2",
            params![agent_name, adapter_type],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!(
                "no binding for agent {agent_name} / adapter {adapter_type}"
            )));
        }
        Ok(())
    }

    pub fn get_agent_binding_by_type(&self, agent_name: &str, adapter_type: &str) -> Result<Option<Binding>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, agent_name, adapter_type, adapter_token, created_at
             FROM agent_bindings WHERE agent_name = ?1 AND adapter_type = ?2",
            params![agent_name, adapter_type],
            row_to_binding,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_binding_by_adapter(&self, adapter_type: &str, adapter_token: &str) -> Result<Option<Binding>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, agent_name, adapter_type, adapter_token, created_at
             FROM agent_bindings WHERE adapter_type = ?1 AND adapter_token = ?2",
            params![adapter_type, adapter_token],
            row_to_binding,
        )
        .optional()
        .map_err(StoreError::from)
    }

    // ---- envelopes ---------------------------------------------------------

    #[instrument(skip(self, e), fields(id = %e.id, to = %e.to))]
    pub fn insert_envelope(&self, e: NewEnvelope) -> Result<Envelope> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        let attachments_json = serde_json::to_string(&e.content_attachments).unwrap();
        let metadata_json = e.metadata.as_ref().map(|m| serde_json::to_string(m).unwrap());

        let changed = conn.execute(
            "INSERT OR IGNORE INTO envelopes
             (id, \"from\", \"to\", from_boss, content_text, content_attachments, metadata,
              deliver_at, status, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,'pending',?9)",
            params![
                e.id,
                e.from,
                e.to,
                e.from_boss as i64,
                e.content_text,
                attachments_json,
                metadata_json,
                e.deliver_at,
                now,
            ],
        )?;

        // Idempotent insert: if the id already existed, `changed == 0` and we
        // just read back the existing row.
        if changed == 0 {
            info!(id = %e.id, "envelope insert was a duplicate id, returning existing row");
        }
        drop(conn);

        self.get_envelope(&e.id)
    }

    pub fn get_envelope(&self, id: &str) -> Result<Envelope> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, \"from\", \"to\", from_boss, content_text, content_attachments,
                    metadata, deliver_at, status, created_at
             FROM envelopes WHERE id = ?1",
            params![id],
            row_to_envelope,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("envelope not found: {id}")))
    }

    /// Pending envelopes addressed to `agent:<name>` whose `deliverAt` has
    /// arrived, ordered `(createdAt ASC, id ASC)`.
    pub fn get_pending_envelopes_for_agent(&self, agent_name: &str, limit: usize) -> Result<Vec<Envelope>> {
        let conn = self.conn.lock().unwrap();
        let to = format!("agent:{agent_name}");
        let now = now_ms();
        let mut stmt = conn.prepare(
            "SELECT id, \"from\", \"to\", from_boss, content_text, content_attachments,
                    metadata, deliver_at, status, created_at
             FROM envelopes
             WHERE \"to\" = ?1 AND status = 'pending' AND (deliver_at IS NULL OR deliver_at <= ?2)
             ORDER BY created_at ASC, id ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![to, now, limit as i64], row_to_envelope)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All pending envelopes with a future `deliverAt`, used by the envelope
    /// scheduler to compute its next wake time.
    pub fn get_future_deliver_ats(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT deliver_at FROM envelopes WHERE status = 'pending' AND deliver_at IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |r| r.get::<_, i64>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Due pending envelopes (deliverAt <= now), across all destinations —
    /// used by the envelope scheduler wake tick.
    pub fn get_due_envelopes(&self) -> Result<Vec<Envelope>> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        let mut stmt = conn.prepare(
            "SELECT id, \"from\", \"to\", from_boss, content_text, content_attachments,
                    metadata, deliver_at, status, created_at
             FROM envelopes
             WHERE status = 'pending' AND deliver_at IS NOT NULL AND deliver_at <= ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![now], row_to_envelope)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Conditional update: flips only rows still `pending`. Returns the
    /// count actually flipped — the basis of the at-most-once property
    ///.
    pub fn mark_envelopes_done(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let mut total = 0usize;
        for id in ids {
            total += conn.execute(
                "UPDATE envelopes SET status = 'done' WHERE id = ?1 AND status = 'pending'",
                params![id],
            )?;
        }
        Ok(total)
    }

    pub fn list_envelopes(&self, address: Option<&str>, limit: usize) -> Result<Vec<Envelope>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match address {
            Some(_) => conn.prepare(
                "SELECT id, \"from\", \"to\", from_boss, content_text, content_attachments,
                        metadata, deliver_at, status, created_at
                 FROM envelopes WHERE \"to\" = ?1 OR \"from\" = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?,
            None => conn.prepare(
                "SELECT id, \"from\", \"to\", from_boss, content_text, content_attachments,
                        metadata, deliver_at, status, created_at
                 FROM envelopes ORDER BY created_at DESC LIMIT ?1",
            )?,
        };
        let rows = match address {
            Some(addr) => stmt
                .query_map(params![addr, limit as i64], row_to_envelope)?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map(params![limit as i64], row_to_envelope)?
                .filter_map(|r| r.ok())
                .collect(),
        };
        Ok(rows)
    }

    // ---- agent runs ------------------------------------------------------

    pub fn create_agent_run(&self, agent_name: &str, envelope_ids: &[String]) -> Result<AgentRun> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let now = now_ms();
        conn.execute(
            "INSERT INTO agent_runs (id, agent_name, envelope_ids, started_at, status)
             VALUES (?1,?2,?3,?4,'running')",
            params![id, agent_name, serde_json::to_string(envelope_ids).unwrap(), now],
        )?;
        Ok(AgentRun {
            id,
            agent_name: agent_name.to_string(),
            started_at: now,
            completed_at: None,
            status: AgentRunStatus::Running,
            envelope_ids: envelope_ids.to_vec(),
            response: None,
            error: None,
            context_length: None,
            usage: TokenUsage::default(),
        })
    }

    pub fn complete_agent_run(&self, id: &str, response: &str, usage: TokenUsage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE agent_runs SET status='completed', completed_at=?2, response=?3,
                                   context_length=?4, usage_json=?5
             WHERE id=?1 AND status='running'",
            params![
                id,
                now_ms(),
                response,
                usage.context_length,
                serde_json::to_string(&usage).unwrap(),
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("running agent_run not found: {id}")));
        }
        Ok(())
    }

    pub fn fail_agent_run(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE agent_runs SET status='failed', completed_at=?2, error=?3
             WHERE id=?1 AND status='running'",
            params![id, now_ms(), error],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("running agent_run not found: {id}")));
        }
        Ok(())
    }

    pub fn cancel_agent_run(&self, id: &str, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE agent_runs SET status='cancelled', completed_at=?2, error=?3
             WHERE id=?1 AND status='running'",
            params![id, now_ms(), reason],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("running agent_run not found: {id}")));
        }
        Ok(())
    }

    pub fn get_agent_run(&self, id: &str) -> Result<AgentRun> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, agent_name, envelope_ids, started_at, completed_at, status,
                    response, error, context_length, usage_json
             FROM agent_runs WHERE id = ?1",
            params![id],
            row_to_agent_run,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("agent_run not found: {id}")))
    }

    pub fn list_agent_runs(&self, agent_name: &str, limit: usize) -> Result<Vec<AgentRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, agent_name, envelope_ids, started_at, completed_at, status,
                    response, error, context_length, usage_json
             FROM agent_runs WHERE agent_name = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_name, limit as i64], row_to_agent_run)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---- cron schedules ----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_cron_schedule(
        &self,
        agent_name: &str,
        cron: &str,
        timezone: Option<String>,
        to: &str,
        content: CronContent,
        metadata: Option<serde_json::Value>,
    ) -> Result<CronSchedule> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let now = now_ms();
        conn.execute(
            "INSERT INTO cron_schedules
             (id, agent_name, cron, timezone, enabled, to_address, content_text,
              content_attachments, metadata, pending_envelope_id, created_at, updated_at)
             VALUES (?1,?2,?3,?4,1,?5,?6,?7,?8,NULL,?9,?9)",
            params![
                id,
                agent_name,
                cron,
                timezone,
                to,
                content.text,
                serde_json::to_string(&content.attachments).unwrap(),
                metadata.as_ref().map(|m| serde_json::to_string(m).unwrap()),
                now,
            ],
        )?;
        Ok(CronSchedule {
            id,
            agent_name: agent_name.to_string(),
            cron: cron.to_string(),
            timezone,
            enabled: true,
            to: to.to_string(),
            content,
            metadata,
            pending_envelope_id: None,
            created_at: now,
            updated_at: Some(now),
        })
    }

    /// `createSchedule`: persist the schedule row and its first materialized
    /// envelope in a single transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn create_cron_schedule_with_first_envelope(
        &self,
        agent_name: &str,
        cron: &str,
        timezone: Option<String>,
        to: &str,
        content: CronContent,
        metadata: Option<serde_json::Value>,
        envelope_from: &str,
        first_deliver_at: i64,
    ) -> Result<CronSchedule> {
        self.run_in_transaction(|tx| {
            let schedule_id = new_id();
            let envelope_id = new_id();
            let now = now_ms();

            tx.execute(
                "INSERT INTO cron_schedules
                 (id, agent_name, cron, timezone, enabled, to_address, content_text,
                  content_attachments, metadata, pending_envelope_id, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,1,?5,?6,?7,?8,?9,?10,?10)",
                params![
                    schedule_id,
                    agent_name,
                    cron,
                    timezone,
                    to,
                    content.text,
                    serde_json::to_string(&content.attachments).unwrap(),
                    metadata.as_ref().map(|m| serde_json::to_string(m).unwrap()),
                    envelope_id,
                    now,
                ],
            )?;

            let envelope_metadata = serde_json::to_string(&EnvelopeMetadata {
                cron_schedule_id: Some(schedule_id.clone()),
                ..Default::default()
            })
            .unwrap();
            tx.execute(
                "INSERT INTO envelopes
                 (id, \"from\", \"to\", from_boss, content_text, content_attachments, metadata,
                  deliver_at, status, created_at)
                 VALUES (?1,?2,?3,0,?4,?5,?6,?7,'pending',?8)",
                params![
                    envelope_id,
                    envelope_from,
                    to,
                    content.text,
                    serde_json::to_string(&content.attachments).unwrap(),
                    envelope_metadata,
                    first_deliver_at,
                    now,
                ],
            )?;

            Ok(CronSchedule {
                id: schedule_id,
                agent_name: agent_name.to_string(),
                cron: cron.to_string(),
                timezone,
                enabled: true,
                to: to.to_string(),
                content,
                metadata,
                pending_envelope_id: Some(envelope_id),
                created_at: now,
                updated_at: Some(now),
            })
        })
    }

    pub fn get_cron_schedule(&self, id: &str) -> Result<CronSchedule> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, agent_name, cron, timezone, enabled, to_address, content_text,
                    content_attachments, metadata, pending_envelope_id, created_at, updated_at
             FROM cron_schedules WHERE id = ?1",
            params![id],
            row_to_cron,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("cron schedule not found: {id}")))
    }

    pub fn list_cron_schedules(&self, agent_name: Option<&str>) -> Result<Vec<CronSchedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match agent_name {
            Some(_) => conn.prepare(
                "SELECT id, agent_name, cron, timezone, enabled, to_address, content_text,
                        content_attachments, metadata, pending_envelope_id, created_at, updated_at
                 FROM cron_schedules WHERE agent_name = ?1 ORDER BY created_at ASC",
            )?,
            None => conn.prepare(
                "SELECT id, agent_name, cron, timezone, enabled, to_address, content_text,
                        content_attachments, metadata, pending_envelope_id, created_at, updated_at
                 FROM cron_schedules ORDER BY created_at ASC",
            )?,
        };
        let rows: Vec<CronSchedule> = match agent_name {
            Some(name) => stmt
                .query_map(params![name], row_to_cron)?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map([], row_to_cron)?
                .filter_map(|r| r.ok())
                .collect(),
        };
        Ok(rows)
    }

    /// Resolve a short hex-prefix id against an agent's cron schedules
    ///.
    pub fn find_cron_schedules_by_id_prefix(&self, agent_name: &str, prefix: &str) -> Result<Vec<CronSchedule>> {
        Ok(self
            .list_cron_schedules(Some(agent_name))?
            .into_iter()
            .filter(|c| c.id.starts_with(prefix))
            .collect())
    }

    pub fn set_cron_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE cron_schedules SET enabled=?2, updated_at=?3 WHERE id=?1",
            params![id, enabled as i64, now_ms()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("cron schedule not found: {id}")));
        }
        Ok(())
    }

    pub fn set_cron_pending_envelope(&self, id: &str, pending_envelope_id: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE cron_schedules SET pending_envelope_id=?2, updated_at=?3 WHERE id=?1",
            params![id, pending_envelope_id, now_ms()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("cron schedule not found: {id}")));
        }
        Ok(())
    }

    /// Atomically insert the next materialized envelope for a cron schedule
    /// and link it as `pendingEnvelopeId` (
    /// "onEnvelopesDone"). The schedule must have no pending envelope linked
    /// when this is called — callers enforce the single-pending invariant.
    #[instrument(skip(self, content, metadata), fields(schedule_id = %schedule_id))]
    pub fn materialize_cron_envelope(
        &self,
        schedule_id: &str,
        from: &str,
        to: &str,
        content: &CronContent,
        metadata: Option<EnvelopeMetadata>,
        deliver_at: i64,
    ) -> Result<Envelope> {
        self.run_in_transaction(|tx| {
            let id = new_id();
            let now = now_ms();
            let attachments_json = serde_json::to_string(&content.attachments).unwrap();
            let metadata_json = metadata.as_ref().map(|m| serde_json::to_string(m).unwrap());

            tx.execute(
                "INSERT INTO envelopes
                 (id, \"from\", \"to\", from_boss, content_text, content_attachments, metadata,
                  deliver_at, status, created_at)
                 VALUES (?1,?2,?3,0,?4,?5,?6,?7,'pending',?8)",
                params![id, from, to, content.text, attachments_json, metadata_json, deliver_at, now],
            )?;
            tx.execute(
                "UPDATE cron_schedules SET pending_envelope_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![schedule_id, id, now],
            )?;

            let row: (String, String, i64, Option<String>, String, i64) = tx.query_row(
                "SELECT id, \"from\", from_boss, content_text, \"to\", created_at
                 FROM envelopes WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )?;
            Ok(Envelope {
                id: row.0,
                from: row.1,
                to: row.4,
                from_boss: row.2 != 0,
                content_text: row.3,
                content_attachments: content.attachments.clone(),
                metadata,
                deliver_at: Some(deliver_at),
                status: EnvelopeStatus::Pending,
                created_at: row.5,
            })
        })
    }

    /// Cron schedules that are enabled but have no pending envelope linked
    ///.
    pub fn list_enabled_crons_without_pending(&self) -> Result<Vec<CronSchedule>> {
        Ok(self
            .list_cron_schedules(None)?
            .into_iter()
            .filter(|c| c.enabled && c.pending_envelope_id.is_none())
            .collect())
    }

    /// Look up the cron schedule (if any) whose `pendingEnvelopeId` matches
    /// one of `ids`.
    pub fn find_cron_schedule_by_pending_envelope(&self, envelope_id: &str) -> Result<Option<CronSchedule>> {
        Ok(self
            .list_cron_schedules(None)?
            .into_iter()
            .find(|c| c.pending_envelope_id.as_deref() == Some(envelope_id)))
    }

    pub fn delete_cron_schedule(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM cron_schedules WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("cron schedule not found: {id}")));
        }
        Ok(())
    }

    // ---- config ------------------------------------------------------------

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT value FROM config WHERE key = ?1", params![key], |r| r.get(0))
            .optional()
            .map_err(StoreError::from)
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO config (key, value, created_at) VALUES (?1,?2,?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value, now_ms()],
        )?;
        Ok(())
    }
}

// ---- validation -------------------------------------------------------------

const MAX_AGENT_NAME_LEN: usize = 64;

/// An agent name is unique (case-insensitively, via the `agents.name`
/// column's `COLLATE NOCASE`) and restricted to a charset that can never be
/// confused with an `Address`'s `agent:`/`channel:` tagging or separator
/// (`:`).
fn validate_agent_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_AGENT_NAME_LEN {
        return Err(StoreError::InvalidInput(format!(
            "agent name must be 1-{MAX_AGENT_NAME_LEN} characters: {name:?}"
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid || !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(StoreError::InvalidInput(format!(
            "agent name must start with a letter or digit and contain only ASCII letters, digits, '-', '_', or '.': {name:?}"
        )));
    }
    Ok(())
}

// ---- row mappers -----------------------------------------------------------

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
    use std::str::FromStr;
    let reasoning_effort: Option<String> = row.get(6)?;
    let metadata_json: String = row.get(9)?;
    let session_policy_json: String = row.get(8)?;
    Ok(Agent {
        name: row.get(0)?,
        token_hash: row.get(1)?,
        description: row.get(2)?,
        workspace: row.get(3)?,
        provider: Provider::from_str(&row.get::<_, String>(4)?).unwrap_or(Provider::Claude),
        model: row.get(5)?,
        reasoning_effort: reasoning_effort.and_then(|s| ReasoningEffort::from_str(&s).ok()),
        permission_level: PermissionLevel::from_str(&row.get::<_, String>(7)?).unwrap_or_default(),
        session_policy: serde_json::from_str(&session_policy_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        created_at: row.get(10)?,
        last_seen_at: row.get(11)?,
    })
}

fn row_to_binding(row: &Row<'_>) -> rusqlite::Result<Binding> {
    Ok(Binding {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        adapter_type: row.get(2)?,
        adapter_token: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_envelope(row: &Row<'_>) -> rusqlite::Result<Envelope> {
    let attachments_json: String = row.get(5)?;
    let metadata_json: Option<String> = row.get(6)?;
    let status_str: String = row.get(8)?;
    Ok(Envelope {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        from_boss: row.get::<_, i64>(3)? != 0,
        content_text: row.get(4)?,
        content_attachments: serde_json::from_str(&attachments_json).unwrap_or_default(),
        metadata: metadata_json.and_then(|j| serde_json::from_str(&j).ok()),
        deliver_at: row.get(7)?,
        status: if status_str == "done" {
            EnvelopeStatus::Done
        } else {
            EnvelopeStatus::Pending
        },
        created_at: row.get(9)?,
    })
}

fn row_to_agent_run(row: &Row<'_>) -> rusqlite::Result<AgentRun> {
    let envelope_ids_json: String = row.get(2)?;
    let status_str: String = row.get(5)?;
    let usage_json: Option<String> = row.get(9)?;
    let status = match status_str.as_str() {
        "completed" => AgentRunStatus::Completed,
        "failed" => AgentRunStatus::Failed,
        "cancelled" => AgentRunStatus::Cancelled,
        _ => AgentRunStatus::Running,
    };
    Ok(AgentRun {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        envelope_ids: serde_json::from_str(&envelope_ids_json).unwrap_or_default(),
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        status,
        response: row.get(6)?,
        error: row.get(7)?,
        context_length: row.get(8)?,
        usage: usage_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
    })
}

fn row_to_cron(row: &Row<'_>) -> rusqlite::Result<CronSchedule> {
    let attachments_json: String = row.get(7)?;
    let metadata_json: Option<String> = row.get(8)?;
    Ok(CronSchedule {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        cron: row.get(2)?,
        timezone: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        to: row.get(5)?,
        content: CronContent {
            text: row.get(6)?,
            attachments: serde_json::from_str(&attachments_json).unwrap_or_default(),
        },
        metadata: metadata_json.and_then(|j| serde_json::from_str(&j).ok()),
        pending_envelope_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn register(store: &Store, name: &str) -> (Agent, String) {
        store
            .register_agent(RegisterAgentInput {
                name: name.to_string(),
                description: None,
                workspace: None,
                provider: Provider::Claude,
                model: None,
                reasoning_effort: None,
                permission_level: PermissionLevel::Standard,
                session_policy: SessionPolicy::default(),
                metadata: BTreeMap::new(),
            })
            .unwrap()
    }

    #[test]
    fn register_then_find_by_token() {
        let store = Store::open_in_memory().unwrap();
        let (agent, token) = register(&store, "nex");
        let found = store.find_agent_by_token(&token).unwrap().unwrap();
        assert_eq!(found.name, agent.name);
        assert!(store.find_agent_by_token("wrong").unwrap().is_none());
    }

    #[test]
    fn registering_duplicate_name_fails() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "nex");
        let err = store.register_agent(RegisterAgentInput {
            name: "nex".to_string(),
            description: None,
            workspace: None,
            provider: Provider::Claude,
            model: None,
            reasoning_effort: None,
            permission_level: PermissionLevel::Standard,
            session_policy: SessionPolicy::default(),
            metadata: BTreeMap::new(),
        });
        assert!(matches!(err, Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn registering_a_name_differing_only_by_case_fails() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "Nex");
        let err = store.register_agent(RegisterAgentInput {
            name: "nex".to_string(),
            description: None,
            workspace: None,
            provider: Provider::Claude,
            model: None,
            reasoning_effort: None,
            permission_level: PermissionLevel::Standard,
            session_policy: SessionPolicy::default(),
            metadata: BTreeMap::new(),
        });
        assert!(matches!(err, Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn agent_lookup_by_token_is_case_insensitive_on_name() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "Nex");
        // Case-insensitive uniqueness implies case-insensitive lookup too.
        let agent = store.get_agent("nex").unwrap();
        assert_eq!(agent.name, "Nex");
    }

    #[test]
    fn registering_an_invalid_name_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        for bad in ["", "agent:nex", "channel:telegram:1", "has spaces", "-leading-dash", &"x".repeat(65)] {
            let err = store.register_agent(RegisterAgentInput {
                name: bad.to_string(),
                description: None,
                workspace: None,
                provider: Provider::Claude,
                model: None,
                reasoning_effort: None,
                permission_level: PermissionLevel::Standard,
                session_policy: SessionPolicy::default(),
                metadata: BTreeMap::new(),
            });
            assert!(matches!(err, Err(StoreError::InvalidInput(_))), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn delete_agent_closes_pending_cron_envelope() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "nex");
        let cron = store
            .create_cron_schedule(
                "nex",
                "0 9 * * *",
                Some("UTC".to_string()),
                "agent:nex",
                CronContent { text: Some("good morning".to_string()), attachments: vec![] },
                None,
            )
            .unwrap();
        let env = store
            .insert_envelope(NewEnvelope {
                id: new_id(),
                from: "boss".to_string(),
                to: "agent:nex".to_string(),
                from_boss: true,
                content_text: Some("good morning".to_string()),
                content_attachments: vec![],
                metadata: None,
                deliver_at: None,
            })
            .unwrap();
        store.set_cron_pending_envelope(&cron.id, Some(&env.id)).unwrap();

        store.delete_agent("nex").unwrap();

        let reloaded = store.get_envelope(&env.id).unwrap();
        assert_eq!(reloaded.status, EnvelopeStatus::Done);
        assert!(store.get_cron_schedule(&cron.id).is_err());
    }

    #[test]
    fn mark_envelopes_done_is_idempotent_and_counts_only_flips() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "nex");
        let env = store
            .insert_envelope(NewEnvelope {
                id: new_id(),
                from: "boss".to_string(),
                to: "agent:nex".to_string(),
                from_boss: true,
                content_text: Some("hi".to_string()),
                content_attachments: vec![],
                metadata: None,
                deliver_at: None,
            })
            .unwrap();

        let first = store.mark_envelopes_done(&[env.id.clone()]).unwrap();
        assert_eq!(first, 1);
        let second = store.mark_envelopes_done(&[env.id.clone()]).unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn insert_envelope_with_same_id_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "nex");
        let id = new_id();
        let make = || NewEnvelope {
            id: id.clone(),
            from: "boss".to_string(),
            to: "agent:nex".to_string(),
            from_boss: true,
            content_text: Some("hi".to_string()),
            content_attachments: vec![],
            metadata: None,
            deliver_at: None,
        };
        let first = store.insert_envelope(make()).unwrap();
        let second = store.insert_envelope(make()).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_envelopes(Some("agent:nex"), 10).unwrap().len(), 1);
    }

    #[test]
    fn pending_envelopes_ordered_by_created_then_id() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "nex");
        for _ in 0..3 {
            store
                .insert_envelope(NewEnvelope {
                    id: new_id(),
                    from: "boss".to_string(),
                    to: "agent:nex".to_string(),
                    from_boss: true,
                    content_text: Some("hi".to_string()),
                    content_attachments: vec![],
                    metadata: None,
                    deliver_at: None,
                })
                .unwrap();
        }
        let pending = store.get_pending_envelopes_for_agent("nex", 10).unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn find_cron_schedules_by_id_prefix_resolves_short_ids() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "nex");
        let cron = store
            .create_cron_schedule(
                "nex",
                "0 9 * * *",
                None,
                "agent:nex",
                CronContent { text: None, attachments: vec![] },
                None,
            )
            .unwrap();
        let prefix = &cron.id[..8];
        let found = store.find_cron_schedules_by_id_prefix("nex", prefix).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, cron.id);
    }

    #[test]
    fn agent_run_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        register(&store, "nex");
        let run = store.create_agent_run("nex", &[]).unwrap();
        assert_eq!(run.status, AgentRunStatus::Running);
        store.complete_agent_run(&run.id, "done", TokenUsage::default()).unwrap();
        let reloaded = store.get_agent_run(&run.id).unwrap();
        assert_eq!(reloaded.status, AgentRunStatus::Completed);
        assert_eq!(reloaded.response.as_deref(), Some("done"));

        // a second completion on an already-terminal run must fail
        assert!(store.complete_agent_run(&run.id, "again", TokenUsage::default()).is_err());
    }

    #[test]
    fn config_set_then_get_overwrites() {
        let store = Store::open_in_memory().unwrap();
        store.set_config("boss_name", "Alice").unwrap();
        assert_eq!(store.get_config("boss_name").unwrap().as_deref(), Some("Alice"));
        store.set_config("boss_name", "Bob").unwrap();
        assert_eq!(store.get_config("boss_name").unwrap().as_deref(), Some("Bob"));
    }
}
