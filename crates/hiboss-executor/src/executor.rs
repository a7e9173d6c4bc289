//! AgentExecutor. Owns, per agent, a serialized queue
//! (implemented here as a `tokio::sync::Mutex` guarding the turn loop — its
//! fairness already gives the strict-FIFO, single-inflight guarantee §5
//! asks for), an optional in-flight run record, and session refresh
//! bookkeeping delegated to `hiboss-sessions`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use hiboss_core::config::MAX_ENVELOPES_PER_TURN;
use hiboss_core::hooks::{AgentWaker, EnvelopesDoneObserver, ReplyDispatcher};
use hiboss_core::time::now_ms;
use hiboss_core::types::{EnvelopeMetadata, Provider};
use hiboss_sessions::{OpenMode, SessionManager};
use hiboss_store::Store;

use crate::error::Result;
use crate::provider::{ChildSlot, ProviderRunner, TurnContext, TurnResult, TurnStatus};
use crate::turn::render_turn_input;

/// Shared, cheaply-cloneable handles every spawned turn task needs.
#[derive(Clone)]
struct ExecutorContext {
    store: Arc<Store>,
    sessions: Arc<SessionManager>,
    claude_runner: Arc<dyn ProviderRunner>,
    codex_runner: Arc<dyn ProviderRunner>,
    reply_dispatcher: Arc<dyn ReplyDispatcher>,
    /// Notified right after `markEnvelopesDone` flips rows, before the
    /// provider CLI is invoked ( step 2, §4.7 "onEnvelopesDone").
    envelopes_done: Arc<dyn EnvelopesDoneObserver>,
    hiboss_dir: PathBuf,
}

/// `{runId, cancelToken, childProcess?, abortReason?}`.
struct InFlightRun {
    run_id: String,
    cancel: CancellationToken,
    child_process: ChildSlot,
    abort_reason: Option<String>,
}

#[derive(Default)]
struct AgentState {
    queue_lock: tokio::sync::Mutex<()>,
    current: std::sync::Mutex<Option<InFlightRun>>,
}

pub struct AgentExecutor {
    ctx: ExecutorContext,
    states: DashMap<String, Arc<AgentState>>,
}

impl AgentExecutor {
    pub fn new(
        store: Arc<Store>,
        sessions: Arc<SessionManager>,
        claude_runner: Arc<dyn ProviderRunner>,
        codex_runner: Arc<dyn ProviderRunner>,
        reply_dispatcher: Arc<dyn ReplyDispatcher>,
        envelopes_done: Arc<dyn EnvelopesDoneObserver>,
        hiboss_dir: PathBuf,
    ) -> Self {
        Self {
            ctx: ExecutorContext { store, sessions, claude_runner, codex_runner, reply_dispatcher, envelopes_done, hiboss_dir },
            states: DashMap::new(),
        }
    }

    fn state_for(&self, agent_name: &str) -> Arc<AgentState> {
        self.states.entry(agent_name.to_string()).or_default().clone()
    }

    /// `abortCurrentRun(agentName, reason) -> bool`.
    #[instrument(skip(self))]
    pub fn abort_current_run(&self, agent_name: &str, reason: &str) -> bool {
        let state = self.state_for(agent_name);
        let mut current = state.current.lock().unwrap();
        let Some(run) = current.as_mut() else {
            return false;
        };
        run.abort_reason = Some(reason.to_string());
        run.cancel.cancel();
        if let Some(pid) = run.child_process.pid() {
            if kill(Pid::from_raw(-pid), Signal::SIGTERM).is_err() {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }
        true
    }

    /// `requestSessionRefresh(agentName, reason)`:
    /// non-blocking, cooperative — it only queues the reason for the next
    /// turn's `resolveOpenMode` call and never interrupts one in flight.
    pub fn request_session_refresh(&self, agent_name: &str, reason: &str) {
        self.ctx.sessions.request_refresh(agent_name, reason);
    }
}

#[async_trait]
impl AgentWaker for AgentExecutor {
    /// `wake(agentName, trigger)`: enqueues one task at the
    /// queue's tail. Returns as soon as the task is spawned — it does not
    /// wait for the turn (or turns) to finish.
    #[instrument(skip(self))]
    async fn wake(&self, agent_name: &str) {
        let state = self.state_for(agent_name);
        let ctx = self.ctx.clone();
        let agent_name = agent_name.to_string();
        tokio::spawn(async move {
            let _permit = state.queue_lock.lock().await;
            loop {
                match run_one_turn(&ctx, &agent_name, &state).await {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(agent_name = %agent_name, error = %e, "agent turn failed");
                        break;
                    }
                }
            }
        });
    }
}

/// One iteration of the turn loop ( steps 1-8). Returns the
/// number of envelopes consumed (`0` if there were none pending, which
/// tells the caller to stop looping).
async fn run_one_turn(ctx: &ExecutorContext, agent_name: &str, state: &AgentState) -> Result<usize> {
    let envelopes = ctx.store.get_pending_envelopes_for_agent(agent_name, MAX_ENVELOPES_PER_TURN)?;
    if envelopes.is_empty() {
        return Ok(0);
    }

    let ids: Vec<String> = envelopes.iter().map(|e| e.id.clone()).collect();
    // Per-agent serialization (the queue_lock held by the caller) means no
    // other task can be racing these same ids, so every fetched envelope is
    // still pending at flip time.
    ctx.store.mark_envelopes_done(&ids)?;
    ctx.envelopes_done.on_envelopes_done(&ids);

    let agent = ctx.store.get_agent(agent_name)?;
    let run = ctx.store.create_agent_run(agent_name, &ids)?;

    let cancel = CancellationToken::new();
    let child_process = ChildSlot::new();
    *state.current.lock().unwrap() = Some(InFlightRun {
        run_id: run.id.clone(),
        cancel: cancel.clone(),
        child_process: child_process.clone(),
        abort_reason: None,
    });

    let open_mode = ctx.sessions.resolve_open_mode(&agent);
    let session = match open_mode {
        OpenMode::Resume => ctx.sessions.current_handle(&agent).unwrap_or_else(|| ctx.sessions.open_new(&agent)),
        OpenMode::Open { .. } => ctx.sessions.open_new(&agent),
    };

    let turn_input = render_turn_input(&envelopes, now_ms());
    let turn_ctx = TurnContext {
        hiboss_dir: ctx.hiboss_dir.clone(),
        agent_name: agent_name.to_string(),
        cancel,
        child_process,
    };

    let runner = match agent.provider {
        Provider::Claude => ctx.claude_runner.clone(),
        Provider::Codex => ctx.codex_runner.clone(),
    };
    let outcome = runner.run_turn(&session, &turn_input, &turn_ctx).await;

    let abort_reason = state.current.lock().unwrap().take().and_then(|r| r.abort_reason);

    match outcome {
        Ok(TurnResult { status: Some(TurnStatus::Success), final_text, usage, session_id }) => {
            ctx.store.complete_agent_run(&run.id, &final_text, usage.clone())?;

            let updated = session
                .with_session_id(session_id.or_else(|| session.session_id().map(str::to_string)))
                .with_last_run_completed_at_ms(now_ms());
            let updated = if agent.provider == Provider::Codex {
                updated.with_codex_usage(usage.clone())
            } else {
                updated
            };
            ctx.sessions.persist(agent_name, &updated)?;

            if let Some(max_context) = agent.session_policy.max_context_length {
                if usage.context_length.unwrap_or(0) > max_context {
                    ctx.sessions.request_refresh(agent_name, "max-context-length");
                }
            }

            if !final_text.trim().is_empty() {
                if let Some(last) = envelopes.last() {
                    let metadata = EnvelopeMetadata {
                        reply_to_envelope_id: Some(last.id.clone()),
                        reply_to_message_id: last.metadata.as_ref().and_then(|m| m.channel_message_id.clone()),
                        ..Default::default()
                    };
                    ctx.reply_dispatcher
                        .send_reply(&format!("agent:{agent_name}"), &last.from, &final_text, Some(metadata))
                        .await;
                }
            }
            info!(agent_name, run_id = %run.id, envelopes = ids.len(), "turn completed");
        }
        Ok(_cancelled) => {
            ctx.store.cancel_agent_run(&run.id, abort_reason.as_deref().unwrap_or("cancelled"))?;
            info!(agent_name, run_id = %run.id, "turn cancelled");
        }
        Err(e) => {
            ctx.store.fail_agent_run(&run.id, &e.to_string())?;
            return Err(e);
        }
    }

    Ok(envelopes.len())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hiboss_core::types::{Envelope, EnvelopeMetadata, Provider};
    use hiboss_sessions::SessionHandle;
    use hiboss_store::{NewEnvelope, RegisterAgentInput};

    use super::*;

    struct StaticRunner {
        final_text: &'static str,
    }

    #[async_trait]
    impl ProviderRunner for StaticRunner {
        async fn run_turn(&self, session: &SessionHandle, _turn_input: &str, _ctx: &TurnContext) -> Result<TurnResult> {
            Ok(TurnResult {
                status: Some(TurnStatus::Success),
                final_text: self.final_text.to_string(),
                usage: Default::default(),
                session_id: session.session_id().map(str::to_string).or_else(|| Some("s1".to_string())),
            })
        }
    }

    struct RecordingReplyDispatcher {
        replies: std::sync::Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ReplyDispatcher for RecordingReplyDispatcher {
        async fn send_reply(&self, from: &str, to: &str, text: &str, _metadata: Option<EnvelopeMetadata>) {
            self.replies.lock().unwrap().push((from.to_string(), to.to_string(), text.to_string()));
        }
    }

    fn make_store_with_agent() -> Arc<Store> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .register_agent(RegisterAgentInput {
                name: "nex".to_string(),
                description: None,
                workspace: None,
                provider: Provider::Claude,
                model: None,
                reasoning_effort: None,
                permission_level: Default::default(),
                session_policy: Default::default(),
                metadata: Default::default(),
            })
            .unwrap();
        store
    }

    struct NoopObserver;
    impl EnvelopesDoneObserver for NoopObserver {
        fn on_envelopes_done(&self, _ids: &[String]) {}
    }

    fn make_executor(store: Arc<Store>, reply_dispatcher: Arc<RecordingReplyDispatcher>, final_text: &'static str) -> AgentExecutor {
        AgentExecutor::new(
            store.clone(),
            Arc::new(SessionManager::new(store, "UTC")),
            Arc::new(StaticRunner { final_text }),
            Arc::new(StaticRunner { final_text }),
            reply_dispatcher,
            Arc::new(NoopObserver),
            PathBuf::from("/tmp"),
        )
    }

    #[tokio::test]
    async fn waking_an_agent_with_a_pending_envelope_produces_a_reply() {
        let store = make_store_with_agent();
        store
            .insert_envelope(NewEnvelope {
                id: "e1".to_string(),
                from: "channel:telegram:1".to_string(),
                to: "agent:nex".to_string(),
                from_boss: false,
                content_text: Some("hi".to_string()),
                content_attachments: vec![],
                metadata: None,
                deliver_at: None,
            })
            .unwrap();

        let replies = Arc::new(RecordingReplyDispatcher { replies: std::sync::Mutex::new(Vec::new()) });
        let executor = make_executor(store.clone(), replies.clone(), "hello back");

        executor.wake("nex").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recorded = replies.replies.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "agent:nex");
        assert_eq!(recorded[0].1, "channel:telegram:1");
        assert_eq!(recorded[0].2, "hello back");
    }

    #[tokio::test]
    async fn waking_an_agent_with_no_pending_envelopes_sends_no_reply() {
        let store = make_store_with_agent();
        let replies = Arc::new(RecordingReplyDispatcher { replies: std::sync::Mutex::new(Vec::new()) });
        let executor = make_executor(store, replies.clone(), "unused");

        executor.wake("nex").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(replies.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abort_current_run_returns_false_when_nothing_is_in_flight() {
        let store = make_store_with_agent();
        let replies = Arc::new(RecordingReplyDispatcher { replies: std::sync::Mutex::new(Vec::new()) });
        let executor = make_executor(store, replies, "unused");

        assert!(!executor.abort_current_run("nex", "manual"));
    }
}
