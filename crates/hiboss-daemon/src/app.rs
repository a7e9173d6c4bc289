//! Central shared state. One `Arc<AppState>` is handed to every IPC
//! connection and to the adapters' inbound callbacks.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use hiboss_authz::PermissionPolicy;
use hiboss_channels::registry::AdapterRegistry;
use hiboss_core::config::HibossConfig;
use hiboss_core::hooks::AgentWaker;
use hiboss_core::time::now_ms;
use hiboss_executor::AgentExecutor;
use hiboss_memory::MemoryManager;
use hiboss_router::{EnvelopeScheduler, Router};
use hiboss_scheduler::CronScheduler;
use hiboss_sessions::SessionManager;
use hiboss_store::Store;

/// Breaks the Router <-> AgentExecutor construction cycle: `Router::new`
/// needs an `Arc<dyn AgentWaker>` before the executor that implements it is
/// built. Wired once, right after the executor exists (see `AppState::new`)
/// — the same deferred-identity `OnceLock` shape the Discord adapter uses
/// for its `bot_id`.
#[derive(Default)]
struct LazyWaker {
    inner: OnceLock<Arc<dyn AgentWaker>>,
}

impl LazyWaker {
    fn wire(&self, waker: Arc<dyn AgentWaker>) {
        self.inner
            .set(waker)
            .unwrap_or_else(|_| panic!("LazyWaker wired twice"));
    }
}

#[async_trait]
impl AgentWaker for LazyWaker {
    async fn wake(&self, agent_name: &str) {
        match self.inner.get() {
            Some(waker) => waker.wake(agent_name).await,
            None => tracing::warn!(agent_name, "agent waker not yet wired, dropping wake"),
        }
    }
}

/// Bundles every component (C1, C4-C10) plus the collaborators (adapters,
/// memory) behind one handle, passed to the IPC dispatch table.
pub struct AppState {
    pub config: HibossConfig,
    pub store: Arc<Store>,
    pub policy: PermissionPolicy,
    pub router: Arc<Router>,
    pub envelope_scheduler: Arc<EnvelopeScheduler>,
    pub cron_scheduler: Arc<CronScheduler>,
    pub sessions: Arc<SessionManager>,
    pub executor: Arc<AgentExecutor>,
    pub adapters: AdapterRegistry,
    pub memory: Arc<MemoryManager>,
    pub started_at_ms: i64,
}

impl AppState {
    /// Assemble every component, resolving the Router/Executor/CronScheduler
    /// construction cycle via `LazyWaker`.
    pub fn new(
        config: HibossConfig,
        store: Arc<Store>,
        memory: Arc<MemoryManager>,
        claude_runner: Arc<dyn hiboss_executor::provider::ProviderRunner>,
        codex_runner: Arc<dyn hiboss_executor::provider::ProviderRunner>,
    ) -> Arc<Self> {
        let policy = PermissionPolicy::load(&store);
        let adapters = AdapterRegistry::new();

        let lazy_waker: Arc<LazyWaker> = Arc::new(LazyWaker::default());
        let router = Arc::new(Router::new(store.clone(), adapters.clone(), lazy_waker.clone()));

        let cron_scheduler = Arc::new(CronScheduler::new(
            store.clone(),
            router.clone(),
            config.boss.timezone.clone(),
        ));

        let sessions = Arc::new(SessionManager::new(store.clone(), config.boss.timezone.clone()));
        let executor = Arc::new(AgentExecutor::new(
            store.clone(),
            sessions.clone(),
            claude_runner,
            codex_runner,
            router.clone(),
            cron_scheduler.clone(),
            config.agents_dir(),
        ));
        lazy_waker.wire(executor.clone());

        let envelope_scheduler = Arc::new(EnvelopeScheduler::new(store.clone(), router.clone()));

        Arc::new(Self {
            config,
            store,
            policy,
            router,
            envelope_scheduler,
            cron_scheduler,
            sessions,
            executor,
            adapters,
            memory,
            started_at_ms: now_ms(),
        })
    }

    pub fn uptime_ms(&self) -> i64 {
        now_ms() - self.started_at_ms
    }
}
