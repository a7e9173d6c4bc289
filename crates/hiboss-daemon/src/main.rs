//! `hibossd` — the Hi-Boss daemon binary: one process per data directory,
//! exposing the IPC surface over a Unix domain socket and driving the
//! envelope/cron schedulers and agent turn loop in the background.

mod app;
mod handlers;
mod ipc;
mod lock;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hiboss_channels::telegram::{InboundMessage, TelegramAdapter};
use hiboss_core::config::HibossConfig;
use hiboss_executor::{ClaudeCliRunner, CodexCliRunner};
use hiboss_memory::MemoryManager;
use hiboss_router::RouteEnvelopeInput;
use hiboss_store::Store;

use app::AppState;
use lock::{LockError, SingleInstanceLock};

/// Hi-Boss daemon — background runtime for Boss-managed agents.
#[derive(Parser)]
#[command(name = "hibossd")]
#[command(author, version, about = "Hi-Boss daemon — background agent runtime")]
struct Args {
    /// Data directory root. Defaults to `$HIBOSS_HOME`, then `~/hiboss`.
    #[arg(long)]
    data_dir: Option<String>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("hiboss={level}").into()),
        )
        .init();

    let data_dir = match HibossConfig::resolve_data_dir(args.data_dir.as_deref()) {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "failed to resolve data directory");
            std::process::exit(1);
        }
    };

    if let Err(e) = ensure_layout(&data_dir) {
        error!(error = %e, "failed to prepare data directory");
        std::process::exit(1);
    }

    let config = HibossConfig::load(&data_dir);

    let lock = match SingleInstanceLock::acquire(&config.pid_path(), &config.socket_path()) {
        Ok(lock) => lock,
        Err(LockError::AlreadyRunning(pid)) => {
            error!(pid, "another hibossd instance already holds the lock for this data dir");
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "failed to acquire single-instance lock");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, lock).await {
        error!(error = %e, "hibossd exited with an error");
        std::process::exit(1);
    }

    Ok(())
}

fn ensure_layout(data_dir: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(data_dir.join("agents"))?;
    Ok(())
}

async fn run(config: HibossConfig, lock: SingleInstanceLock) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&config.db_path())?);
    let memory = Arc::new(MemoryManager::open(&config.db_path())?);

    let claude_runner = Arc::new(ClaudeCliRunner::new("claude"));
    let codex_runner = Arc::new(CodexCliRunner::new("codex"));

    let app = AppState::new(config.clone(), store, memory, claude_runner, codex_runner);

    if let Some(telegram) = &app.config.telegram {
        let adapter_app = app.clone();
        let on_message: hiboss_channels::telegram::InboundHandler = Arc::new(move |msg: InboundMessage| {
            let app = adapter_app.clone();
            tokio::spawn(async move { route_inbound_telegram(app, msg).await });
        });
        let adapter = Arc::new(TelegramAdapter::new(telegram.bot_token.clone(), on_message));
        app.adapters.register(adapter);
    }

    if let Err(e) = app.adapters.start_all().await {
        warn!(error = %e, "one or more adapters failed to start");
    }

    if let Err(e) = app.cron_scheduler.reconcile_all_schedules().await {
        warn!(error = %e, "failed to reconcile cron schedules on startup");
    }

    app.envelope_scheduler.start();

    let shutdown = CancellationToken::new();
    let serve_shutdown = shutdown.clone();
    let serve_app = app.clone();
    let socket_path = app.config.socket_path();
    let server = tokio::spawn(async move { ipc::serve(serve_app, &socket_path, serve_shutdown).await });

    info!(socket = %app.config.socket_path().display(), "hibossd ready");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");

    shutdown.cancel();
    if let Err(e) = server.await {
        warn!(error = %e, "ipc server task panicked during shutdown");
    }

    app.adapters.stop_all().await;
    app.envelope_scheduler.stop().await;
    drop(lock);

    info!("hibossd stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Resolves an inbound channel message to its bound agent and hands it to
/// the router, exactly as an `envelope.send` call from that agent would.
async fn route_inbound_telegram(app: Arc<AppState>, msg: InboundMessage) {
    let binding = match app.store.get_binding_by_adapter("telegram", &msg.chat_id) {
        Ok(Some(binding)) => binding,
        Ok(None) => {
            warn!(chat_id = %msg.chat_id, "inbound telegram message from an unbound chat, dropping");
            return;
        }
        Err(e) => {
            error!(error = %e, "failed to resolve telegram binding");
            return;
        }
    };

    let metadata = hiboss_core::types::EnvelopeMetadata {
        channel_message_id: Some(msg.channel_message_id),
        author: msg.author,
        reply_to_message_id: msg.reply_to_message_id,
        ..Default::default()
    };

    let input = RouteEnvelopeInput {
        id: None,
        from: format!("channel:telegram:{}", msg.chat_id),
        to: format!("agent:{}", binding.agent_name),
        from_boss: false,
        content_text: msg.text,
        content_attachments: Vec::new(),
        metadata: Some(metadata),
        deliver_at: None,
    };

    if app.router.route_envelope(input).await.is_err() {
        warn!("failed to route inbound telegram message");
    }
}
