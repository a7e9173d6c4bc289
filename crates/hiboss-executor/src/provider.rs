//! ProviderRunner collaborator. Two concrete runners, each spawning a
//! one-shot CLI process in its own process group so cancellation can
//! signal the whole tree at once.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use hiboss_core::types::TokenUsage;
use hiboss_sessions::SessionHandle;

use crate::error::{ExecutorError, Result};

/// Outcome of one `ProviderRunner::run_turn` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Success,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub status: Option<TurnStatus>,
    pub final_text: String,
    pub usage: TokenUsage,
    pub session_id: Option<String>,
}

impl TurnResult {
    fn cancelled() -> Self {
        Self { status: Some(TurnStatus::Cancelled), ..Default::default() }
    }
}

/// Records the child's pid once spawned, so `AgentExecutor::abort_current_run`
/// can signal it without waiting on the turn's future to resolve.
#[derive(Clone, Default)]
pub struct ChildSlot(Arc<Mutex<Option<i32>>>);

impl ChildSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pid(&self) -> Option<i32> {
        *self.0.lock().unwrap()
    }

    fn set(&self, pid: i32) {
        *self.0.lock().unwrap() = Some(pid);
    }

    pub fn clear(&self) {
        *self.0.lock().unwrap() = None;
    }
}

/// Per-turn context handed to a `ProviderRunner`.
pub struct TurnContext {
    pub hiboss_dir: PathBuf,
    pub agent_name: String,
    pub cancel: CancellationToken,
    pub child_process: ChildSlot,
}

#[async_trait]
pub trait ProviderRunner: Send + Sync {
    async fn run_turn(&self, session: &SessionHandle, turn_input: &str, ctx: &TurnContext) -> Result<TurnResult>;
}

/// Race a spawned child's exit against `ctx.cancel`. On cancellation, sends
/// `SIGTERM` to the negative process-group id, waits a 2s grace period, then
/// `SIGKILL`s it.
async fn run_cancellable(
    mut child: tokio::process::Child,
    ctx: &TurnContext,
) -> Result<std::process::Output> {
    let pid = child.id().ok_or_else(|| ExecutorError::ProviderUnavailable("child exited before pid was observed".to_string()))? as i32;
    ctx.child_process.set(pid);

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut stderr = child.stderr.take().expect("stderr piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
        buf
    });

    tokio::select! {
        status = child.wait() => {
            ctx.child_process.clear();
            let status = status?;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(std::process::Output { status, stdout, stderr })
        }
        _ = ctx.cancel.cancelled() => {
            let _ = kill(Pid::from_raw(-pid), Signal::SIGTERM);
            if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_err() {
                warn!(pid, "child did not exit within grace period, sending SIGKILL");
                let _ = kill(Pid::from_raw(-pid), Signal::SIGKILL);
                let _ = child.wait().await;
            }
            ctx.child_process.clear();
            stdout_task.abort();
            stderr_task.abort();
            Err(ExecutorError::Cancelled)
        }
    }
}

/// `claude -p --output-format json [--resume <sessionId>] --system-prompt-file <tmp>`
pub struct ClaudeCliRunner {
    command: String,
}

impl ClaudeCliRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

impl Default for ClaudeCliRunner {
    fn default() -> Self {
        Self::new("claude")
    }
}

#[async_trait]
impl ProviderRunner for ClaudeCliRunner {
    #[instrument(skip(self, session, turn_input, ctx), fields(agent_name = %ctx.agent_name))]
    async fn run_turn(&self, session: &SessionHandle, turn_input: &str, ctx: &TurnContext) -> Result<TurnResult> {
        let system_prompt = tempfile::Builder::new()
            .prefix("hiboss-system-")
            .suffix(".txt")
            .tempfile()?;
        std::fs::write(system_prompt.path(), system_prompt_for(&ctx.agent_name))?;

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg("--system-prompt-file")
            .arg(system_prompt.path())
            .current_dir(&ctx.hiboss_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(session_id) = session.session_id() {
            cmd.arg("--resume").arg(session_id);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecutorError::ProviderUnavailable(format!("claude CLI not found: {e}"))
            } else {
                ExecutorError::ProviderUnavailable(format!("failed to spawn claude CLI: {e}"))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(turn_input.as_bytes()).await?;
        }

        let output = match run_cancellable(child, ctx).await {
            Ok(output) => output,
            Err(ExecutorError::Cancelled) => return Ok(TurnResult::cancelled()),
            Err(e) => return Err(e),
        };

        if !output.status.success() {
            return Err(ExecutorError::ProviderFailed(String::from_utf8_lossy(&output.stderr).to_string()));
        }

        parse_claude_output(&output.stdout)
    }
}

fn system_prompt_for(agent_name: &str) -> String {
    format!("You are the agent named {agent_name}, operating within the Hi-Boss daemon.")
}

fn parse_claude_output(stdout: &[u8]) -> Result<TurnResult> {
    let text = String::from_utf8_lossy(stdout);
    let json: serde_json::Value = serde_json::from_str(text.trim()).map_err(|e| {
        ExecutorError::ProviderParse(format!("failed to parse claude CLI JSON: {e}"))
    })?;

    if json.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
        let message = json.get("result").and_then(|v| v.as_str()).unwrap_or("unknown claude CLI error");
        return Err(ExecutorError::ProviderFailed(message.to_string()));
    }

    let final_text = json.get("result").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let session_id = json.get("session_id").and_then(|v| v.as_str()).map(|s| s.to_string());

    let input_tokens = json.pointer("/usage/input_tokens").and_then(|v| v.as_u64());
    let output_tokens = json.pointer("/usage/output_tokens").and_then(|v| v.as_u64());
    let cache_read_tokens = json.pointer("/usage/cache_read_input_tokens").and_then(|v| v.as_u64());
    let cache_write_tokens = json.pointer("/usage/cache_creation_input_tokens").and_then(|v| v.as_u64());
    let total_tokens = match (input_tokens, output_tokens) {
        (Some(i), Some(o)) => Some(i + o),
        _ => None,
    };

    Ok(TurnResult {
        status: Some(TurnStatus::Success),
        final_text,
        usage: TokenUsage {
            context_length: input_tokens.map(|v| v as u32),
            input_tokens,
            output_tokens,
            cache_read_tokens,
            cache_write_tokens,
            total_tokens,
        },
        session_id,
    })
}

/// `codex exec --json [--resume <sessionId>]`. Parses newline-delimited
/// JSONL events, accumulating the final assistant message and
/// `token_count` events into one `TurnResult`.
pub struct CodexCliRunner {
    command: String,
}

impl CodexCliRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

impl Default for CodexCliRunner {
    fn default() -> Self {
        Self::new("codex")
    }
}

#[async_trait]
impl ProviderRunner for CodexCliRunner {
    #[instrument(skip(self, session, turn_input, ctx), fields(agent_name = %ctx.agent_name))]
    async fn run_turn(&self, session: &SessionHandle, turn_input: &str, ctx: &TurnContext) -> Result<TurnResult> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("exec")
            .arg("--json")
            .current_dir(&ctx.hiboss_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(session_id) = session.session_id() {
            cmd.arg("--resume").arg(session_id);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecutorError::ProviderUnavailable(format!("codex CLI not found: {e}"))
            } else {
                ExecutorError::ProviderUnavailable(format!("failed to spawn codex CLI: {e}"))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(turn_input.as_bytes()).await?;
        }

        let output = match run_cancellable(child, ctx).await {
            Ok(output) => output,
            Err(ExecutorError::Cancelled) => return Ok(TurnResult::cancelled()),
            Err(e) => return Err(e),
        };

        if !output.status.success() {
            return Err(ExecutorError::ProviderFailed(String::from_utf8_lossy(&output.stderr).to_string()));
        }

        parse_codex_jsonl(&output.stdout)
    }
}

fn parse_codex_jsonl(stdout: &[u8]) -> Result<TurnResult> {
    let text = String::from_utf8_lossy(stdout);
    let mut final_text = String::new();
    let mut session_id = None;
    let mut usage = TokenUsage::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if session_id.is_none() {
            if let Some(id) = event.get("session_id").and_then(|v| v.as_str()) {
                session_id = Some(id.to_string());
            }
        }
        let Some(msg) = event.get("msg") else { continue };
        match msg.get("type").and_then(|v| v.as_str()) {
            Some("agent_message") => {
                if let Some(text) = msg.get("message").and_then(|v| v.as_str()) {
                    final_text = text.to_string();
                }
            }
            Some("token_count") => {
                usage.input_tokens = msg.get("input_tokens").and_then(|v| v.as_u64()).or(usage.input_tokens);
                usage.output_tokens = msg.get("output_tokens").and_then(|v| v.as_u64()).or(usage.output_tokens);
                usage.cache_read_tokens = msg.get("cached_input_tokens").and_then(|v| v.as_u64()).or(usage.cache_read_tokens);
                usage.total_tokens = msg.get("total_tokens").and_then(|v| v.as_u64()).or(usage.total_tokens);
                usage.context_length = usage.total_tokens.map(|v| v as u32).or(usage.context_length);
            }
            _ => {}
        }
    }

    if final_text.is_empty() {
        return Err(ExecutorError::ProviderParse("no agent_message event found in codex JSONL output".to_string()));
    }

    Ok(TurnResult {
        status: Some(TurnStatus::Success),
        final_text,
        usage,
        session_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_claude_success_output() {
        let raw = br#"{"result":"hi there","is_error":false,"usage":{"input_tokens":100,"output_tokens":20},"session_id":"s1"}"#;
        let result = parse_claude_output(raw).unwrap();
        assert_eq!(result.final_text, "hi there");
        assert_eq!(result.session_id.as_deref(), Some("s1"));
        assert_eq!(result.usage.total_tokens, Some(120));
    }

    #[test]
    fn claude_is_error_flag_becomes_an_error() {
        let raw = br#"{"result":"boom","is_error":true}"#;
        assert!(parse_claude_output(raw).is_err());
    }

    #[test]
    fn parses_codex_jsonl_events() {
        let raw = b"{\"session_id\":\"c1\",\"msg\":{\"type\":\"token_count\",\"input_tokens\":5,\"output_tokens\":1}}\n{\"msg\":{\"type\":\"agent_message\",\"message\":\"done\"}}\n";
        let result = parse_codex_jsonl(raw).unwrap();
        assert_eq!(result.final_text, "done");
        assert_eq!(result.session_id.as_deref(), Some("c1"));
        assert_eq!(result.usage.input_tokens, Some(5));
    }

    #[test]
    fn codex_output_without_agent_message_is_an_error() {
        let raw = b"{\"msg\":{\"type\":\"token_count\",\"input_tokens\":1}}\n";
        assert!(parse_codex_jsonl(raw).is_err());
    }
}
