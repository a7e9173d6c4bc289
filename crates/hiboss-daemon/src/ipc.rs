//! C3 IpcServer: newline-delimited JSON-RPC 2.0 over a Unix
//! domain socket. One task per connection; each line in, one line out.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use hiboss_protocol::frames::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;

use crate::app::AppState;
use crate::handlers;

pub async fn serve(
    app: Arc<AppState>,
    socket_path: &std::path::Path,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("ipc server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let app = app.clone();
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(app, stream, conn_shutdown).await {
                                warn!(error = %e, "ipc connection ended with an error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept ipc connection");
                    }
                }
            }
        }
    }
}

#[instrument(skip(app, stream, shutdown))]
async fn handle_connection(
    app: Arc<AppState>,
    stream: UnixStream,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let n = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            n = reader.read_line(&mut line) => n?,
        };
        if n == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_line(&app, trimmed).await;
        let mut out = serde_json::to_string(&response).unwrap_or_else(|e| {
            serde_json::to_string(&JsonRpcResponse::err(
                Value::Null,
                JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, format!("failed to serialize response: {e}")),
            ))
            .expect("fallback response must serialize")
        });
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;
    }
}

async fn dispatch_line(app: &Arc<AppState>, line: &str) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return JsonRpcResponse::err(
                Value::Null,
                JsonRpcError::invalid_request(format!("malformed request: {e}")),
            )
        }
    };

    if request.jsonrpc != "2.0" {
        return JsonRpcResponse::err(
            request.id,
            JsonRpcError::invalid_request("unsupported jsonrpc version, expected \"2.0\""),
        );
    }

    let id = request.id.clone();
    match handlers::dispatch(app, request).await {
        Ok(result) => JsonRpcResponse::ok(id, result),
        Err(err) => JsonRpcResponse::err(id, err),
    }
}
