//! Local WebSocket server that a browser extension connects to.
//!
//! The extension's content script runs inside the portal tab; it evaluates the
//! JavaScript we send and answers with an `EvalResult` carrying the same id.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::LookupError;

pub const DEFAULT_WS_ADDR: &str = "127.0.0.1:17373";

type BridgeResult = Result<serde_json::Value, String>;
type PendingMap = HashMap<String, oneshot::Sender<BridgeResult>>;
type Pending = Arc<Mutex<PendingMap>>;
type Clients = Arc<Mutex<Vec<Client>>>;

#[derive(Debug, Serialize, Deserialize)]
struct EvalRequest {
    id: String,
    action: String,
    code: String,
    #[serde(default)]
    await_promise: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum BridgeIncoming {
    EvalResult {
        id: String,
        ok: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
    Typed(TypedIncoming),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum TypedIncoming {
    #[serde(rename = "hello")]
    Hello { from: Option<String> },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "console_event")]
    ConsoleEvent {
        level: Option<String>,
        args: Option<serde_json::Value>,
    },
}

struct Client {
    id: Uuid,
    sender: mpsc::UnboundedSender<Message>,
}

pub struct ExtensionBridge {
    _server_task: JoinHandle<()>,
    /// Stops every per-client task when the bridge goes away.
    shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
    clients: Clients,
    pending: Pending,
}

impl Drop for ExtensionBridge {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self._server_task.abort();
    }
}

/// Removes a pending eval entry unless the reply already claimed it, so an
/// eval future dropped mid-wait does not leak its oneshot.
struct PendingGuard {
    pending: Pending,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        match self.pending.try_lock() {
            Ok(mut map) => {
                map.remove(&self.id);
            }
            Err(_) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let pending = self.pending.clone();
                    let id = std::mem::take(&mut self.id);
                    handle.spawn(async move {
                        pending.lock().await.remove(&id);
                    });
                }
            }
        }
    }
}

impl ExtensionBridge {
    /// Bind the bridge on `addr` and start accepting extension clients.
    ///
    /// Retries once after two seconds when the port is still held by a
    /// previous run.
    pub async fn start(addr: &str) -> Result<Arc<ExtensionBridge>, LookupError> {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                warn!(%addr, ?e, "Port in use, waiting 2 seconds and retrying once...");
                tokio::time::sleep(Duration::from_secs(2)).await;
                TcpListener::bind(addr).await.map_err(|e2| {
                    error!(%addr, ?e2, "Failed to bind extension bridge after retry");
                    LookupError::BridgeUnavailable(format!("cannot bind {addr}: {e2}"))
                })?
            }
            Err(e) => {
                return Err(LookupError::BridgeUnavailable(format!(
                    "cannot bind {addr}: {e}"
                )))
            }
        };

        let local_addr = listener.local_addr().ok();
        info!(addr = ?local_addr, "Extension bridge listening");

        let clients: Clients = Arc::new(Mutex::new(Vec::new()));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let server_task = tokio::spawn(accept_loop(
            listener,
            clients.clone(),
            pending.clone(),
            shutdown.clone(),
        ));

        Ok(Arc::new(ExtensionBridge {
            _server_task: server_task,
            shutdown,
            local_addr,
            clients,
            pending,
        }))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn is_client_connected(&self) -> bool {
        !self.clients.lock().await.is_empty()
    }

    /// Wait until an extension client is attached, up to `timeout`.
    pub async fn wait_for_client(&self, timeout: Duration) -> Result<(), LookupError> {
        if self.is_client_connected().await {
            return Ok(());
        }
        info!("Waiting for extension client to connect...");

        let step = Duration::from_millis(500);
        let mut waited = Duration::ZERO;
        while waited < timeout {
            tokio::time::sleep(step).await;
            waited += step;

            if self.is_client_connected().await {
                info!("Extension client connected after {} ms", waited.as_millis());
                return Ok(());
            }
            if waited.as_millis() % 3000 == 0 {
                info!(
                    "Still waiting for extension client... {}s",
                    waited.as_secs()
                );
            }
        }

        Err(LookupError::Timeout(format!(
            "no extension client connected within {timeout:?}; open the portal tab with the extension enabled"
        )))
    }

    /// Evaluate `code` in the active portal tab.
    ///
    /// Returns `Ok(None)` when no client is attached or the client did not
    /// answer within `timeout`. A script failure comes back as a string
    /// prefixed with `ERROR:`.
    pub async fn eval_in_active_tab(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<Option<String>, LookupError> {
        if self.clients.lock().await.is_empty() {
            debug!("ExtensionBridge: no clients connected; skipping eval");
            return Ok(None);
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel::<BridgeResult>();
        self.pending.lock().await.insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: id.clone(),
        };
        let req = EvalRequest {
            id: id.clone(),
            action: "eval".into(),
            code: code.to_string(),
            await_promise: true,
        };
        let payload = serde_json::to_string(&req)
            .map_err(|e| LookupError::Script(format!("bridge serialize: {e}")))?;

        let mut sent = false;
        {
            let mut clients = self.clients.lock().await;
            // Drop clients whose writer task has gone away
            clients.retain(|c| !c.sender.is_closed());
            debug!(clients = clients.len(), preview = %payload.chars().take(120).collect::<String>(), "Sending eval to extension");
            if let Some(c) = clients.first() {
                sent = c.sender.send(Message::Text(payload)).is_ok();
            }
        }
        if !sent {
            warn!("ExtensionBridge: failed to send eval to first client");
            return Ok(None);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(val))) => Ok(Some(match val {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })),
            Ok(Ok(Err(err))) => Ok(Some(format!("ERROR: {err}"))),
            Ok(Err(_canceled)) => {
                warn!("ExtensionBridge: oneshot canceled by receiver");
                Ok(None)
            }
            Err(_elapsed) => {
                warn!(id = %id, "ExtensionBridge: timed out waiting for EvalResult");
                Ok(None)
            }
        }
    }

    /// Number of evals still waiting for a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

async fn accept_loop(
    listener: TcpListener,
    clients: Clients,
    pending: Pending,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!("ws accept error: {}", e);
                continue;
            }
        };
        tokio::spawn(serve_client(
            stream,
            peer,
            clients.clone(),
            pending.clone(),
            shutdown.clone(),
        ));
    }
}

async fn serve_client(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    clients: Clients,
    pending: Pending,
    shutdown: CancellationToken,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%peer, "ws handshake error: {}", e);
            return;
        }
    };
    let (mut sink, mut stream) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sink.send(msg).await {
                warn!("ws send error: {}", e);
                break;
            }
        }
    });

    let client_id = Uuid::new_v4();
    clients.lock().await.push(Client {
        id: client_id,
        sender: tx,
    });
    debug!(%peer, %client_id, "Extension client registered");

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(%peer, "Bridge shutting down, closing client");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(msg)) => msg,
                _ => break,
            },
        };
        if !msg.is_text() {
            continue;
        }
        let txt = msg.into_text().unwrap_or_default();
        match serde_json::from_str::<BridgeIncoming>(&txt) {
            Ok(BridgeIncoming::EvalResult {
                id,
                ok,
                result,
                error,
            }) => {
                if ok {
                    debug!(id = %id, "Bridge received EvalResult");
                } else {
                    let head: String = error
                        .as_deref()
                        .unwrap_or("unknown error")
                        .chars()
                        .take(400)
                        .collect();
                    warn!(id = %id, error = %head, "Bridge received EvalResult error");
                }
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(if ok {
                        Ok(result.unwrap_or(serde_json::Value::Null))
                    } else {
                        Err(error.unwrap_or_else(|| "unknown error".into()))
                    });
                }
            }
            Ok(BridgeIncoming::Typed(TypedIncoming::ConsoleEvent { level, args })) => {
                let args_str = args.map(|v| v.to_string()).unwrap_or_else(|| "[]".into());
                match level.as_deref().unwrap_or("log") {
                    "error" => error!(args = %args_str, "Page console error"),
                    "warning" | "warn" => warn!(args = %args_str, "Page console warning"),
                    _ => debug!(args = %args_str, "Page console event"),
                }
            }
            Ok(BridgeIncoming::Typed(TypedIncoming::Hello { from })) => {
                info!(from = ?from, "Extension connected");
            }
            Ok(BridgeIncoming::Typed(TypedIncoming::Pong)) => {}
            Err(e) => warn!("Invalid incoming JSON: {}", e),
        }
    }

    writer.abort();
    let mut clients = clients.lock().await;
    clients.retain(|c| c.id != client_id);
    if clients.is_empty() {
        // Nobody is left to answer outstanding evals.
        let mut pending = pending.lock().await;
        if !pending.is_empty() {
            warn!(count = pending.len(), "Last client disconnected with pending evals, clearing them");
            pending.clear();
        }
    }
    info!(%peer, "Extension client disconnected");
}
