//! JSON-RPC client — request ids, response correlation, per-request
//! timeouts and supersession of same-purpose requests.
//!
//! Registration, supersession and transmission of a request all happen
//! synchronously inside [`RpcClient::request`]; only waiting for the reply
//! is asynchronous. An older in-flight request sharing the new one's dedupe
//! key is therefore rejected strictly before the new frame is handed to the
//! [`FrameSink`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::codec::encode_frame;
use crate::protocol::{self, Incoming, Notification, Request, Response};

/// Outbound seam: receives fully framed messages.
///
/// Delivery is best effort. Implementations drop frames they cannot write
/// and must not call back into the [`RpcClient`].
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Vec<u8>);
}

/// Why a request did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("{method} timed out after {}ms", after.as_millis())]
    Timeout { method: String, after: Duration },
    #[error("{method} superseded by a newer request")]
    Superseded { method: String },
    #[error("language server is unresponsive")]
    Unresponsive,
    #[error("language server disconnected")]
    Disconnected,
    #[error("failed to encode {method}: {message}")]
    Encode { method: String, message: String },
}

/// A notification pushed by the server, returned from
/// [`RpcClient::handle_incoming`] for the session to route.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServerNotification {
    pub method: String,
    pub params: Option<Value>,
}

type Reply = oneshot::Sender<Result<Value, RpcError>>;

struct PendingRequest {
    method: String,
    dedupe_key: String,
    reply: Reply,
    timer: JoinHandle<()>,
    sent_at: Instant,
}

impl PendingRequest {
    fn settle(self, outcome: Result<Value, RpcError>) {
        self.timer.abort();
        let _ = self.reply.send(outcome);
    }
}

struct RpcState {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
    /// dedupe key → id of the newest in-flight request with that key.
    dedupe: HashMap<String, u64>,
    last_response_at: Instant,
}

impl RpcState {
    /// Remove a request from every table.
    fn take(&mut self, id: u64) -> Option<PendingRequest> {
        let request = self.pending.remove(&id)?;
        if self.dedupe.get(&request.dedupe_key) == Some(&id) {
            self.dedupe.remove(&request.dedupe_key);
        }
        Some(request)
    }

    fn reject_all(&mut self, error: &RpcError) -> usize {
        self.dedupe.clear();
        let drained: Vec<PendingRequest> = self.pending.drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for request in drained {
            request.settle(Err(error.clone()));
        }
        count
    }
}

fn lock_state(state: &Mutex<RpcState>) -> MutexGuard<'_, RpcState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Requests that share a dedupe key supersede one another: same method on
/// the same document, or the bare method when no document is involved.
pub(crate) fn dedupe_key(method: &str, params: Option<&Value>) -> String {
    match protocol::document_uri(params) {
        Some(uri) => format!("{method}:{uri}"),
        None => method.to_string(),
    }
}

/// Shared handle to the request table. Cloning is cheap.
#[derive(Clone)]
pub struct RpcClient {
    state: Arc<Mutex<RpcState>>,
    sink: Arc<dyn FrameSink>,
}

impl RpcClient {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RpcState {
                next_id: 1,
                pending: HashMap::new(),
                dedupe: HashMap::new(),
                last_response_at: Instant::now(),
            })),
            sink,
        }
    }

    /// Send a request and return a future for its outcome.
    ///
    /// Must be called from within a tokio runtime: the timeout runs as a
    /// spawned task so the request settles even if the future is dropped.
    pub fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> impl Future<Output = Result<Value, RpcError>> + Send + use<> {
        let (tx, rx) = oneshot::channel();
        let key = dedupe_key(method, params.as_ref());

        {
            let mut state = lock_state(&self.state);
            let id = state.next_id;
            state.next_id += 1;

            if let Some(older_id) = state.dedupe.insert(key.clone(), id)
                && let Some(older) = state.pending.remove(&older_id)
            {
                tracing::debug!(method, id = older_id, "Superseding in-flight LSP request");
                let method = older.method.clone();
                older.settle(Err(RpcError::Superseded { method }));
            }

            match encode_frame(&Request::new(id, method, params)) {
                Ok(frame) => {
                    let timer = tokio::spawn(expire(Arc::clone(&self.state), id, timeout));
                    state.pending.insert(
                        id,
                        PendingRequest {
                            method: method.to_string(),
                            dedupe_key: key,
                            reply: tx,
                            timer,
                            sent_at: Instant::now(),
                        },
                    );
                    tracing::trace!(method, id, "Sending LSP request");
                    self.sink.send(frame);
                }
                Err(e) => {
                    state.dedupe.remove(&key);
                    let _ = tx.send(Err(RpcError::Encode {
                        method: method.to_string(),
                        message: e.to_string(),
                    }));
                }
            }
        }

        async move { rx.await.unwrap_or(Err(RpcError::Disconnected)) }
    }

    /// Send a notification. Fire-and-forget.
    pub fn notify(&self, method: &str, params: Option<Value>) {
        match encode_frame(&Notification::new(method, params)) {
            Ok(frame) => {
                tracing::trace!(method, "Sending LSP notification");
                self.sink.send(frame);
            }
            Err(e) => tracing::warn!(method, "Failed to encode LSP notification: {e}"),
        }
    }

    /// Route one inbound frame.
    ///
    /// Responses settle their pending request. Server-initiated requests
    /// are answered with a `null` result so the server never waits on us.
    /// Notifications are handed back to the caller.
    pub(crate) fn handle_incoming(&self, frame: Value) -> Option<ServerNotification> {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame");
            return None;
        };

        match incoming {
            Incoming::Response { id, outcome } => {
                let settled = {
                    let mut state = lock_state(&self.state);
                    state.last_response_at = Instant::now();
                    state.take(id)
                };
                match settled {
                    Some(request) => {
                        let outcome = outcome.map_err(|e| RpcError::Server {
                            code: e.code,
                            message: e.message,
                        });
                        request.settle(outcome);
                    }
                    None => tracing::trace!(id, "Ignoring response for unknown LSP request"),
                }
                None
            }
            Incoming::ServerRequest { id, method } => {
                tracing::debug!(%method, "LSP server sent request; replying with null result");
                match encode_frame(&Response::null_result(id)) {
                    Ok(frame) => self.sink.send(frame),
                    Err(e) => tracing::warn!(%method, "Failed to encode reply: {e}"),
                }
                None
            }
            Incoming::Notification { method, params } => {
                Some(ServerNotification { method, params })
            }
        }
    }

    /// Liveness check.
    ///
    /// When some request has waited longer than `threshold` and no response
    /// at all has arrived within `threshold`, every pending request is
    /// rejected with [`RpcError::Unresponsive`]. Returns how many were.
    pub fn check_health(&self, threshold: Duration) -> usize {
        let now = Instant::now();
        let mut state = lock_state(&self.state);
        let stalled = state
            .pending
            .values()
            .any(|p| now.duration_since(p.sent_at) > threshold);
        let silent = now.duration_since(state.last_response_at) > threshold;
        if !(stalled && silent) {
            return 0;
        }
        state.reject_all(&RpcError::Unresponsive)
    }

    /// Reject every pending request with `error` and clear all bookkeeping.
    pub fn reject_all(&self, error: &RpcError) -> usize {
        lock_state(&self.state).reject_all(error)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock_state(&self.state).pending.len()
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        lock_state(&self.state).dedupe.len()
    }
}

async fn expire(state: Arc<Mutex<RpcState>>, id: u64, after: Duration) {
    tokio::time::sleep(after).await;
    let expired = lock_state(&state).take(id);
    if let Some(request) = expired {
        tracing::debug!(method = %request.method, id, "LSP request timed out");
        let _ = request.reply.send(Err(RpcError::Timeout {
            method: request.method,
            after,
        }));
    }
}
