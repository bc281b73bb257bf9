//! Session controller — handshake, document synchronization, notification
//! routing and the liveness check.
//!
//! [`SessionCore`] is the protocol-level state of one server generation:
//! negotiated capabilities, document versions and the diagnostics published
//! for open documents. [`SessionCore::reset`] drops all of it whenever the
//! process goes away.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::capabilities::ServerCapabilities;
use crate::config::LspConfig;
use crate::diagnostics::DiagnosticsStore;
use crate::protocol::{self, LogMessageParams, PublishDiagnosticsParams};
use crate::rpc::{RpcClient, RpcError, ServerNotification};
use crate::types::{Diagnostic, DiagnosticsSnapshot, LspEvent};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct SessionCore {
    rpc: RpcClient,
    capabilities: RwLock<Option<Arc<ServerCapabilities>>>,
    /// uri → last version sent. Present only while the document is open.
    documents: Mutex<HashMap<String, i32>>,
    diagnostics: Mutex<DiagnosticsStore>,
    events: mpsc::UnboundedSender<LspEvent>,
    request_timeout: Duration,
    initialize_timeout: Duration,
}

impl SessionCore {
    pub fn new(rpc: RpcClient, events: mpsc::UnboundedSender<LspEvent>, config: &LspConfig) -> Self {
        Self {
            rpc,
            capabilities: RwLock::new(None),
            documents: Mutex::new(HashMap::new()),
            diagnostics: Mutex::new(DiagnosticsStore::new()),
            events,
            request_timeout: config.request_timeout(),
            initialize_timeout: config.initialize_timeout(),
        }
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Capabilities of the current generation; `None` before the handshake.
    pub fn capabilities(&self) -> Option<Arc<ServerCapabilities>> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.capabilities().is_some()
    }

    pub(crate) fn install_capabilities(&self, capabilities: Arc<ServerCapabilities>) {
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(capabilities);
    }

    /// Run the `initialize` / `initialized` handshake.
    pub async fn initialize(&self, workspace_root: &Path) -> Result<Arc<ServerCapabilities>> {
        let root_uri = protocol::path_to_file_uri(workspace_root)?;
        let params = protocol::initialize_params(root_uri.as_str(), workspace_root);

        let result = self
            .rpc
            .request("initialize", Some(params), self.initialize_timeout)
            .await
            .context("LSP initialize request failed")?;

        if let Some(info) = result.get("serverInfo") {
            tracing::info!(
                name = info["name"].as_str().unwrap_or("unknown"),
                version = info["version"].as_str().unwrap_or("unknown"),
                "LSP server initialized"
            );
        }

        let capabilities = Arc::new(ServerCapabilities::from_initialize_result(&result));
        self.install_capabilities(Arc::clone(&capabilities));
        self.rpc.notify("initialized", Some(serde_json::json!({})));
        Ok(capabilities)
    }

    /// Open a document, or reopen it with a bumped version.
    pub fn did_open(&self, uri: &str, text: &str) {
        if !self.is_initialized() {
            tracing::trace!(uri, "Skipping didOpen before initialization");
            return;
        }
        self.send_open(&mut lock(&self.documents), uri, text);
    }

    /// Send the whole new text. A change for an unopened uri opens it.
    pub fn did_change(&self, uri: &str, text: &str) {
        if !self.is_initialized() {
            tracing::trace!(uri, "Skipping didChange before initialization");
            return;
        }
        let mut documents = lock(&self.documents);
        if let Some(version) = documents.get_mut(uri) {
            *version += 1;
            self.rpc.notify(
                "textDocument/didChange",
                Some(protocol::did_change_params(uri, *version, text)),
            );
            return;
        }
        self.send_open(&mut documents, uri, text);
    }

    /// Version bump and transmission under the caller's lock.
    fn send_open(&self, documents: &mut HashMap<String, i32>, uri: &str, text: &str) {
        let version = documents.entry(uri.to_string()).or_insert(0);
        *version += 1;
        self.rpc.notify(
            "textDocument/didOpen",
            Some(protocol::did_open_params(
                uri,
                protocol::language_id_for(uri),
                *version,
                text,
            )),
        );
    }

    pub fn did_close(&self, uri: &str) {
        if !self.is_initialized() {
            return;
        }
        let mut documents = lock(&self.documents);
        if documents.remove(uri).is_some() {
            self.rpc.notify(
                "textDocument/didClose",
                Some(protocol::text_document_params(uri)),
            );
            if lock(&self.diagnostics).remove(uri) {
                self.announce_cleared(uri.to_string());
            }
        }
    }

    pub fn did_save(&self, uri: &str, text: Option<&str>) {
        if !self.is_initialized() {
            return;
        }
        self.rpc.notify(
            "textDocument/didSave",
            Some(protocol::did_save_params(uri, text)),
        );
    }

    pub fn document_version(&self, uri: &str) -> Option<i32> {
        lock(&self.documents).get(uri).copied()
    }

    /// Forget everything tied to the current server generation.
    pub fn reset(&self, reason: &str) {
        let rejected = self.rpc.reject_all(&RpcError::Disconnected);
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        lock(&self.documents).clear();
        let cleared = lock(&self.diagnostics).clear();
        tracing::debug!(rejected, cleared = cleared.len(), "LSP session reset: {reason}");
        for uri in cleared {
            self.announce_cleared(uri);
        }
    }

    fn announce_cleared(&self, uri: String) {
        let _ = self.events.send(LspEvent::Diagnostics {
            uri,
            items: Vec::new(),
        });
    }

    /// Best-effort `shutdown` then `exit`.
    pub async fn shutdown(&self) {
        if !self.is_initialized() {
            return;
        }
        if let Err(e) = self.rpc.request("shutdown", None, SHUTDOWN_TIMEOUT).await {
            tracing::debug!("LSP shutdown request failed: {e}");
        }
        self.rpc.notify("exit", None);
    }

    pub fn handle_notification(&self, notification: ServerNotification) {
        let ServerNotification { method, params } = notification;
        match method.as_str() {
            "textDocument/publishDiagnostics" => self.publish_diagnostics(params),
            "window/logMessage" | "window/showMessage" => {
                let Some(msg) = decode::<LogMessageParams>(&method, params) else {
                    return;
                };
                match msg.kind {
                    1 => tracing::error!(target: "folio_lsp::server", "{}", msg.message),
                    2 => tracing::warn!(target: "folio_lsp::server", "{}", msg.message),
                    3 => tracing::info!(target: "folio_lsp::server", "{}", msg.message),
                    _ => tracing::debug!(target: "folio_lsp::server", "{}", msg.message),
                }
            }
            _ => tracing::trace!(%method, "Ignoring LSP notification"),
        }
    }

    fn publish_diagnostics(&self, params: Option<Value>) {
        let Some(params) = decode::<PublishDiagnosticsParams>("textDocument/publishDiagnostics", params)
        else {
            return;
        };
        let items: Vec<Diagnostic> = params
            .diagnostics
            .iter()
            .map(|d| d.to_diagnostic(&params.uri))
            .collect();
        // Lock order: documents, then diagnostics.
        let documents = lock(&self.documents);
        if !documents.contains_key(&params.uri) {
            tracing::trace!(uri = %params.uri, "Ignoring diagnostics for a document that is not open");
            return;
        }
        tracing::debug!(uri = %params.uri, count = items.len(), "Received diagnostics");
        lock(&self.diagnostics).replace(params.uri.clone(), items.clone());
        drop(documents);
        let _ = self.events.send(LspEvent::Diagnostics {
            uri: params.uri,
            items,
        });
    }

    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        lock(&self.diagnostics).for_uri(uri)
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        lock(&self.diagnostics).snapshot()
    }

    /// Reject everything when the server has gone silent. Returns how many
    /// requests were rejected.
    pub fn check_health(&self, threshold: Duration) -> usize {
        let rejected = self.rpc.check_health(threshold);
        if rejected > 0 {
            tracing::warn!(rejected, "LSP server unresponsive; rejected pending requests");
            let _ = self.events.send(LspEvent::Unresponsive { rejected });
        }
        rejected
    }
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, params: Option<Value>) -> Option<T> {
    match serde_json::from_value(params.unwrap_or(Value::Null)) {
        Ok(params) => Some(params),
        Err(e) => {
            tracing::debug!(method, "Dropping malformed LSP notification: {e}");
            None
        }
    }
}

/// Periodic liveness check. Never restarts the process.
pub(crate) async fn health_loop(core: Arc<SessionCore>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        core.check_health(interval * 2);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::SessionCore;
    use crate::capabilities::ServerCapabilities;
    use crate::config::LspConfig;
    use crate::rpc::RpcClient;
    use crate::rpc::testing::{RecordingSink, response};
    use crate::types::LspEvent;

    pub(crate) struct Fixture {
        pub core: Arc<SessionCore>,
        pub sink: Arc<RecordingSink>,
        pub events: mpsc::UnboundedReceiver<LspEvent>,
    }

    impl Fixture {
        pub fn new() -> Self {
            let sink = Arc::new(RecordingSink::default());
            let (tx, events) = mpsc::unbounded_channel();
            let core = Arc::new(SessionCore::new(
                RpcClient::new(sink.clone()),
                tx,
                &LspConfig::default(),
            ));
            Self { core, sink, events }
        }

        /// A fixture whose handshake already advertised `capabilities`.
        pub fn initialized(capabilities: &Value) -> Self {
            let fixture = Self::new();
            fixture
                .core
                .install_capabilities(Arc::new(ServerCapabilities::from_initialize_result(
                    &serde_json::json!({ "capabilities": capabilities }),
                )));
            fixture
        }

        /// Drive `call` until it sends a request, answer it with `result`,
        /// and return the call's output.
        pub async fn respond<T: Send + 'static>(
            &self,
            call: impl Future<Output = T> + Send + 'static,
            result: Value,
        ) -> T {
            let before = self.sink.sent().len();
            let task = tokio::spawn(call);
            while self.sink.sent().len() == before {
                tokio::task::yield_now().await;
            }
            let id = self.sink.last()["id"].clone();
            self.core.rpc().handle_incoming(response(&id, result));
            task.await.expect("call task")
        }
    }
}
