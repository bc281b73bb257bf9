//! LspManager facade — public API consumed by the editing surface.
//!
//! One manager owns one language server session: the supervised process,
//! the RPC client writing to it, and the protocol state of the current
//! generation. A pump task routes everything the supervisor reports. A
//! `Running` transition starts the handshake. Any other transition resets
//! the session, so nothing negotiated with one process leaks into the next.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::LspConfig;
use crate::features::LanguageFeatures;
use crate::rpc::{FrameSink, RpcClient};
use crate::session::{SessionCore, health_loop};
use crate::supervisor::{ProcessSupervisor, SupervisorEvent};
use crate::types::{Diagnostic, DiagnosticsSnapshot, LspEvent, ServerState};

/// Public facade for the language-intelligence client.
pub struct LspManager {
    workspace_root: PathBuf,
    /// `None` when the client is disabled by configuration.
    supervisor: Option<ProcessSupervisor>,
    core: Arc<SessionCore>,
    event_rx: mpsc::UnboundedReceiver<LspEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl LspManager {
    /// Construct the manager and spawn the server rooted at
    /// `workspace_root`.
    ///
    /// Must be called from within a tokio runtime. With `enabled = false`
    /// nothing is spawned and the state stays [`ServerState::Stopped`].
    pub fn start(config: LspConfig, workspace_root: &Path) -> Self {
        let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();
        let supervisor =
            ProcessSupervisor::new(config.server.clone(), config.restart.clone(), supervisor_tx);

        if !config.enabled {
            tracing::info!("LSP client disabled by configuration");
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let rpc = RpcClient::new(Arc::new(supervisor));
            return Self {
                workspace_root: workspace_root.to_path_buf(),
                supervisor: None,
                core: Arc::new(SessionCore::new(rpc, event_tx, &config)),
                event_rx,
                tasks: Vec::new(),
            };
        }

        tracing::info!(
            command = %config.server.command,
            root = %workspace_root.display(),
            "Starting LSP server"
        );
        let sink: Arc<dyn FrameSink> = Arc::new(supervisor.clone());
        let manager = Self::wire(&config, workspace_root, supervisor, supervisor_rx, sink);
        if let Some(supervisor) = &manager.supervisor {
            supervisor.start(workspace_root);
        }
        manager
    }

    fn wire(
        config: &LspConfig,
        workspace_root: &Path,
        supervisor: ProcessSupervisor,
        supervisor_rx: mpsc::UnboundedReceiver<SupervisorEvent>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let core = Arc::new(SessionCore::new(RpcClient::new(sink), event_tx.clone(), config));

        let pump = tokio::spawn(pump(
            supervisor_rx,
            Pump {
                core: Arc::clone(&core),
                supervisor: supervisor.clone(),
                events: event_tx,
                workspace_root: workspace_root.to_path_buf(),
            },
        ));
        let health = tokio::spawn(health_loop(
            Arc::clone(&core),
            config.health_check_interval(),
        ));

        Self {
            workspace_root: workspace_root.to_path_buf(),
            supervisor: Some(supervisor),
            core,
            event_rx,
            tasks: vec![pump, health],
        }
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.supervisor
            .as_ref()
            .map_or(ServerState::Stopped, ProcessSupervisor::state)
    }

    /// Handle to the capability-gated feature providers.
    #[must_use]
    pub fn features(&self) -> LanguageFeatures {
        LanguageFeatures::new(Arc::clone(&self.core))
    }

    /// Kill and respawn the server with a fresh retry budget. This is also
    /// how the client leaves [`ServerState::Error`] or [`ServerState::Stopped`].
    pub fn restart(&self) {
        if let Some(supervisor) = &self.supervisor {
            tracing::info!("Restarting LSP server");
            supervisor.start(&self.workspace_root);
        }
    }

    /// Gracefully shut the server down and disable auto-restart.
    pub async fn stop(&self) {
        let Some(supervisor) = &self.supervisor else {
            return;
        };
        tracing::info!("Stopping LSP server");
        self.core.shutdown().await;
        supervisor.stop();
        self.core.reset("stopped");
    }

    pub fn did_open(&self, uri: &str, text: &str) {
        self.core.did_open(uri, text);
    }

    pub fn did_change(&self, uri: &str, text: &str) {
        self.core.did_change(uri, text);
    }

    pub fn did_close(&self, uri: &str) {
        self.core.did_close(uri);
    }

    pub fn did_save(&self, uri: &str, text: Option<&str>) {
        self.core.did_save(uri, text);
    }

    /// Last version sent for `uri`; `None` while it is not open.
    #[must_use]
    pub fn document_version(&self, uri: &str) -> Option<i32> {
        self.core.document_version(uri)
    }

    /// Current diagnostics of one document.
    #[must_use]
    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        self.core.diagnostics(uri)
    }

    /// Immutable snapshot of all diagnostics.
    #[must_use]
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.core.diagnostics_snapshot()
    }

    /// Next pending event, without waiting.
    pub fn try_next_event(&mut self) -> Option<LspEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Wait for the next event. `None` once the manager has no live tasks
    /// left to produce one.
    pub async fn next_event(&mut self) -> Option<LspEvent> {
        self.event_rx.recv().await
    }

    /// Drain up to `budget` pending events. Non-blocking.
    pub fn poll_events(&mut self, budget: usize) -> Vec<LspEvent> {
        let mut events = Vec::new();
        while events.len() < budget {
            match self.event_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        events
    }
}

impl Drop for LspManager {
    fn drop(&mut self) {
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct Pump {
    core: Arc<SessionCore>,
    supervisor: ProcessSupervisor,
    events: mpsc::UnboundedSender<LspEvent>,
    workspace_root: PathBuf,
}

async fn pump(mut rx: mpsc::UnboundedReceiver<SupervisorEvent>, ctx: Pump) {
    let mut handshake: Option<JoinHandle<()>> = None;
    while let Some(event) = rx.recv().await {
        match event {
            SupervisorEvent::Message(frame) => {
                if let Some(notification) = ctx.core.rpc().handle_incoming(frame) {
                    ctx.core.handle_notification(notification);
                }
            }
            SupervisorEvent::State { state, detail } => {
                if let Some(task) = handshake.take() {
                    task.abort();
                }
                if state == ServerState::Running {
                    handshake = Some(tokio::spawn(run_handshake(
                        Arc::clone(&ctx.core),
                        ctx.supervisor.clone(),
                        ctx.events.clone(),
                        ctx.workspace_root.clone(),
                    )));
                } else {
                    ctx.core.reset(detail.as_deref().unwrap_or(state.label()));
                }
                let _ = ctx.events.send(LspEvent::StateChanged { state, detail });
            }
        }
    }
}

async fn run_handshake(
    core: Arc<SessionCore>,
    supervisor: ProcessSupervisor,
    events: mpsc::UnboundedSender<LspEvent>,
    workspace_root: PathBuf,
) {
    match core.initialize(&workspace_root).await {
        Ok(capabilities) => {
            supervisor.mark_healthy();
            let features = capabilities.enabled_features();
            tracing::info!(count = features.len(), "LSP handshake complete");
            let _ = events.send(LspEvent::Ready { features });
        }
        Err(e) => tracing::warn!("LSP handshake failed: {e:#}"),
    }
}
