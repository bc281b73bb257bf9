//! Process supervisor — owns the language server child process.
//!
//! Every spawn is a *generation*. Tasks belonging to a generation (stdin
//! writer, stdout reader, stderr drain, exit waiter) report failures tagged
//! with it; reports from a generation that is no longer current are
//! ignored. An unexpected failure schedules a restart with exponential
//! backoff until the retry budget is spent, then parks in
//! [`ServerState::Error`] until the next explicit [`start`].
//!
//! [`start`]: ProcessSupervisor::start

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::FrameReader;
use crate::config::{RestartPolicy, ServerConfig};
use crate::rpc::FrameSink;
use crate::types::ServerState;

/// What the supervisor reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SupervisorEvent {
    State {
        state: ServerState,
        detail: Option<String>,
    },
    Message(serde_json::Value),
}

/// Handles to the tasks of the live generation.
struct Attached {
    stdin: mpsc::UnboundedSender<Vec<u8>>,
    kill: oneshot::Sender<()>,
}

struct Inner {
    state: ServerState,
    generation: u64,
    /// Restarts scheduled since the last explicit start or healthy handshake.
    attempts: u32,
    root: Option<PathBuf>,
    attached: Option<Attached>,
    restart: Option<JoinHandle<()>>,
}

struct Shared {
    config: ServerConfig,
    policy: RestartPolicy,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record and publish a state change. Called with the lock held so
    /// events leave in transition order.
    fn transition(&self, inner: &mut Inner, state: ServerState, detail: Option<String>) {
        inner.state = state;
        match &detail {
            Some(detail) => tracing::info!(state = state.label(), "LSP server {detail}"),
            None => tracing::info!(state = state.label(), "LSP server state changed"),
        }
        let _ = self.events.send(SupervisorEvent::State { state, detail });
    }
}

/// Kill the attached child, if any, and drop its stdin channel.
fn detach(inner: &mut Inner) {
    if let Some(attached) = inner.attached.take() {
        let _ = attached.kill.send(());
    }
}

#[derive(Clone)]
pub(crate) struct ProcessSupervisor {
    shared: Arc<Shared>,
}

impl ProcessSupervisor {
    pub fn new(
        config: ServerConfig,
        policy: RestartPolicy,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                policy,
                inner: Mutex::new(Inner {
                    state: ServerState::Stopped,
                    generation: 0,
                    attempts: 0,
                    root: None,
                    attached: None,
                    restart: None,
                }),
                events,
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.shared.lock().state
    }

    /// Spawn the server rooted at `workspace_root`, replacing any previous
    /// instance and restoring the full retry budget.
    pub fn start(&self, workspace_root: &Path) {
        let generation = {
            let mut inner = self.shared.lock();
            if let Some(restart) = inner.restart.take() {
                restart.abort();
            }
            detach(&mut inner);
            inner.generation += 1;
            inner.attempts = 0;
            inner.root = Some(workspace_root.to_path_buf());
            self.shared
                .transition(&mut inner, ServerState::Starting, None);
            inner.generation
        };
        spawn_process(&self.shared, generation);
    }

    /// Terminate the server. The only call that disables auto-restart.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if let Some(restart) = inner.restart.take() {
            restart.abort();
        }
        detach(&mut inner);
        inner.generation += 1;
        if inner.state != ServerState::Stopped {
            self.shared
                .transition(&mut inner, ServerState::Stopped, None);
        }
    }

    /// Restore the retry budget once the server proved itself usable.
    pub fn mark_healthy(&self) {
        self.shared.lock().attempts = 0;
    }
}

impl FrameSink for ProcessSupervisor {
    /// Queue a frame for the stdin writer. Dropped without error when no
    /// process is attached or its stdin is gone.
    fn send(&self, frame: Vec<u8>) {
        let inner = self.shared.lock();
        let delivered = inner
            .attached
            .as_ref()
            .is_some_and(|attached| attached.stdin.send(frame).is_ok());
        if !delivered {
            tracing::trace!("Dropping LSP frame; server stdin is not writable");
        }
    }
}

fn launch(config: &ServerConfig, root: &Path) -> Result<Child> {
    let program = config.resolve()?;
    let mut cmd = Command::new(&program);
    cmd.args(&config.args)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn()
        .with_context(|| format!("spawning {}", program.display()))
}

fn spawn_process(shared: &Arc<Shared>, generation: u64) {
    let root = {
        let inner = shared.lock();
        if inner.generation != generation || inner.state == ServerState::Stopped {
            return;
        }
        inner.root.clone()
    };
    let Some(root) = root else {
        return;
    };

    match launch(&shared.config, &root) {
        Ok(child) => attach(shared, generation, child),
        Err(e) => {
            tracing::warn!("Failed to start LSP server: {e:#}");
            on_failure(shared, generation, format!("failed to start: {e:#}"));
        }
    }
}

fn attach(shared: &Arc<Shared>, generation: u64, mut child: Child) {
    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        on_failure(shared, generation, "spawned without stdio pipes".to_string());
        return;
    };

    let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = oneshot::channel();
    {
        let mut inner = shared.lock();
        if inner.generation != generation || inner.state == ServerState::Stopped {
            // Superseded while spawning; kill_on_drop reaps the child.
            return;
        }
        inner.attached = Some(Attached {
            stdin: stdin_tx,
            kill: kill_tx,
        });
        let pid = child.id().map(|pid| format!("started (pid {pid})"));
        shared.transition(&mut inner, ServerState::Running, pid);
    }

    tokio::spawn(write_stdin(Arc::clone(shared), generation, stdin, stdin_rx));
    tokio::spawn(read_stdout(Arc::clone(shared), generation, stdout));
    tokio::spawn(drain_stderr(stderr));
    tokio::spawn(wait_for_exit(Arc::clone(shared), generation, child, kill_rx));
}

/// Handle an unexpected exit or stream failure of `generation`.
fn on_failure(shared: &Arc<Shared>, generation: u64, detail: String) {
    let mut inner = shared.lock();
    if inner.generation != generation || inner.state == ServerState::Stopped {
        tracing::trace!(generation, "Ignoring failure report from stale LSP process");
        return;
    }
    inner.generation += 1;
    detach(&mut inner);

    let max_attempts = shared.policy.max_attempts;
    if inner.attempts >= max_attempts {
        shared.transition(
            &mut inner,
            ServerState::Error,
            Some(format!("{detail}; giving up after {max_attempts} restarts")),
        );
        return;
    }

    inner.attempts += 1;
    let attempt = inner.attempts;
    let delay = shared.policy.delay_for(attempt);
    shared.transition(
        &mut inner,
        ServerState::Starting,
        Some(format!(
            "{detail}; restarting in {}ms (attempt {attempt}/{max_attempts})",
            delay.as_millis()
        )),
    );

    let next_generation = inner.generation;
    let restart_shared = Arc::clone(shared);
    inner.restart = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        spawn_process(&restart_shared, next_generation);
    }));
}

async fn write_stdin(
    shared: Arc<Shared>,
    generation: u64,
    mut stdin: ChildStdin,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(frame) = frames.recv().await {
        let written = async {
            stdin.write_all(&frame).await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!("LSP stdin write failed: {e}");
            on_failure(&shared, generation, format!("stdin write failed: {e}"));
            break;
        }
    }
}

async fn read_stdout(shared: Arc<Shared>, generation: u64, stdout: ChildStdout) {
    let mut reader = FrameReader::new(stdout);
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                let _ = shared.events.send(SupervisorEvent::Message(frame));
            }
            // A live process without stdout is as good as dead. If it did
            // exit, the waiter's report is ignored as stale.
            Ok(None) => {
                on_failure(&shared, generation, "closed its stdout".to_string());
                break;
            }
            Err(e) => {
                tracing::warn!("LSP stdout read error: {e:#}");
                on_failure(&shared, generation, format!("stdout error: {e:#}"));
                break;
            }
        }
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "folio_lsp::server_stderr", "{line}");
    }
}

async fn wait_for_exit(
    shared: Arc<Shared>,
    generation: u64,
    mut child: Child,
    kill: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => {
            let detail = match status {
                Ok(status) => format!("exited unexpectedly ({status})"),
                Err(e) => format!("could not be waited on: {e}"),
            };
            on_failure(&shared, generation, detail);
        }
        _ = kill => {
            if let Err(e) = child.kill().await {
                tracing::debug!("Killing LSP server failed: {e}");
            }
        }
    }
}
