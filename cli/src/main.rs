//! Headless driver: open one LaTeX file against a workspace and print what
//! the language server reports about it.
//!
//! ```text
//! folio [--config <path>] <workspace-root> <file.tex>
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use folio_lsp::{
    Feature, LspEvent, LspManager, OutlineSymbol, ServerState, file_uri_to_path,
    path_to_file_uri,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::FolioConfig;

/// How long to wait for the server to become ready.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the first diagnostics of the opened file.
const DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Open one LaTeX file and print what the language server reports about it.
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(version)]
#[command(about = "Headless driver for the folio LaTeX language-intelligence client", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.folio/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Workspace root handed to the language server
    workspace_root: PathBuf,

    /// Document to open
    file: PathBuf,
}

/// Wait for the handshake. Fails if the server gives up first.
async fn wait_for_ready(manager: &mut LspManager) -> Result<Vec<Feature>> {
    let wait = async {
        while let Some(event) = manager.next_event().await {
            match event {
                LspEvent::Ready { features } => return Ok(features),
                LspEvent::StateChanged {
                    state: ServerState::Error,
                    detail,
                } => bail!(
                    "language server failed: {}",
                    detail.unwrap_or_else(|| "unknown error".to_string())
                ),
                LspEvent::StateChanged { state, detail } => {
                    tracing::debug!(state = state.label(), detail = ?detail, "LSP state");
                }
                _ => {}
            }
        }
        bail!("LSP event channel closed")
    };
    tokio::time::timeout(READY_TIMEOUT, wait)
        .await
        .context("timed out waiting for the language server")?
}

/// Wait until diagnostics for `uri` arrive, or the timeout passes.
async fn wait_for_diagnostics(manager: &mut LspManager, uri: &str) {
    let wait = async {
        while let Some(event) = manager.next_event().await {
            if let LspEvent::Diagnostics { uri: got, .. } = &event
                && got == uri
            {
                return;
            }
        }
    };
    if tokio::time::timeout(DIAGNOSTICS_TIMEOUT, wait).await.is_err() {
        tracing::debug!(uri, "No diagnostics received");
    }
}

fn print_outline(symbols: &[OutlineSymbol], depth: usize) {
    for symbol in symbols {
        println!(
            "{:indent$}{} [{}] line {}",
            "",
            symbol.name,
            symbol.kind_name(),
            symbol.range.start.line,
            indent = depth * 2
        );
        print_outline(&symbol.children, depth + 1);
    }
}

/// Short name of a document for output: relative to the workspace root
/// when possible, the raw uri otherwise.
fn display_label(uri: &str, root: &Path) -> String {
    let Some(path) = file_uri_to_path(uri) else {
        return uri.to_string();
    };
    path.strip_prefix(root)
        .unwrap_or(path.as_path())
        .display()
        .to_string()
}

async fn run(manager: &mut LspManager, root: &Path, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let uri = path_to_file_uri(file)?.to_string();
    let label = display_label(&uri, root);

    let features = wait_for_ready(manager).await?;
    let names: Vec<&str> = features.iter().map(|f| f.label()).collect();
    println!("features: {}", names.join(", "));

    manager.did_open(&uri, &text);
    wait_for_diagnostics(manager, &uri).await;

    let diagnostics = manager.diagnostics(&uri);
    println!("\ndiagnostics ({}):", diagnostics.len());
    for diagnostic in &diagnostics {
        println!("  {}", diagnostic.display_with_label(&label));
    }

    let lsp = manager.features();
    let outline = lsp.document_symbols(&uri).await;
    println!("\noutline:");
    print_outline(&outline, 1);

    let folds = lsp.folding_ranges(&uri).await;
    println!("\nfolding ranges ({}):", folds.len());
    for fold in &folds {
        let kind = fold.kind.as_deref().unwrap_or("region");
        println!("  {}-{} {kind}", fold.start_line, fold.end_line);
    }

    manager.did_close(&uri);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Cli::parse();
    let config = FolioConfig::load(args.config.as_deref())
        .context("loading configuration")?;

    let root = std::fs::canonicalize(&args.workspace_root)
        .with_context(|| format!("workspace root {}", args.workspace_root.display()))?;
    let file = std::fs::canonicalize(&args.file)
        .with_context(|| format!("document {}", args.file.display()))?;

    let mut manager = LspManager::start(config.lsp, &root);
    if manager.state() == ServerState::Stopped {
        eprintln!("LSP client is disabled in configuration");
        return Ok(());
    }

    let result = tokio::select! {
        result = run(&mut manager, &root, &file) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            Ok(())
        }
    };

    manager.stop().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(list: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("folio").chain(list.iter().copied()))
    }

    #[test]
    fn parse_positional() {
        let parsed = cli(&["thesis", "thesis/main.tex"]).unwrap();
        assert_eq!(parsed.workspace_root, PathBuf::from("thesis"));
        assert_eq!(parsed.file, PathBuf::from("thesis/main.tex"));
        assert!(parsed.config.is_none());
    }

    #[test]
    fn parse_config_flag_anywhere() {
        let parsed = cli(&["thesis", "--config", "folio.toml", "main.tex"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("folio.toml")));
        assert_eq!(parsed.file, PathBuf::from("main.tex"));
    }

    #[test]
    fn parse_rejects_wrong_arity() {
        assert!(cli(&["thesis"]).is_err());
        assert!(cli(&["a", "b", "c"]).is_err());
        assert!(cli(&["a", "b", "--config"]).is_err());
    }

    #[test]
    fn command_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[cfg(unix)]
    #[test]
    fn display_label_is_relative_to_root() {
        let root = Path::new("/thesis");
        assert_eq!(display_label("file:///thesis/chapters/intro.tex", root), "chapters/intro.tex");
        assert_eq!(display_label("file:///elsewhere/refs.bib", root), "/elsewhere/refs.bib");
        assert_eq!(display_label("untitled:1", root), "untitled:1");
    }
}
