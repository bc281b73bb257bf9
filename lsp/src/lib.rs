//! LaTeX language-intelligence client.
//!
//! Drives an external language server (texlab by default) over stdio and
//! exposes capability-gated language features and diagnostics to an
//! editing surface through [`LspManager`].

pub mod codec;
pub mod types;

mod capabilities;
mod config;
pub(crate) mod diagnostics;
mod features;
mod manager;
pub(crate) mod protocol;
mod rpc;
mod session;
mod supervisor;

pub use capabilities::{
    CAPABILITY_TABLE, Feature, FeatureHost, SemanticTokensLegend, ServerCapabilities,
    register_features,
};
pub use config::{LspConfig, ResolveError, RestartPolicy, ServerConfig};
pub use features::LanguageFeatures;
pub use manager::LspManager;
pub use protocol::{PathToUriError, file_uri_to_path, path_to_file_uri};
pub use rpc::{FrameSink, RpcClient, RpcError};
pub use types::{
    CompletionItem, Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, EditorPosition,
    EditorRange, FoldingRange, FormattingOptions, Hover, Location, LspEvent, OutlineSymbol,
    PrepareRename, SemanticToken, ServerState, TextEdit, WorkspaceEdit,
};
