//! Public types consumed by the editing surface.
//!
//! These types define the interface between `folio-lsp` and its host. The
//! host constructs an [`LspConfig`](crate::LspConfig), receives
//! [`LspEvent`]s, issues feature calls with one-based [`EditorPosition`]s and
//! reads [`DiagnosticsSnapshot`]s for problem markers.

use std::collections::BTreeMap;

use crate::capabilities::Feature;

/// Lifecycle state of the language server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Intentionally torn down. The only state that suppresses auto-restart.
    Stopped,
    Starting,
    Running,
    /// Retry budget exhausted; only an explicit start recovers.
    Error,
}

impl ServerState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

/// A cursor position in editor coordinates: one-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EditorPosition {
    pub line: u32,
    pub column: u32,
}

impl EditorPosition {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A half-open span in editor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EditorRange {
    pub start: EditorPosition,
    pub end: EditorPosition,
}

impl EditorRange {
    #[must_use]
    pub fn new(start: EditorPosition, end: EditorPosition) -> Self {
        Self { start, end }
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity.
    ///
    /// 1=Error, 2=Warning, 3=Info; anything else, including an absent
    /// severity, is a Hint.
    #[must_use]
    pub fn from_lsp(value: Option<u64>) -> Self {
        match value {
            Some(1) => Self::Error,
            Some(2) => Self::Warning,
            Some(3) => Self::Information,
            _ => Self::Hint,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A problem marker for one document.
///
/// Fields are private; external consumers read via accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    uri: String,
    range: EditorRange,
    severity: DiagnosticSeverity,
    message: String,
    /// Resolved to a concrete string at the boundary (`"unknown"` if absent).
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        uri: String,
        range: EditorRange,
        severity: DiagnosticSeverity,
        message: String,
        source: String,
    ) -> Self {
        Self {
            uri,
            range,
            severity,
            message,
            source,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// One-based range.
    #[must_use]
    pub fn range(&self) -> EditorRange {
        self.range
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source of the diagnostic (e.g. "texlab", "chktex").
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Format as `label:line:col: severity: [source] message`.
    #[must_use]
    pub fn display_with_label(&self, label: &str) -> String {
        format!(
            "{label}:{}:{}: {}: [{}] {}",
            self.range.start.line,
            self.range.start.column,
            self.severity.label(),
            self.source,
            self.message,
        )
    }
}

/// An event emitted by the LSP subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum LspEvent {
    /// The server process changed state. `detail` carries the reason for
    /// restarts and failures.
    StateChanged {
        state: ServerState,
        detail: Option<String>,
    },
    /// The handshake completed; these features are available. Documents
    /// open in the editor should be re-sent with `did_open`.
    Ready { features: Vec<Feature> },
    /// The diagnostics for `uri` were replaced.
    Diagnostics { uri: String, items: Vec<Diagnostic> },
    /// The server stopped answering; `rejected` pending requests failed.
    Unresponsive { rejected: usize },
}

/// Immutable snapshot of all diagnostics, suitable for UI rendering.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-document diagnostics, sorted with error-containing documents first.
    files: Vec<(String, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(String, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(String, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn info_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Information)
    }

    #[must_use]
    pub fn hint_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Hint)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    /// Format a compact status string like "E:3 W:5".
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}

/// A completion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    pub label: String,
    /// LSP `CompletionItemKind`, if the server sent one.
    pub kind: Option<u32>,
    pub detail: Option<String>,
    pub documentation: Option<String>,
    /// Text to insert; falls back to the label.
    pub insert_text: String,
    /// Whether `insert_text` uses snippet syntax (`$1`, `${2:arg}`).
    pub is_snippet: bool,
    /// Span the insertion replaces, when the server supplies a text edit.
    pub replace_range: Option<EditorRange>,
}

/// Hover content flattened to markdown/plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hover {
    pub contents: String,
    pub range: Option<EditorRange>,
}

/// A target location in some document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub uri: String,
    pub range: EditorRange,
}

/// One node of the document outline.
///
/// Same shape the regex fallback extractor produces, so the outline view
/// can consume either source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineSymbol {
    pub name: String,
    pub detail: Option<String>,
    /// LSP `SymbolKind` number.
    pub kind: u32,
    pub range: EditorRange,
    pub selection_range: EditorRange,
    pub children: Vec<OutlineSymbol>,
}

impl OutlineSymbol {
    /// Human-readable name of the LSP symbol kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            1 => "file",
            2 => "module",
            3 => "namespace",
            4 => "package",
            5 => "class",
            6 => "method",
            7 => "property",
            8 => "field",
            9 => "constructor",
            10 => "enum",
            11 => "interface",
            12 => "function",
            13 => "variable",
            14 => "constant",
            15 => "string",
            16 => "number",
            17 => "boolean",
            18 => "array",
            19 => "object",
            20 => "key",
            21 => "null",
            22 => "enum-member",
            23 => "struct",
            24 => "event",
            25 => "operator",
            26 => "type-parameter",
            _ => "symbol",
        }
    }
}

/// Result of a prepare-rename probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRename {
    pub range: Option<EditorRange>,
    pub placeholder: Option<String>,
}

/// A single text replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: EditorRange,
    pub new_text: String,
}

/// Edits grouped by document uri.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceEdit {
    pub changes: BTreeMap<String, Vec<TextEdit>>,
}

impl WorkspaceEdit {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.values().all(Vec::is_empty)
    }
}

/// Formatting preferences sent with a formatting request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormattingOptions {
    pub tab_size: u32,
    pub insert_spaces: bool,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            tab_size: 2,
            insert_spaces: true,
        }
    }
}

/// A foldable line span (one-based, inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldingRange {
    pub start_line: u32,
    pub end_line: u32,
    pub kind: Option<String>,
}

/// A classified token decoded against the server's legend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticToken {
    /// One-based line.
    pub line: u32,
    /// One-based start column.
    pub column: u32,
    pub length: u32,
    pub token_type: String,
    pub modifiers: Vec<String>,
}
