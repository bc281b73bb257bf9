//! Feature providers — one adapter per language feature.
//!
//! Every adapter follows the same contract: when the session is not
//! initialized or the server did not advertise the feature it returns an
//! empty result without touching the wire; otherwise it issues exactly one
//! request. Request failures are logged and surface as empty results.
//! Positions in and out are one-based editor coordinates.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::capabilities::{Feature, FeatureHost, SemanticTokensLegend, ServerCapabilities, register_features};
use crate::protocol::{
    self, CompletionResponse, DefinitionResponse, DocumentSymbolResponse, LspCompletionItem,
    LspDocumentSymbol, LspFoldingRange, LspHover, LspLocation, LspSemanticTokens, LspTextDocumentEdit,
    LspTextEdit, LspWorkspaceEdit, PrepareRenameResponse,
};
use crate::session::SessionCore;
use crate::types::{
    CompletionItem, EditorPosition, FoldingRange, FormattingOptions, Hover, Location,
    OutlineSymbol, PrepareRename, SemanticToken, TextEdit, WorkspaceEdit,
};

/// Capability-gated language features. Cloning is cheap.
#[derive(Clone)]
pub struct LanguageFeatures {
    core: Arc<SessionCore>,
}

impl LanguageFeatures {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Features the current server generation offers; empty before the
    /// handshake.
    #[must_use]
    pub fn enabled(&self) -> Vec<Feature> {
        self.core
            .capabilities()
            .map(|caps| caps.enabled_features())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        self.core
            .capabilities()
            .is_some_and(|caps| caps.supports(feature))
    }

    /// Characters that should trigger completion as the user types.
    #[must_use]
    pub fn completion_trigger_characters(&self) -> Vec<String> {
        self.core
            .capabilities()
            .map(|caps| caps.completion_trigger_characters.clone())
            .unwrap_or_default()
    }

    /// Register every enabled feature with `host`.
    pub fn register(&self, host: &mut dyn FeatureHost) -> usize {
        self.core
            .capabilities()
            .map_or(0, |caps| register_features(&caps, host))
    }

    fn gate(&self, feature: Feature) -> Option<Arc<ServerCapabilities>> {
        let caps = self.core.capabilities()?;
        if caps.supports(feature) {
            Some(caps)
        } else {
            tracing::trace!(feature = feature.label(), "Feature not advertised by server");
            None
        }
    }

    /// Issue one request and decode its result. `null` results and any
    /// failure come back as `None`.
    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Option<T> {
        let result = self
            .core
            .rpc()
            .request(method, Some(params), self.core.request_timeout())
            .await;
        match result {
            Ok(Value::Null) => None,
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| tracing::debug!(method, "Unexpected LSP result shape: {e}"))
                .ok(),
            Err(e) => {
                tracing::debug!(method, "LSP request failed: {e}");
                None
            }
        }
    }

    pub async fn completion(&self, uri: &str, position: EditorPosition) -> Vec<CompletionItem> {
        if self.gate(Feature::Completion).is_none() {
            return Vec::new();
        }
        let response: Option<CompletionResponse> = self
            .call("textDocument/completion", protocol::position_params(uri, position))
            .await;
        let items = match response {
            Some(CompletionResponse::List { items } | CompletionResponse::Array(items)) => items,
            None => return Vec::new(),
        };
        items.into_iter().map(completion_item).collect()
    }

    pub async fn hover(&self, uri: &str, position: EditorPosition) -> Option<Hover> {
        self.gate(Feature::Hover)?;
        let hover: LspHover = self
            .call("textDocument/hover", protocol::position_params(uri, position))
            .await?;
        let contents = markup_text(&hover.contents);
        if contents.trim().is_empty() {
            return None;
        }
        Some(Hover {
            contents,
            range: hover.range.map(|r| r.to_editor()),
        })
    }

    pub async fn definition(&self, uri: &str, position: EditorPosition) -> Vec<Location> {
        if self.gate(Feature::Definition).is_none() {
            return Vec::new();
        }
        let response: Option<DefinitionResponse> = self
            .call("textDocument/definition", protocol::position_params(uri, position))
            .await;
        match response {
            Some(DefinitionResponse::Single(location)) => vec![location_of(location)],
            Some(DefinitionResponse::Locations(locations)) => {
                locations.into_iter().map(location_of).collect()
            }
            Some(DefinitionResponse::Links(links)) => links
                .into_iter()
                .map(|link| Location {
                    uri: link.target_uri,
                    range: link.target_selection_range.to_editor(),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Document outline. Flat `SymbolInformation` results come back as
    /// childless top-level nodes.
    pub async fn document_symbols(&self, uri: &str) -> Vec<OutlineSymbol> {
        if self.gate(Feature::DocumentSymbols).is_none() {
            return Vec::new();
        }
        let response: Option<DocumentSymbolResponse> = self
            .call("textDocument/documentSymbol", protocol::text_document_params(uri))
            .await;
        match response {
            Some(DocumentSymbolResponse::Nested(symbols)) => {
                symbols.into_iter().map(outline_symbol).collect()
            }
            Some(DocumentSymbolResponse::Flat(symbols)) => symbols
                .into_iter()
                .map(|s| {
                    let range = s.location.range.to_editor();
                    OutlineSymbol {
                        name: s.name,
                        detail: s.container_name,
                        kind: s.kind,
                        range,
                        selection_range: range,
                        children: Vec::new(),
                    }
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Probe whether a rename is valid at `position`. `None` when the server
    /// does not offer prepare-rename or rejects the position.
    pub async fn prepare_rename(&self, uri: &str, position: EditorPosition) -> Option<PrepareRename> {
        let caps = self.gate(Feature::Rename)?;
        if !caps.prepare_rename {
            return None;
        }
        let response: PrepareRenameResponse = self
            .call("textDocument/prepareRename", protocol::position_params(uri, position))
            .await?;
        match response {
            PrepareRenameResponse::WithPlaceholder { range, placeholder } => Some(PrepareRename {
                range: Some(range.to_editor()),
                placeholder: Some(placeholder),
            }),
            PrepareRenameResponse::Range(range) => Some(PrepareRename {
                range: Some(range.to_editor()),
                placeholder: None,
            }),
            PrepareRenameResponse::DefaultBehavior { default_behavior } => {
                default_behavior.then_some(PrepareRename {
                    range: None,
                    placeholder: None,
                })
            }
        }
    }

    pub async fn rename(&self, uri: &str, position: EditorPosition, new_name: &str) -> WorkspaceEdit {
        if self.gate(Feature::Rename).is_none() {
            return WorkspaceEdit::default();
        }
        let edit: Option<LspWorkspaceEdit> = self
            .call("textDocument/rename", protocol::rename_params(uri, position, new_name))
            .await;
        edit.map(workspace_edit).unwrap_or_default()
    }

    pub async fn formatting(&self, uri: &str, options: FormattingOptions) -> Vec<TextEdit> {
        if self.gate(Feature::Formatting).is_none() {
            return Vec::new();
        }
        let edits: Option<Vec<LspTextEdit>> = self
            .call(
                "textDocument/formatting",
                protocol::formatting_params(uri, options.tab_size, options.insert_spaces),
            )
            .await;
        edits
            .unwrap_or_default()
            .into_iter()
            .map(text_edit)
            .collect()
    }

    pub async fn folding_ranges(&self, uri: &str) -> Vec<FoldingRange> {
        if self.gate(Feature::FoldingRange).is_none() {
            return Vec::new();
        }
        let ranges: Option<Vec<LspFoldingRange>> = self
            .call("textDocument/foldingRange", protocol::text_document_params(uri))
            .await;
        ranges
            .unwrap_or_default()
            .into_iter()
            .map(|r| FoldingRange {
                start_line: r.start_line.saturating_add(1),
                end_line: r.end_line.saturating_add(1),
                kind: r.kind,
            })
            .collect()
    }

    pub async fn semantic_tokens(&self, uri: &str) -> Vec<SemanticToken> {
        let Some(caps) = self.gate(Feature::SemanticTokens) else {
            return Vec::new();
        };
        let Some(legend) = caps.semantic_tokens.as_ref() else {
            return Vec::new();
        };
        let tokens: Option<LspSemanticTokens> = self
            .call("textDocument/semanticTokens/full", protocol::text_document_params(uri))
            .await;
        tokens.map_or_else(Vec::new, |t| decode_semantic_tokens(&t.data, legend))
    }
}

fn location_of(location: LspLocation) -> Location {
    Location {
        uri: location.uri,
        range: location.range.to_editor(),
    }
}

fn text_edit(edit: LspTextEdit) -> TextEdit {
    TextEdit {
        range: edit.range.to_editor(),
        new_text: edit.new_text,
    }
}

fn completion_item(item: LspCompletionItem) -> CompletionItem {
    let (insert_text, replace_range) = match item.text_edit {
        Some(edit) => {
            let range = edit.range.or(edit.replace).map(|r| r.to_editor());
            (edit.new_text, range)
        }
        None => (
            item.insert_text.unwrap_or_else(|| item.label.clone()),
            None,
        ),
    };
    CompletionItem {
        documentation: item.documentation.as_ref().map(markup_text),
        is_snippet: item.insert_text_format == Some(2),
        label: item.label,
        kind: item.kind,
        detail: item.detail,
        insert_text,
        replace_range,
    }
}

fn outline_symbol(symbol: LspDocumentSymbol) -> OutlineSymbol {
    OutlineSymbol {
        name: symbol.name,
        detail: symbol.detail,
        kind: symbol.kind,
        range: symbol.range.to_editor(),
        selection_range: symbol.selection_range.to_editor(),
        children: symbol.children.into_iter().map(outline_symbol).collect(),
    }
}

fn workspace_edit(edit: LspWorkspaceEdit) -> WorkspaceEdit {
    let mut result = WorkspaceEdit::default();
    for (uri, edits) in edit.changes {
        result
            .changes
            .entry(uri)
            .or_default()
            .extend(edits.into_iter().map(text_edit));
    }
    for change in edit.document_changes {
        // Create/rename/delete file operations are not text edits.
        let Ok(doc_edit) = serde_json::from_value::<LspTextDocumentEdit>(change) else {
            continue;
        };
        result
            .changes
            .entry(doc_edit.text_document.uri)
            .or_default()
            .extend(doc_edit.edits.into_iter().map(text_edit));
    }
    result
}

/// Flatten `MarkupContent`, `MarkedString` or an array of those to text.
fn markup_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(markup_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        Value::Object(obj) => {
            let text = obj.get("value").and_then(Value::as_str).unwrap_or_default();
            match obj.get("language").and_then(Value::as_str) {
                Some(language) => format!("```{language}\n{text}\n```"),
                None => text.to_string(),
            }
        }
        _ => String::new(),
    }
}

/// Decode the relative `[Δline, Δstart, length, type, modifiers]` encoding.
///
/// Tokens whose type index falls outside the legend are skipped but still
/// advance the position.
fn decode_semantic_tokens(data: &[u32], legend: &SemanticTokensLegend) -> Vec<SemanticToken> {
    let mut tokens = Vec::with_capacity(data.len() / 5);
    let mut line = 0u32;
    let mut start = 0u32;
    for chunk in data.chunks_exact(5) {
        let &[delta_line, delta_start, length, token_type, modifier_bits] = chunk else {
            continue;
        };
        if delta_line > 0 {
            line = line.saturating_add(delta_line);
            start = delta_start;
        } else {
            start = start.saturating_add(delta_start);
        }
        let Some(token_type) = legend.token_types.get(token_type as usize) else {
            continue;
        };
        let modifiers = legend
            .token_modifiers
            .iter()
            .enumerate()
            .filter(|(bit, _)| *bit < 32 && modifier_bits & (1 << bit) != 0)
            .map(|(_, name)| name.clone())
            .collect();
        tokens.push(SemanticToken {
            line: line.saturating_add(1),
            column: start.saturating_add(1),
            length,
            token_type: token_type.clone(),
            modifiers,
        });
    }
    tokens
}
