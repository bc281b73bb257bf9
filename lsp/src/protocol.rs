//! Internal LSP message serde types for JSON-RPC communication.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{Diagnostic, DiagnosticSeverity, EditorPosition, EditorRange};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

/// Semantic token types this client can render.
pub(crate) const TOKEN_TYPES: &[&str] = &[
    "namespace",
    "type",
    "class",
    "enum",
    "interface",
    "struct",
    "typeParameter",
    "parameter",
    "variable",
    "property",
    "enumMember",
    "event",
    "function",
    "method",
    "macro",
    "keyword",
    "modifier",
    "comment",
    "string",
    "number",
    "regexp",
    "operator",
];

/// Semantic token modifiers this client can render.
pub(crate) const TOKEN_MODIFIERS: &[&str] = &[
    "declaration",
    "definition",
    "readonly",
    "static",
    "deprecated",
    "abstract",
    "async",
    "modification",
    "documentation",
    "defaultLibrary",
];

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Reply to a server-initiated request. `result` is always serialized,
/// including when it is `null`.
#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    pub result: serde_json::Value,
}

impl Response {
    pub fn null_result(id: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
}

/// A decoded inbound JSON-RPC message.
#[derive(Debug, PartialEq)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        outcome: Result<serde_json::Value, ResponseError>,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// Classify a frame by the presence of `id`, `method`, `result` and `error`.
///
/// Returns `None` for frames that fit none of the three shapes, or
/// responses whose id is not one this client could have issued.
pub(crate) fn parse_incoming(mut frame: serde_json::Value) -> Option<Incoming> {
    let obj = frame.as_object_mut()?;
    let id = obj.remove("id");
    let method = obj
        .get("method")
        .and_then(serde_json::Value::as_str)
        .map(String::from);
    let result = obj.remove("result");
    let error = obj.remove("error");

    match (id, method) {
        (Some(id), Some(method)) => Some(Incoming::ServerRequest { id, method }),
        (None, Some(method)) => Some(Incoming::Notification {
            method,
            params: obj.remove("params"),
        }),
        (Some(id), None) if result.is_some() || error.is_some() => {
            let id = id.as_u64()?;
            let outcome = match error {
                Some(error) => Err(serde_json::from_value(error).unwrap_or(ResponseError {
                    code: -32603,
                    message: "malformed error object".to_string(),
                })),
                None => Ok(result.unwrap_or(serde_json::Value::Null)),
            };
            Some(Incoming::Response { id, outcome })
        }
        _ => None,
    }
}

/// Zero-based protocol position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LspPosition {
    pub line: u32,
    pub character: u32,
}

impl LspPosition {
    pub fn from_editor(pos: EditorPosition) -> Self {
        Self {
            line: pos.line.saturating_sub(1),
            character: pos.column.saturating_sub(1),
        }
    }

    pub fn to_editor(self) -> EditorPosition {
        EditorPosition::new(self.line.saturating_add(1), self.character.saturating_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LspRange {
    pub start: LspPosition,
    pub end: LspPosition,
}

impl LspRange {
    pub fn to_editor(self) -> EditorRange {
        EditorRange::new(self.start.to_editor(), self.end.to_editor())
    }
}

pub(crate) fn initialize_params(root_uri: &str, root_path: &Path) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": "folio",
            "version": env!("CARGO_PKG_VERSION")
        },
        "rootUri": root_uri,
        "rootPath": root_path.to_string_lossy(),
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": true
                },
                "completion": {
                    "completionItem": {
                        "snippetSupport": true,
                        "documentationFormat": ["markdown", "plaintext"]
                    },
                    "contextSupport": false
                },
                "hover": {
                    "contentFormat": ["markdown", "plaintext"]
                },
                "definition": {
                    "linkSupport": true
                },
                "documentSymbol": {
                    "hierarchicalDocumentSymbolSupport": true
                },
                "formatting": {
                    "dynamicRegistration": false
                },
                "rename": {
                    "prepareSupport": true
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                },
                "foldingRange": {
                    "lineFoldingOnly": true
                },
                "semanticTokens": {
                    "requests": { "full": true, "range": false },
                    "tokenTypes": TOKEN_TYPES,
                    "tokenModifiers": TOKEN_MODIFIERS,
                    "formats": ["relative"]
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_save_params(uri: &str, text: Option<&str>) -> serde_json::Value {
    let mut params = text_document_params(uri);
    if let Some(text) = text {
        params["text"] = serde_json::Value::from(text);
    }
    params
}

pub(crate) fn text_document_params(uri: &str) -> serde_json::Value {
    serde_json::json!({ "textDocument": { "uri": uri } })
}

pub(crate) fn position_params(uri: &str, pos: EditorPosition) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": LspPosition::from_editor(pos)
    })
}

pub(crate) fn rename_params(uri: &str, pos: EditorPosition, new_name: &str) -> serde_json::Value {
    let mut params = position_params(uri, pos);
    params["newName"] = serde_json::Value::from(new_name);
    params
}

pub(crate) fn formatting_params(
    uri: &str,
    tab_size: u32,
    insert_spaces: bool,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "options": {
            "tabSize": tab_size,
            "insertSpaces": insert_spaces
        }
    })
}

/// The `textDocument.uri` a request or notification is about, if any.
pub(crate) fn document_uri(params: Option<&serde_json::Value>) -> Option<&str> {
    params?.get("textDocument")?.get("uri")?.as_str()
}

/// LSP language id for a document, inferred from its extension.
pub(crate) fn language_id_for(uri: &str) -> &'static str {
    let ext = uri
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("tex" | "sty" | "cls" | "ltx" | "dtx" | "ins") => "latex",
        Some("bib") => "bibtex",
        _ => "plaintext",
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: LspRange,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

impl LspDiagnostic {
    pub fn to_diagnostic(&self, uri: &str) -> Diagnostic {
        Diagnostic::new(
            uri.to_string(),
            self.range.to_editor(),
            DiagnosticSeverity::from_lsp(self.severity),
            self.message.clone(),
            self.source
                .clone()
                .unwrap_or_else(|| String::from("unknown")),
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogMessageParams {
    #[serde(rename = "type")]
    pub kind: u8,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CompletionResponse {
    List { items: Vec<LspCompletionItem> },
    Array(Vec<LspCompletionItem>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspCompletionItem {
    pub label: String,
    pub kind: Option<u32>,
    pub detail: Option<String>,
    pub documentation: Option<serde_json::Value>,
    pub insert_text: Option<String>,
    /// 2 = snippet.
    pub insert_text_format: Option<u8>,
    pub text_edit: Option<LspCompletionEdit>,
}

/// Either a plain `TextEdit` or an `InsertReplaceEdit`.
#[derive(Debug, Deserialize)]
pub(crate) struct LspCompletionEdit {
    #[serde(rename = "newText")]
    pub new_text: String,
    pub range: Option<LspRange>,
    pub replace: Option<LspRange>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspHover {
    pub contents: serde_json::Value,
    pub range: Option<LspRange>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspLocation {
    pub uri: String,
    pub range: LspRange,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspLocationLink {
    pub target_uri: String,
    pub target_selection_range: LspRange,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DefinitionResponse {
    Single(LspLocation),
    Locations(Vec<LspLocation>),
    Links(Vec<LspLocationLink>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DocumentSymbolResponse {
    Nested(Vec<LspDocumentSymbol>),
    Flat(Vec<LspSymbolInformation>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspDocumentSymbol {
    pub name: String,
    pub detail: Option<String>,
    pub kind: u32,
    pub range: LspRange,
    pub selection_range: LspRange,
    #[serde(default)]
    pub children: Vec<LspDocumentSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspSymbolInformation {
    pub name: String,
    pub kind: u32,
    pub location: LspLocation,
    pub container_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum PrepareRenameResponse {
    WithPlaceholder { range: LspRange, placeholder: String },
    Range(LspRange),
    #[serde(rename_all = "camelCase")]
    DefaultBehavior { default_behavior: bool },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspTextEdit {
    pub range: LspRange,
    pub new_text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspWorkspaceEdit {
    #[serde(default)]
    pub changes: HashMap<String, Vec<LspTextEdit>>,
    #[serde(default)]
    pub document_changes: Vec<serde_json::Value>,
}

/// The `TextDocumentEdit` variant of `documentChanges`; file operations
/// (create/rename/delete) fail to deserialize and are skipped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspTextDocumentEdit {
    pub text_document: LspDocumentId,
    pub edits: Vec<LspTextEdit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDocumentId {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspFoldingRange {
    pub start_line: u32,
    pub end_line: u32,
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspSemanticTokens {
    pub data: Vec<u32>,
}

/// Convert an absolute path to a `file://` URI.
pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

/// Convert a `file://` URI back to a path; `None` for other schemes.
#[must_use]
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_params_has_required_fields() {
        let params = initialize_params("file:///thesis", Path::new("/thesis"));
        assert!(params["processId"].is_number());
        assert_eq!(params["rootUri"], "file:///thesis");
        let text_document = &params["capabilities"]["textDocument"];
        assert_eq!(
            text_document["completion"]["completionItem"]["snippetSupport"],
            true
        );
        assert_eq!(
            text_document["documentSymbol"]["hierarchicalDocumentSymbolSupport"],
            true
        );
        assert_eq!(text_document["foldingRange"]["lineFoldingOnly"], true);
        assert_eq!(
            text_document["semanticTokens"]["tokenTypes"]
                .as_array()
                .unwrap()
                .len(),
            TOKEN_TYPES.len()
        );
    }

    #[test]
    fn test_did_open_params() {
        let params = did_open_params("file:///main.tex", "latex", 1, "\\begin{document}");
        assert_eq!(params["textDocument"]["uri"], "file:///main.tex");
        assert_eq!(params["textDocument"]["languageId"], "latex");
        assert_eq!(params["textDocument"]["version"], 1);
    }

    #[test]
    fn test_did_change_params_sends_whole_document() {
        let params = did_change_params("file:///main.tex", 2, "full text");
        assert_eq!(params["textDocument"]["version"], 2);
        assert_eq!(params["contentChanges"].as_array().unwrap().len(), 1);
        assert_eq!(params["contentChanges"][0]["text"], "full text");
        assert!(params["contentChanges"][0].get("range").is_none());
    }

    #[test]
    fn test_did_save_params_is_versionless() {
        let params = did_save_params("file:///main.tex", Some("body"));
        assert!(params["textDocument"].get("version").is_none());
        assert_eq!(params["text"], "body");
        assert!(did_save_params("file:///main.tex", None).get("text").is_none());
    }

    #[test]
    fn test_position_params_are_zero_based() {
        let params = position_params("file:///a.tex", EditorPosition::new(3, 7));
        assert_eq!(params["position"]["line"], 2);
        assert_eq!(params["position"]["character"], 6);
    }

    #[test]
    fn test_position_conversion_inverts() {
        let editor = EditorPosition::new(10, 4);
        assert_eq!(LspPosition::from_editor(editor).to_editor(), editor);
        // Zero is not a valid editor coordinate; it clamps to the origin.
        let origin = LspPosition::from_editor(EditorPosition::new(0, 0));
        assert_eq!(origin, LspPosition { line: 0, character: 0 });
    }

    #[test]
    fn test_document_uri_extraction() {
        let params = serde_json::json!({"textDocument": {"uri": "file:///a.tex"}});
        assert_eq!(document_uri(Some(&params)), Some("file:///a.tex"));
        assert_eq!(document_uri(Some(&serde_json::json!({}))), None);
        assert_eq!(document_uri(None), None);
    }

    #[test]
    fn test_language_id_for() {
        assert_eq!(language_id_for("file:///thesis/main.tex"), "latex");
        assert_eq!(language_id_for("file:///thesis/style.STY"), "latex");
        assert_eq!(language_id_for("file:///thesis/refs.bib"), "bibtex");
        assert_eq!(language_id_for("file:///thesis/notes.txt"), "plaintext");
        assert_eq!(language_id_for("file:///thesis.d/Makefile"), "plaintext");
    }

    #[test]
    fn test_parse_incoming_response() {
        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 3, "result": {"ok": true}});
        assert_eq!(
            parse_incoming(frame),
            Some(Incoming::Response {
                id: 3,
                outcome: Ok(serde_json::json!({"ok": true}))
            })
        );
    }

    #[test]
    fn test_parse_incoming_null_result_is_response() {
        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 4, "result": null});
        assert_eq!(
            parse_incoming(frame),
            Some(Incoming::Response {
                id: 4,
                outcome: Ok(serde_json::Value::Null)
            })
        );
    }

    #[test]
    fn test_parse_incoming_error_response() {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 5,
            "error": {"code": -32601, "message": "method not found"}
        });
        match parse_incoming(frame) {
            Some(Incoming::Response { id: 5, outcome: Err(e) }) => {
                assert_eq!(e.code, -32601);
                assert_eq!(e.message, "method not found");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_incoming_server_request() {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "abc",
            "method": "workspace/configuration",
            "params": {}
        });
        assert_eq!(
            parse_incoming(frame),
            Some(Incoming::ServerRequest {
                id: serde_json::json!("abc"),
                method: "workspace/configuration".to_string()
            })
        );
    }

    #[test]
    fn test_parse_incoming_notification() {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "window/logMessage",
            "params": {"type": 3, "message": "hi"}
        });
        match parse_incoming(frame) {
            Some(Incoming::Notification { method, params }) => {
                assert_eq!(method, "window/logMessage");
                assert_eq!(params.unwrap()["message"], "hi");
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_incoming_rejects_shapeless_frames() {
        assert!(parse_incoming(serde_json::json!({"jsonrpc": "2.0", "id": 1})).is_none());
        assert!(parse_incoming(serde_json::json!([1, 2])).is_none());
        assert!(parse_incoming(serde_json::json!({"id": "x", "result": 1})).is_none());
    }

    #[test]
    fn test_request_serialization_without_params() {
        let req = Request::new(1, "shutdown", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "shutdown");
        assert!(
            json.get("params").is_none(),
            "params must be omitted, not null"
        );
    }

    #[test]
    fn test_notification_serialization() {
        let notif = Notification::new("initialized", Some(serde_json::json!({})));
        let json = serde_json::to_value(&notif).unwrap();
        assert_eq!(json["method"], "initialized");
        assert!(json.get("id").is_none());
        assert!(json.get("params").is_some());
    }

    #[test]
    fn test_null_result_response_keeps_result_field() {
        let json = serde_json::to_value(Response::null_result(serde_json::json!(9))).unwrap();
        assert_eq!(json["id"], 9);
        assert!(json.get("result").is_some());
        assert!(json["result"].is_null());
    }

    #[test]
    fn test_document_symbol_response_shapes() {
        let nested = serde_json::json!([{
            "name": "Introduction",
            "kind": 2,
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 9, "character": 0}},
            "selectionRange": {"start": {"line": 0, "character": 9}, "end": {"line": 0, "character": 21}},
            "children": []
        }]);
        assert!(matches!(
            serde_json::from_value::<DocumentSymbolResponse>(nested).unwrap(),
            DocumentSymbolResponse::Nested(_)
        ));

        let flat = serde_json::json!([{
            "name": "eq:euler",
            "kind": 14,
            "location": {
                "uri": "file:///a.tex",
                "range": {"start": {"line": 3, "character": 0}, "end": {"line": 3, "character": 5}}
            }
        }]);
        assert!(matches!(
            serde_json::from_value::<DocumentSymbolResponse>(flat).unwrap(),
            DocumentSymbolResponse::Flat(_)
        ));
    }

    #[test]
    fn test_lsp_diagnostic_conversion_is_one_based() {
        let params: PublishDiagnosticsParams = serde_json::from_value(serde_json::json!({
            "uri": "file:///a.tex",
            "diagnostics": [{
                "range": {"start": {"line": 10, "character": 5}, "end": {"line": 10, "character": 9}},
                "severity": 1,
                "source": "chktex",
                "message": "Undefined control sequence"
            }, {
                "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}},
                "message": "no severity"
            }]
        }))
        .unwrap();

        let first = params.diagnostics[0].to_diagnostic(&params.uri);
        assert_eq!(first.severity(), DiagnosticSeverity::Error);
        assert_eq!(first.range().start, EditorPosition::new(11, 6));
        assert_eq!(first.range().end, EditorPosition::new(11, 10));
        assert_eq!(first.source(), "chktex");

        let second = params.diagnostics[1].to_diagnostic(&params.uri);
        assert_eq!(second.severity(), DiagnosticSeverity::Hint);
        assert_eq!(second.source(), "unknown");
    }

    #[test]
    fn test_path_to_file_uri_and_back() {
        #[cfg(windows)]
        let path = PathBuf::from(r"C:\Users\test\thesis\main.tex");
        #[cfg(not(windows))]
        let path = PathBuf::from("/home/test/thesis/main.tex");

        let uri = path_to_file_uri(&path).expect("should create URI");
        let roundtrip = file_uri_to_path(uri.as_str()).expect("should parse back to path");
        assert_eq!(roundtrip, path);
    }

    #[test]
    fn test_file_uri_to_path_non_file_scheme() {
        assert!(file_uri_to_path("https://example.com/a.tex").is_none());
        assert!(file_uri_to_path("not-a-uri").is_none());
    }
}
