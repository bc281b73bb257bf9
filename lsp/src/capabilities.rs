//! Negotiated server capabilities and the capability → feature table.
//!
//! Capabilities are parsed once from the `initialize` result. The features
//! a host may register are derived by walking [`CAPABILITY_TABLE`]; adding a
//! feature means one table row plus one adapter in `features.rs`.

use serde_json::Value;

/// A language feature that can be offered to the editing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    Completion,
    Hover,
    Definition,
    DocumentSymbols,
    Rename,
    Formatting,
    FoldingRange,
    SemanticTokens,
}

impl Feature {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Hover => "hover",
            Self::Definition => "definition",
            Self::DocumentSymbols => "document-symbols",
            Self::Rename => "rename",
            Self::Formatting => "formatting",
            Self::FoldingRange => "folding-range",
            Self::SemanticTokens => "semantic-tokens",
        }
    }
}

/// Token vocabulary the server uses to encode semantic tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticTokensLegend {
    pub token_types: Vec<String>,
    pub token_modifiers: Vec<String>,
}

/// The subset of server capabilities this client consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub completion: bool,
    pub completion_trigger_characters: Vec<String>,
    pub hover: bool,
    pub definition: bool,
    pub document_symbol: bool,
    pub rename: bool,
    /// `renameProvider` was an object with `prepareProvider: true`.
    pub prepare_rename: bool,
    pub formatting: bool,
    pub folding_range: bool,
    /// Present when `semanticTokensProvider` offers full-document tokens.
    pub semantic_tokens: Option<SemanticTokensLegend>,
}

/// A provider is advertised when present and neither `false` nor `null`.
fn advertised(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null | Value::Bool(false)))
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

impl ServerCapabilities {
    /// Parse the `capabilities` object of an `initialize` result.
    #[must_use]
    pub fn from_initialize_result(result: &Value) -> Self {
        let caps = &result["capabilities"];

        let rename = caps.get("renameProvider");
        let semantic = caps.get("semanticTokensProvider");
        let semantic_tokens = if advertised(semantic) && advertised(semantic.and_then(|s| s.get("full"))) {
            let legend = semantic.and_then(|s| s.get("legend"));
            Some(SemanticTokensLegend {
                token_types: strings(legend.and_then(|l| l.get("tokenTypes"))),
                token_modifiers: strings(legend.and_then(|l| l.get("tokenModifiers"))),
            })
        } else {
            None
        };

        Self {
            completion: advertised(caps.get("completionProvider")),
            completion_trigger_characters: strings(
                caps.get("completionProvider")
                    .and_then(|c| c.get("triggerCharacters")),
            ),
            hover: advertised(caps.get("hoverProvider")),
            definition: advertised(caps.get("definitionProvider")),
            document_symbol: advertised(caps.get("documentSymbolProvider")),
            rename: advertised(rename),
            prepare_rename: rename
                .and_then(|r| r.get("prepareProvider"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            formatting: advertised(caps.get("documentFormattingProvider")),
            folding_range: advertised(caps.get("foldingRangeProvider")),
            semantic_tokens,
        }
    }

    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        CAPABILITY_TABLE
            .iter()
            .any(|(f, check)| *f == feature && check(self))
    }

    /// Features enabled by these capabilities, in table order.
    #[must_use]
    pub fn enabled_features(&self) -> Vec<Feature> {
        CAPABILITY_TABLE
            .iter()
            .filter(|(_, check)| check(self))
            .map(|(feature, _)| *feature)
            .collect()
    }
}

type CapabilityCheck = fn(&ServerCapabilities) -> bool;

/// Capability flag → feature, walked once per handshake.
pub const CAPABILITY_TABLE: &[(Feature, CapabilityCheck)] = &[
    (Feature::Completion, |c: &ServerCapabilities| c.completion),
    (Feature::Hover, |c: &ServerCapabilities| c.hover),
    (Feature::Definition, |c: &ServerCapabilities| c.definition),
    (Feature::DocumentSymbols, |c: &ServerCapabilities| c.document_symbol),
    (Feature::Rename, |c: &ServerCapabilities| c.rename),
    (Feature::Formatting, |c: &ServerCapabilities| c.formatting),
    (Feature::FoldingRange, |c: &ServerCapabilities| c.folding_range),
    (Feature::SemanticTokens, |c: &ServerCapabilities| c.semantic_tokens.is_some()),
];

/// Implemented by the editing surface to attach a handler per feature.
pub trait FeatureHost {
    fn register(&mut self, feature: Feature);
}

/// Register every enabled feature with `host`. Returns how many were.
pub fn register_features(capabilities: &ServerCapabilities, host: &mut dyn FeatureHost) -> usize {
    let features = capabilities.enabled_features();
    for feature in &features {
        tracing::debug!(feature = feature.label(), "Registering language feature");
        host.register(*feature);
    }
    features.len()
}
