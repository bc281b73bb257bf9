//! Diagnostics store — per-document problem markers from the language server.
//!
//! Each `publishDiagnostics` replaces the whole set for its uri; there is no
//! incremental merge.

use std::collections::HashMap;

use crate::types::{Diagnostic, DiagnosticsSnapshot};

#[derive(Debug, Default)]
pub(crate) struct DiagnosticsStore {
    data: HashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the diagnostics of `uri`. An empty list clears it.
    pub fn replace(&mut self, uri: String, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    pub fn for_uri(&self, uri: &str) -> Vec<Diagnostic> {
        self.data.get(uri).cloned().unwrap_or_default()
    }

    /// Drop the diagnostics of `uri`. Returns whether it had any.
    pub fn remove(&mut self, uri: &str) -> bool {
        self.data.remove(uri).is_some()
    }

    /// Drop everything, returning the uris that had diagnostics.
    pub fn clear(&mut self) -> Vec<String> {
        self.data.drain().map(|(uri, _)| uri).collect()
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(String, Vec<Diagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        // Documents with errors first, then by uri
        files.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiagnosticSeverity, EditorPosition, EditorRange};

    fn make_diag(uri: &str, severity: DiagnosticSeverity, msg: &str, line: u32) -> Diagnostic {
        let pos = EditorPosition::new(line, 1);
        Diagnostic::new(
            uri.to_string(),
            EditorRange::new(pos, pos),
            severity,
            msg.to_string(),
            "test".to_string(),
        )
    }

    #[test]
    fn test_empty_snapshot() {
        let store = DiagnosticsStore::new();
        let snap = store.snapshot();
        assert!(snap.is_empty());
        assert_eq!(snap.error_count(), 0);
    }

    #[test]
    fn test_replace_overwrites_previous() {
        let mut store = DiagnosticsStore::new();
        let uri = "file:///a.tex";
        store.replace(
            uri.to_string(),
            vec![
                make_diag(uri, DiagnosticSeverity::Error, "err1", 1),
                make_diag(uri, DiagnosticSeverity::Error, "err2", 2),
            ],
        );
        assert_eq!(store.snapshot().error_count(), 2);

        store.replace(
            uri.to_string(),
            vec![make_diag(uri, DiagnosticSeverity::Warning, "warn", 3)],
        );
        let items = store.for_uri(uri);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message(), "warn");
    }

    #[test]
    fn test_replace_leaves_other_uris_untouched() {
        let mut store = DiagnosticsStore::new();
        store.replace(
            "file:///b.tex".to_string(),
            vec![make_diag("file:///b.tex", DiagnosticSeverity::Error, "b", 1)],
        );
        store.replace(
            "file:///a.tex".to_string(),
            vec![make_diag("file:///a.tex", DiagnosticSeverity::Hint, "a", 1)],
        );
        assert_eq!(store.for_uri("file:///b.tex")[0].message(), "b");
    }

    #[test]
    fn test_empty_diagnostics_removes_uri() {
        let mut store = DiagnosticsStore::new();
        let uri = "file:///a.tex";
        store.replace(
            uri.to_string(),
            vec![make_diag(uri, DiagnosticSeverity::Error, "err", 1)],
        );
        store.replace(uri.to_string(), vec![]);
        assert!(store.snapshot().is_empty());
        assert!(store.for_uri(uri).is_empty());
    }

    #[test]
    fn test_errors_first_sorting() {
        let mut store = DiagnosticsStore::new();
        store.replace(
            "file:///a.tex".to_string(),
            vec![make_diag("file:///a.tex", DiagnosticSeverity::Warning, "warn", 1)],
        );
        store.replace(
            "file:///b.tex".to_string(),
            vec![make_diag("file:///b.tex", DiagnosticSeverity::Error, "err", 1)],
        );

        let snap = store.snapshot();
        assert_eq!(snap.files()[0].0, "file:///b.tex");
        assert_eq!(snap.files()[1].0, "file:///a.tex");
    }

    #[test]
    fn test_clear() {
        let mut store = DiagnosticsStore::new();
        store.replace(
            "file:///a.tex".to_string(),
            vec![make_diag("file:///a.tex", DiagnosticSeverity::Error, "err", 1)],
        );
        assert_eq!(store.clear(), vec!["file:///a.tex".to_string()]);
        assert!(store.snapshot().is_empty());
        assert!(store.clear().is_empty());
    }

    #[test]
    fn test_remove_single_uri() {
        let mut store = DiagnosticsStore::new();
        store.replace(
            "file:///a.tex".to_string(),
            vec![make_diag("file:///a.tex", DiagnosticSeverity::Error, "err", 1)],
        );
        assert!(!store.remove("file:///b.tex"));
        assert!(store.remove("file:///a.tex"));
        assert!(store.snapshot().is_empty());
    }
}
