//! `~/.folio/config.toml` loading.

use std::path::{Path, PathBuf};

use folio_lsp::LspConfig;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub lsp: LspConfig,
}

impl FolioConfig {
    /// Load from `path`, or the default location when `None`.
    ///
    /// A missing file is not an error: every setting has a default.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(config_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".folio").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = write_config("");
        let config = FolioConfig::load(Some(file.path())).unwrap();
        assert!(config.lsp.enabled);
        assert_eq!(config.lsp.server.command, "texlab");
        assert_eq!(config.lsp.restart.max_attempts, 3);
        assert_eq!(config.lsp.request_timeout_ms, 5_000);
    }

    #[test]
    fn full_lsp_table() {
        let file = write_config(
            r#"
[lsp]
enabled = true
request_timeout_ms = 2500
initialize_timeout_ms = 20000
health_check_interval_secs = 10

[lsp.server]
command = "texlab"
path = "/opt/texlab/bin/texlab"
bundled_path = "resources/texlab"
args = ["-vvvv"]

[lsp.restart]
max_attempts = 5
base_delay_ms = 250
"#,
        );
        let config = FolioConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.lsp.request_timeout_ms, 2_500);
        assert_eq!(config.lsp.health_check_interval_secs, 10);
        assert_eq!(
            config.lsp.server.path.as_deref(),
            Some(Path::new("/opt/texlab/bin/texlab"))
        );
        assert_eq!(config.lsp.server.args, vec!["-vvvv"]);
        assert_eq!(config.lsp.restart.max_attempts, 5);
        assert_eq!(config.lsp.restart.base_delay_ms, 250);
    }

    #[test]
    fn disabled_client() {
        let file = write_config("[lsp]\nenabled = false\n");
        let config = FolioConfig::load(Some(file.path())).unwrap();
        assert!(!config.lsp.enabled);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FolioConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(config.lsp.enabled);
    }

    #[test]
    fn parse_error_carries_path() {
        let file = write_config("[lsp\nenabled = ");
        let err = FolioConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), file.path());
    }

    #[test]
    fn config_path_under_home() {
        if let Some(path) = config_path() {
            assert!(path.ends_with(".folio/config.toml"));
        }
    }
}
