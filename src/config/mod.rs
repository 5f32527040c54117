use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::diff::DiffMode;

pub const APP_DIR: &str = "prompt-optimizer";

/// Environment variables consulted for a host-supplied managed credential, in order.
pub const MANAGED_KEY_ENV: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schema_version: String,
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub gemini_base_url: String,
    pub managed_models: Vec<String>,
    pub diff_mode: DiffMode,
    pub save_responses: bool,
    pub loading_message_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: "2025-10-01".into(),
            data_dir: default_data_dir(),
            request_timeout_secs: 300,
            temperature: 0.5,
            max_tokens: 4096,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            managed_models: vec!["gemini-2.5-flash".into()],
            diff_mode: DiffMode::Words,
            save_responses: false,
            loading_message_interval_ms: 2500,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

impl AppConfig {
    /// Defaults, then the TOML file (explicit path or the per-user default), then env overrides.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PROMPT_OPTIMIZER_CONFIG").map(PathBuf::from))
            .or_else(default_config_path);

        let mut cfg = path
            .as_deref()
            .and_then(Self::from_file)
            .unwrap_or_default();
        cfg.apply_env();
        cfg
    }

    fn from_file(path: &Path) -> Option<Self> {
        let text = fs_err::read_to_string(path).ok()?;
        match toml::from_str::<AppConfig>(&text) {
            Ok(cfg) => {
                debug!(path = %path.display(), "loaded config file");
                Some(cfg)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed config file");
                None
            }
        }
    }

    fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os("PROMPT_OPTIMIZER_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("PROMPT_OPTIMIZER_TIMEOUT_SECS") {
            match secs.trim().parse() {
                Ok(v) => self.request_timeout_secs = v,
                Err(_) => warn!(value = %secs, "PROMPT_OPTIMIZER_TIMEOUT_SECS is not a number"),
            }
        }
    }
}

/// The managed-provider key injected by the hosting environment, if any.
pub fn env_managed_key() -> Option<String> {
    MANAGED_KEY_ENV
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: AppConfig = toml::from_str("request_timeout_secs = 30\ndiff_mode = \"tags\"\n").unwrap();
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.diff_mode, DiffMode::Tags);
        assert_eq!(cfg.max_tokens, 4096);
        assert_eq!(cfg.managed_models, vec!["gemini-2.5-flash".to_string()]);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs_err::write(&path, "request_timeout_secs = \"soon\"").unwrap();
        assert!(AppConfig::from_file(&path).is_none());
    }
}
