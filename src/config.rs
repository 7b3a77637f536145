use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::ReleaseSource;

/// Environment variables override file values, e.g. `KIRO_VOICE__ENGINE__MODE=interpreter`
const ENV_PREFIX: &str = "KIRO_VOICE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub engine: EngineConfig,
    pub capture: CaptureConfig,
    pub cleanup: CleanupConfig,
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "kiro-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7890,
        }
    }
}

/// How the capture engine is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Provisioned, platform-specific executable
    #[default]
    Binary,
    /// Engine script run through a local interpreter (development mode)
    Interpreter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: ExecutionMode,
    /// Private directory for the downloaded engine. Defaults to the user data dir.
    pub storage_dir: Option<String>,
    pub python_path: String,
    pub script_path: String,
    pub release: ReleaseConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Binary,
            storage_dir: None,
            python_path: "python".to_string(),
            script_path: "python/voice_engine.py".to_string(),
            release: ReleaseConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => expand_path(dir),
            None => dirs_next::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("kiro-voice")
                .join("engine"),
        }
    }

    pub fn script_path(&self) -> PathBuf {
        expand_path(&self.script_path)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub base_url: String,
    pub owner: String,
    pub repo: String,
    pub version: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        let source = ReleaseSource::default();
        Self {
            base_url: source.base_url,
            owner: source.owner,
            repo: source.repo,
            version: source.version,
        }
    }
}

impl From<&ReleaseConfig> for ReleaseSource {
    fn from(cfg: &ReleaseConfig) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            owner: cfg.owner.clone(),
            repo: cfg.repo.clone(),
            version: cfg.version.clone(),
        }
    }
}

/// Silence detection parameters handed to the engine
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Seconds of silence before the engine stops on its own
    pub silence_duration: f64,
    /// RMS amplitude below which input counts as silence
    pub silence_threshold: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence_duration: 3.0,
            silence_threshold: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupProvider {
    /// Local Ollama server, checked for availability before each request
    #[default]
    Ollama,
    /// Any OpenAI-compatible chat completions endpoint
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub provider: CleanupProvider,
    pub model: String,
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Pull a missing Ollama model without asking, during setup and in the
    /// background when a capture finds it missing
    pub auto_pull: bool,
    pub ollama_path: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: CleanupProvider::Ollama,
            model: "mistral".to_string(),
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            api_key: String::new(),
            timeout_secs: 20,
            auto_pull: false,
            ollama_path: "ollama".to_string(),
        }
    }
}

impl CleanupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Publish delivered transcripts to NATS when set
    pub url: Option<String>,
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: None,
            subject_prefix: "voice.transcript".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (any format the `config` crate understands, extension
    /// optional) and apply environment overrides. A missing file is not an error.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();

        assert_eq!(cfg.engine.mode, ExecutionMode::Binary);
        assert_eq!(cfg.capture.silence_duration, 3.0);
        assert_eq!(cfg.capture.silence_threshold, 0.01);
        assert!(!cfg.cleanup.enabled);
        assert_eq!(cfg.cleanup.model, "mistral");
        assert!(cfg.nats.url.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiro.toml");
        std::fs::write(
            &path,
            r#"
            [engine]
            mode = "interpreter"
            python_path = "/usr/bin/python3"

            [capture]
            silence_duration = 1.5
            "#,
        )
        .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();

        assert_eq!(cfg.engine.mode, ExecutionMode::Interpreter);
        assert_eq!(cfg.engine.python_path, "/usr/bin/python3");
        assert_eq!(cfg.capture.silence_duration, 1.5);
        // Untouched sections keep their defaults
        assert_eq!(cfg.capture.silence_threshold, 0.01);
        assert_eq!(cfg.service.http.port, 7890);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = Config::load("/nonexistent/kiro-voice-config").unwrap();
        assert_eq!(cfg.engine.release.version, "v1.0.0");
    }

    #[test]
    fn test_storage_dir_expands_tilde() {
        let engine = EngineConfig {
            storage_dir: Some("~/kiro".to_string()),
            ..EngineConfig::default()
        };
        assert!(!engine.storage_dir().to_string_lossy().starts_with('~'));
    }
}
