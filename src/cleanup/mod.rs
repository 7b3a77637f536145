//! Optional language-model cleanup of captured text
//!
//! Cleanup is fail-open: whatever goes wrong, the caller gets the original
//! text back and delivery continues.

mod llm;
mod ollama;

pub use llm::{extract_content, LlmCleaner};
pub use ollama::{parse_pull_progress, ModelReadiness, OllamaManager};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{CleanupConfig, CleanupProvider};

/// Rewrites captured text. Infallible by contract.
#[async_trait]
pub trait TextCleaner: Send + Sync {
    async fn clean(&self, raw: &str) -> String;
}

/// Availability check, cleanup request and timeout in one place
pub struct CleanupGateway {
    cleaner: LlmCleaner,
    ollama: Option<OllamaManager>,
    auto_pull: bool,
    pulling: Arc<AtomicBool>,
    timeout: Duration,
}

impl CleanupGateway {
    pub fn new(cleaner: LlmCleaner, timeout: Duration) -> Self {
        Self {
            cleaner,
            ollama: None,
            auto_pull: false,
            pulling: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Check that the model is present in the local Ollama install before each request
    pub fn with_ollama(mut self, ollama: OllamaManager) -> Self {
        self.ollama = Some(ollama);
        self
    }

    /// Start pulling a missing Ollama model in the background. Captures made
    /// while the pull runs are delivered uncleaned.
    pub fn pull_missing_model(mut self, auto_pull: bool) -> Self {
        self.auto_pull = auto_pull;
        self
    }

    pub fn from_config(cfg: &CleanupConfig) -> Self {
        let cleaner = LlmCleaner::new(&cfg.endpoint, &cfg.model, &cfg.api_key);
        let gateway = Self::new(cleaner, cfg.timeout()).pull_missing_model(cfg.auto_pull);

        info!(
            "Text cleanup enabled ({:?}, model {}, endpoint {})",
            cfg.provider, cfg.model, cfg.endpoint
        );

        match cfg.provider {
            CleanupProvider::Ollama => gateway.with_ollama(OllamaManager::new(&cfg.ollama_path)),
            CleanupProvider::OpenAi => gateway,
        }
    }

    async fn try_clean(&self, raw: &str) -> Option<String> {
        if let Some(ollama) = &self.ollama {
            let model = self.cleaner.model();

            if !ollama.is_installed().await {
                warn!("Ollama is not installed, skipping cleanup");
                return None;
            }

            if !ollama.has_model(model).await {
                if self.auto_pull {
                    self.start_background_pull(ollama, model);
                }
                warn!("Ollama model {} is not available, skipping cleanup", model);
                return None;
            }
        }

        self.cleaner.rewrite(raw).await
    }

    /// At most one pull runs at a time
    fn start_background_pull(&self, ollama: &OllamaManager, model: &str) {
        if self.pulling.swap(true, Ordering::SeqCst) {
            return;
        }

        let ollama = ollama.clone();
        let model = model.to_string();
        let pulling = self.pulling.clone();

        tokio::spawn(async move {
            if ollama.pull(&model, None).await {
                info!("Model {} is ready, cleanup resumes with the next capture", model);
            } else {
                warn!("Background pull of model {} failed", model);
            }
            pulling.store(false, Ordering::SeqCst);
        });
    }
}

#[async_trait]
impl TextCleaner for CleanupGateway {
    async fn clean(&self, raw: &str) -> String {
        if raw.trim().is_empty() {
            return raw.to_string();
        }

        match tokio::time::timeout(self.timeout, self.try_clean(raw)).await {
            Ok(Some(text)) => text,
            Ok(None) => raw.to_string(),
            Err(_) => {
                warn!(
                    "Cleanup did not finish within {:?}, delivering original text",
                    self.timeout
                );
                raw.to_string()
            }
        }
    }
}
