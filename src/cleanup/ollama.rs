use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Availability of the local cleanup model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelReadiness {
    Ready,
    /// The `ollama` executable is not available
    NotInstalled,
    /// Installed, model not pulled, and pulling was not requested
    Missing,
    PullFailed,
}

/// Drives the `ollama` CLI: presence check, model listing and pulls
#[derive(Debug, Clone)]
pub struct OllamaManager {
    program: PathBuf,
}

impl Default for OllamaManager {
    fn default() -> Self {
        Self::new("ollama")
    }
}

impl OllamaManager {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub async fn is_installed(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    pub async fn has_model(&self, model: &str) -> bool {
        let output = Command::new(&self.program)
            .arg("list")
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).contains(model)
            }
            Ok(output) => {
                debug!("ollama list exited with {}", output.status);
                false
            }
            Err(e) => {
                debug!("Failed to run ollama list: {}", e);
                false
            }
        }
    }

    pub async fn is_model_ready(&self, model: &str) -> bool {
        self.is_installed().await && self.has_model(model).await
    }

    /// Run `ollama pull`, publishing percentage progress when a sender is given
    pub async fn pull(&self, model: &str, progress: Option<&watch::Sender<u8>>) -> bool {
        info!("Pulling model {}", model);

        let mut child = match Command::new(&self.program)
            .arg("pull")
            .arg(model)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start ollama pull: {}", e);
                return false;
            }
        };

        if let Some(mut stderr) = child.stderr.take() {
            let mut chunk = [0u8; 1024];
            let mut last = None;

            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&chunk[..n]);
                        if let Some(pct) = parse_pull_progress(&text) {
                            if last != Some(pct) {
                                debug!("Pulling {}: {}%", model, pct);
                                if let Some(progress) = progress {
                                    progress.send_replace(pct);
                                }
                                last = Some(pct);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read ollama pull output: {}", e);
                        break;
                    }
                }
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => {
                info!("Model {} ready", model);
                true
            }
            Ok(status) => {
                warn!("ollama pull {} exited with {}", model, status);
                false
            }
            Err(e) => {
                warn!("Failed to wait for ollama pull: {}", e);
                false
            }
        }
    }

    /// Same shape as engine provisioning: present -> ready, missing -> fetch
    pub async fn ensure_model(
        &self,
        model: &str,
        auto_pull: bool,
        progress: Option<&watch::Sender<u8>>,
    ) -> ModelReadiness {
        if !self.is_installed().await {
            warn!("ollama is not installed; install it from https://ollama.com/download");
            return ModelReadiness::NotInstalled;
        }

        if self.has_model(model).await {
            return ModelReadiness::Ready;
        }

        if !auto_pull {
            info!("Model {} is not pulled", model);
            return ModelReadiness::Missing;
        }

        if self.pull(model, progress).await {
            ModelReadiness::Ready
        } else {
            ModelReadiness::PullFailed
        }
    }
}

/// Last percentage in a chunk of `ollama pull` output
pub fn parse_pull_progress(output: &str) -> Option<u8> {
    static PERCENT: OnceLock<Regex> = OnceLock::new();
    let re = PERCENT.get_or_init(|| Regex::new(r"(\d{1,3})%").expect("valid percent regex"));

    re.captures_iter(output)
        .filter_map(|caps| caps[1].parse::<u8>().ok())
        .filter(|pct| *pct <= 100)
        .last()
}
