use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capture::LaunchSpec;
use crate::config::{CaptureConfig, EngineConfig, ExecutionMode};
use crate::engine::{Platform, ProvisionError, ProvisionOutcome, Provisioner, Unavailable};

/// What to run for the next capture session
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchPlan {
    Ready(LaunchSpec),
    /// Binary mode and the engine could not be provisioned
    Unavailable(Unavailable),
}

/// Turns the configured execution mode into a launch spec, provisioning the
/// engine first when running the packaged binary
pub struct Launcher {
    mode: ExecutionMode,
    capture: CaptureConfig,
    python_path: String,
    script_path: PathBuf,
    platform: Platform,
    provisioner: Arc<Provisioner>,
}

impl Launcher {
    pub fn new(engine: &EngineConfig, capture: CaptureConfig, provisioner: Arc<Provisioner>) -> Self {
        Self {
            mode: engine.mode,
            capture,
            python_path: engine.python_path.clone(),
            script_path: engine.script_path(),
            platform: Platform::current(),
            provisioner,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub async fn prepare(&self) -> Result<LaunchPlan, ProvisionError> {
        match self.mode {
            ExecutionMode::Interpreter => {
                debug!(
                    "Interpreter mode: {} {}",
                    self.python_path,
                    self.script_path.display()
                );
                Ok(LaunchPlan::Ready(LaunchSpec::interpreter(
                    &self.python_path,
                    self.script_path.clone(),
                    &self.capture,
                )))
            }
            ExecutionMode::Binary => match self.provisioner.ensure(self.platform).await? {
                ProvisionOutcome::Ready(path) => {
                    Ok(LaunchPlan::Ready(LaunchSpec::binary(path, &self.capture)))
                }
                ProvisionOutcome::Unavailable(unavailable) => {
                    warn!("{}", unavailable.user_message());
                    Ok(LaunchPlan::Unavailable(unavailable))
                }
            },
        }
    }
}
