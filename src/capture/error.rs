use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::engine::Platform;

/// ERROR_ACCESS_DISABLED_BY_POLICY
const WINDOWS_BLOCKED_BY_POLICY: i32 = 1260;

/// Why the engine process could not be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchFailureKind {
    /// Executable does not exist
    NotFound,
    /// Refused by the platform's execution policy (Gatekeeper, group policy)
    PlatformBlocked,
    /// Missing execute permission
    PermissionDenied,
    Other,
}

#[derive(Error, Debug)]
#[error("failed to launch {}: {source}", program.display())]
pub struct LaunchError {
    pub kind: LaunchFailureKind,
    pub program: PathBuf,
    #[source]
    pub source: io::Error,
}

impl LaunchError {
    pub fn classify(program: PathBuf, source: io::Error, platform: Platform) -> Self {
        let kind = match (source.kind(), platform) {
            (io::ErrorKind::NotFound, _) => LaunchFailureKind::NotFound,
            (_, Platform::Windows) if source.raw_os_error() == Some(WINDOWS_BLOCKED_BY_POLICY) => {
                LaunchFailureKind::PlatformBlocked
            }
            (io::ErrorKind::PermissionDenied, Platform::MacOS) => LaunchFailureKind::PlatformBlocked,
            (io::ErrorKind::PermissionDenied, _) => LaunchFailureKind::PermissionDenied,
            _ => LaunchFailureKind::Other,
        };

        Self {
            kind,
            program,
            source,
        }
    }

    /// What the user can do about it
    pub fn remediation(&self) -> &'static str {
        match self.kind {
            LaunchFailureKind::NotFound => {
                "The voice engine is missing. Provision it again or switch the engine mode to \"interpreter\"."
            }
            LaunchFailureKind::PlatformBlocked => {
                "The operating system blocked the voice engine. Open System Settings > Privacy & Security and choose \"Open Anyway\", or switch the engine mode to \"interpreter\"."
            }
            LaunchFailureKind::PermissionDenied => {
                "The voice engine is not executable. Provision it again to restore its permissions."
            }
            LaunchFailureKind::Other => {
                "Check the engine path and logs, or switch the engine mode to \"interpreter\"."
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("capture controller is not running")]
    ControllerStopped,
}
