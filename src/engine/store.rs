use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::platform::Platform;
use super::MIN_ENGINE_SIZE;

/// State of the engine file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetStatus {
    /// Nothing at the target path
    Missing,
    /// Present but below the minimum size (failed or partial prior download)
    Corrupt { size: u64 },
    /// Present and large enough to be a real engine build
    Valid { size: u64 },
}

impl AssetStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, AssetStatus::Valid { .. })
    }
}

/// Private storage directory holding at most one engine file per platform
#[derive(Debug, Clone)]
pub struct BinaryStore {
    root: PathBuf,
}

impl BinaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expected engine location for a platform
    pub fn resolve_path(&self, platform: Platform) -> PathBuf {
        self.root.join(platform.engine_filename())
    }

    /// Classify whatever sits at `path`
    pub async fn validate(&self, path: &Path) -> io::Result<AssetStatus> {
        match fs::metadata(path).await {
            Ok(meta) => {
                let size = meta.len();
                if size < MIN_ENGINE_SIZE {
                    Ok(AssetStatus::Corrupt { size })
                } else {
                    Ok(AssetStatus::Valid { size })
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AssetStatus::Missing),
            Err(e) => Err(e),
        }
    }

    /// Create the storage directory if needed
    pub async fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Delete a file, treating "already gone" as success
    pub async fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Make the engine runnable for the current user.
    ///
    /// Best-effort: every failure is logged and swallowed. A file that could
    /// not be unblocked still runs, at worst behind an OS trust prompt.
    pub async fn unblock(&self, path: &Path, platform: Platform) {
        if let Err(e) = set_executable(path).await {
            warn!("Failed to set execute permission on {}: {}", path.display(), e);
        }

        if platform.enforces_quarantine() {
            remove_quarantine(path).await;
        }
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

async fn remove_quarantine(path: &Path) {
    let result = Command::new("xattr")
        .arg("-d")
        .arg("com.apple.quarantine")
        .arg(path)
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            info!("Removed quarantine attribute from {}", path.display());
        }
        // xattr exits non-zero when the attribute was never set
        Ok(output) => debug!(
            "xattr left {} unchanged: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => warn!("Failed to run xattr on {}: {}", path.display(), e),
    }
}
