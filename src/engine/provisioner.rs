use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::platform::Platform;
use super::store::{AssetStatus, BinaryStore};
use super::{MAX_REDIRECTS, MIN_ENGINE_SIZE};

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Where engine builds are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSource {
    /// Scheme and host, e.g. `https://github.com`
    pub base_url: String,
    pub owner: String,
    pub repo: String,
    pub version: String,
}

impl Default for ReleaseSource {
    fn default() -> Self {
        Self {
            base_url: "https://github.com".to_string(),
            owner: "abhayshekhawat1428".to_string(),
            repo: "kiro-voice-pro".to_string(),
            version: "v1.0.0".to_string(),
        }
    }
}

impl ReleaseSource {
    /// Download URL of the engine build for `platform`
    pub fn asset_url(&self, platform: Platform) -> String {
        format!(
            "{}/{}/{}/releases/download/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.owner,
            self.repo,
            self.version,
            platform.engine_filename()
        )
    }
}

/// One fetch of the engine, carried across redirect hops
#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub url: Url,
    pub redirects: usize,
}

impl DownloadAttempt {
    pub fn new(url: Url) -> Self {
        Self { url, redirects: 0 }
    }

    /// Move to the redirect target. `location` may be relative to the
    /// current URL. Fails once more than `MAX_REDIRECTS` hops were taken.
    pub fn follow(&mut self, location: &str) -> Result<(), Unavailable> {
        self.redirects += 1;
        if self.redirects > MAX_REDIRECTS {
            return Err(Unavailable::new(
                UnavailableReason::TooManyRedirects,
                format!("gave up after {} redirects", MAX_REDIRECTS),
            ));
        }

        self.url = self.url.join(location).map_err(|e| {
            Unavailable::new(
                UnavailableReason::InvalidRedirect,
                format!("bad redirect target {location:?}: {e}"),
            )
        })?;

        Ok(())
    }
}

/// Why the engine could not be provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Connection or request failure before any status was received
    Transport,
    /// Final response was neither a redirect nor 200
    HttpStatus(u16),
    TooManyRedirects,
    InvalidRedirect,
    /// Body stream or file write failed mid-transfer
    Transfer,
    /// Fewer bytes arrived than the server announced
    Incomplete,
    /// Finished file is below the minimum engine size
    TooSmall,
}

/// Expected provisioning failure, reported as a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unavailable {
    pub reason: UnavailableReason,
    pub detail: String,
}

impl Unavailable {
    pub fn new(reason: UnavailableReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        format!(
            "Voice engine not available ({}). Switch the engine mode to \"interpreter\" to run the engine script locally.",
            self.detail
        )
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.reason, self.detail)
    }
}

/// Result of `Provisioner::ensure`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A valid, unblocked engine sits at this path
    Ready(PathBuf),
    Unavailable(Unavailable),
}

/// Unexpected local failures. Network trouble is never reported here.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to inspect engine at {path}: {source}")]
    Inspect { path: PathBuf, source: io::Error },

    #[error("failed to create engine storage at {path}: {source}")]
    Storage { path: PathBuf, source: io::Error },

    #[error("failed to remove corrupt engine at {path}: {source}")]
    RemoveCorrupt { path: PathBuf, source: io::Error },

    #[error("failed to move downloaded engine into {path}: {source}")]
    Finalize { path: PathBuf, source: io::Error },
}

/// Progress of the current (or last) engine download
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadProgress {
    pub url: Option<String>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub done: bool,
    pub error: Option<String>,
}

/// Makes sure a usable engine exists before a capture session starts
pub struct Provisioner {
    store: BinaryStore,
    release: ReleaseSource,
    client: reqwest::Client,
    progress: watch::Sender<DownloadProgress>,
    // Serializes ensure() so two callers never write the same temp file
    ensure_lock: Mutex<()>,
}

impl Provisioner {
    pub fn new(store: BinaryStore, release: ReleaseSource) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        let (progress, _) = watch::channel(DownloadProgress::default());

        Ok(Self {
            store,
            release,
            client,
            progress,
            ensure_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &BinaryStore {
        &self.store
    }

    pub fn release(&self) -> &ReleaseSource {
        &self.release
    }

    /// Watch download progress
    pub fn progress(&self) -> watch::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }

    /// Current state of the engine file, without fetching anything
    pub async fn status(&self, platform: Platform) -> Result<AssetStatus, ProvisionError> {
        let path = self.store.resolve_path(platform);
        self.store
            .validate(&path)
            .await
            .map_err(|source| ProvisionError::Inspect { path, source })
    }

    /// Ensure a valid engine for `platform` is present, downloading it if
    /// needed. One attempt per call, no retries.
    pub async fn ensure(&self, platform: Platform) -> Result<ProvisionOutcome, ProvisionError> {
        let _guard = self.ensure_lock.lock().await;
        let path = self.store.resolve_path(platform);

        match self.status(platform).await? {
            AssetStatus::Valid { size } => {
                debug!("Engine present at {} ({} bytes)", path.display(), size);
                self.store.unblock(&path, platform).await;
                return Ok(ProvisionOutcome::Ready(path));
            }
            AssetStatus::Corrupt { size } => {
                warn!(
                    "Engine at {} is only {} bytes, deleting before download",
                    path.display(),
                    size
                );
                self.store
                    .remove(&path)
                    .await
                    .map_err(|source| ProvisionError::RemoveCorrupt {
                        path: path.clone(),
                        source,
                    })?;
            }
            AssetStatus::Missing => {
                info!("Engine not found at {}", path.display());
            }
        }

        self.store
            .prepare()
            .await
            .map_err(|source| ProvisionError::Storage {
                path: self.store.root().to_path_buf(),
                source,
            })?;

        let url = self.release.asset_url(platform);
        let tmp = partial_path(&path, &self.release.version);
        remove_stale_partials(&path, &tmp).await;

        match self.download(&url, &tmp).await {
            Ok(bytes) => {
                // Permissions are fixed before the file becomes visible at its final path
                self.store.unblock(&tmp, platform).await;
                fs::rename(&tmp, &path)
                    .await
                    .map_err(|source| ProvisionError::Finalize {
                        path: path.clone(),
                        source,
                    })?;

                info!("Engine downloaded to {} ({} bytes)", path.display(), bytes);
                self.progress.send_modify(|p| p.done = true);
                Ok(ProvisionOutcome::Ready(path))
            }
            Err(unavailable) => {
                error!("Engine download from {} failed: {}", url, unavailable);
                self.progress.send_modify(|p| {
                    p.done = true;
                    p.error = Some(unavailable.detail.clone());
                });
                Ok(ProvisionOutcome::Unavailable(unavailable))
            }
        }
    }

    /// Fetch `url` into `tmp`, following redirects with an explicit bounded
    /// loop. Returns the final file size.
    async fn download(&self, url: &str, tmp: &Path) -> Result<u64, Unavailable> {
        let start = Url::parse(url).map_err(|e| {
            Unavailable::new(UnavailableReason::Transport, format!("{url}: {e}"))
        })?;
        let mut attempt = DownloadAttempt::new(start);

        self.progress.send_replace(DownloadProgress {
            url: Some(url.to_string()),
            ..DownloadProgress::default()
        });

        loop {
            let resume_from = partial_len(tmp).await;

            let mut request = self.client.get(attempt.url.clone());
            if resume_from > 0 {
                request = request.header(RANGE, format!("bytes={}-", resume_from));
            }

            info!(
                "Requesting engine from {} (redirect {}/{})",
                attempt.url, attempt.redirects, MAX_REDIRECTS
            );

            let response = request.send().await.map_err(|e| {
                Unavailable::new(
                    UnavailableReason::Transport,
                    format!("{}: {}", attempt.url, e),
                )
            })?;

            let status = response.status();

            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                if let Some(location) = location {
                    debug!("{} redirected to {}", attempt.url, location);
                    attempt.follow(&location)?;
                    continue;
                }
            }

            if status == StatusCode::RANGE_NOT_SATISFIABLE && resume_from > 0 {
                warn!("Stale partial download at {}, starting over", tmp.display());
                fs::remove_file(tmp).await.map_err(|e| {
                    Unavailable::new(UnavailableReason::Transfer, format!("{}: {}", tmp.display(), e))
                })?;
                continue;
            }

            if status == StatusCode::PARTIAL_CONTENT
                && resume_from > 0
                && content_range_start(response.headers()) != Some(resume_from)
            {
                warn!(
                    "Server resumed {} at the wrong offset (expected {}), starting over",
                    tmp.display(),
                    resume_from
                );
                fs::remove_file(tmp).await.map_err(|e| {
                    Unavailable::new(UnavailableReason::Transfer, format!("{}: {}", tmp.display(), e))
                })?;
                continue;
            }

            let resuming = status == StatusCode::PARTIAL_CONTENT && resume_from > 0;
            if status != StatusCode::OK && !resuming {
                return Err(Unavailable::new(
                    UnavailableReason::HttpStatus(status.as_u16()),
                    format!("HTTP {}", status.as_u16()),
                ));
            }

            if resume_from > 0 && !resuming {
                warn!("Server ignored range request, restarting download from scratch");
            }

            let offset = if resuming { resume_from } else { 0 };
            let result = self.write_body(response, tmp, offset).await;

            if result.is_err() {
                if let Err(e) = fs::remove_file(tmp).await {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {}: {}", tmp.display(), e);
                    }
                }
            }

            return result;
        }
    }

    async fn write_body(
        &self,
        mut response: reqwest::Response,
        tmp: &Path,
        offset: u64,
    ) -> Result<u64, Unavailable> {
        let transfer = |e: &dyn fmt::Display| {
            Unavailable::new(UnavailableReason::Transfer, format!("{}: {}", tmp.display(), e))
        };

        // Content-Length, not content_length(), which reports the decoded size
        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|len| len + offset);

        let mut file = if offset > 0 {
            debug!("Resuming download at byte {}", offset);
            OpenOptions::new().append(true).open(tmp).await
        } else {
            fs::File::create(tmp).await
        }
        .map_err(|e| transfer(&e))?;

        let mut written = offset;
        self.progress.send_modify(|p| {
            p.downloaded_bytes = written;
            p.total_bytes = declared;
        });

        while let Some(chunk) = response.chunk().await.map_err(|e| transfer(&e))? {
            file.write_all(&chunk).await.map_err(|e| transfer(&e))?;
            written += chunk.len() as u64;
            self.progress.send_modify(|p| p.downloaded_bytes = written);
        }

        file.flush().await.map_err(|e| transfer(&e))?;
        file.sync_all().await.map_err(|e| transfer(&e))?;
        drop(file);

        if let Some(expected) = declared {
            if written != expected {
                return Err(Unavailable::new(
                    UnavailableReason::Incomplete,
                    format!("expected {} bytes, got {}", expected, written),
                ));
            }
        }

        if written < MIN_ENGINE_SIZE {
            return Err(Unavailable::new(
                UnavailableReason::TooSmall,
                format!("downloaded file is only {} bytes", written),
            ));
        }

        Ok(written)
    }
}

/// Temp location a download of `version` is streamed into before being
/// renamed into place. Keyed on the version so a leftover from another
/// release is never resumed.
pub fn partial_path(dest: &Path, version: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let version: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dest.with_file_name(format!("{name}.{version}.download"))
}

/// Delete partial downloads of `dest` left by other versions
async fn remove_stale_partials(dest: &Path, keep: &Path) {
    let (Some(dir), Some(name)) = (dest.parent(), dest.file_name()) else {
        return;
    };
    let prefix = format!("{}.", name.to_string_lossy());

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if path == keep || !file_name.starts_with(&prefix) || !file_name.ends_with(".download") {
            continue;
        }

        info!("Removing stale partial download {}", path.display());
        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// First byte position of a `Content-Range: bytes <start>-<end>/<total>` header
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (start, _) = value.trim().strip_prefix("bytes ")?.split_once('-')?;
    start.trim().parse().ok()
}

async fn partial_len(tmp: &Path) -> u64 {
    fs::metadata(tmp).await.map(|m| m.len()).unwrap_or(0)
}
