use chrono::{DateTime, Utc};
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::LaunchError;
use super::launch::LaunchSpec;
use super::marker::{MarkerDecoder, StderrEvent};
use super::state::CaptureState;
use crate::engine::Platform;

/// Line written to the engine's stdin to request a graceful stop
pub const STOP_TOKEN: &str = "STOP\n";

/// How the engine process ended, with everything it wrote to stdout
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
}

/// Something the running engine did
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Stderr(StderrEvent),
    /// Delivered only after stdout has been read to the end
    Exited(ExitReport),
}

/// The single live engine process and the state derived from its streams
pub struct CaptureSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    state: CaptureState,
    stop_requested: bool,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout_task: Option<JoinHandle<Vec<u8>>>,
    stderr_rx: mpsc::UnboundedReceiver<StderrEvent>,
    stderr_open: bool,
}

impl CaptureSession {
    /// Spawn the engine and attach readers to its output streams.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn launch(spec: &LaunchSpec) -> Result<Self, LaunchError> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchError::classify(spec.program.clone(), e, Platform::current()))?;

        let id = Uuid::new_v4();
        info!("Capture session {} launched (pid {:?})", id, child.id());

        let stdin = child.stdin.take();
        let stdout_task = child.stdout.take().map(|stdout| tokio::spawn(read_stdout(stdout)));

        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let stderr_open = match child.stderr.take() {
            Some(stderr) => {
                tokio::spawn(read_stderr(stderr, stderr_tx));
                true
            }
            None => false,
        };

        Ok(Self {
            id,
            started_at: Utc::now(),
            state: CaptureState::Starting,
            stop_requested: false,
            child,
            stdin,
            stdout_task,
            stderr_rx,
            stderr_open,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Apply a transition if it is valid from the current state
    pub(crate) fn transition(&mut self, target: CaptureState) -> bool {
        if self.state.can_transition_to(&target) {
            debug!("Capture session {}: {} -> {}", self.id, self.state, target);
            self.state = target;
            true
        } else {
            debug!(
                "Capture session {}: ignoring {} -> {}",
                self.id, self.state, target
            );
            false
        }
    }

    /// Write the stop token. Cooperative: the engine is expected to exit on
    /// its own afterwards.
    pub async fn request_stop(&mut self) -> io::Result<()> {
        self.stop_requested = true;

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin is closed"))?;

        stdin.write_all(STOP_TOKEN.as_bytes()).await?;
        stdin.flush().await
    }

    /// Wait for the next stderr event or the process exit.
    ///
    /// Cancel safe: dropping the future before it resolves loses nothing.
    pub async fn next_event(&mut self) -> ProcessEvent {
        loop {
            tokio::select! {
                biased;

                event = self.stderr_rx.recv(), if self.stderr_open => match event {
                    Some(event) => return ProcessEvent::Stderr(event),
                    None => self.stderr_open = false,
                },

                status = self.child.wait() => {
                    let (success, code) = match status {
                        Ok(status) => (status.success(), status.code()),
                        Err(e) => {
                            error!("Failed to wait for engine process: {}", e);
                            (false, None)
                        }
                    };
                    let stdout = self.collect_stdout().await;

                    return ProcessEvent::Exited(ExitReport { success, code, stdout });
                }
            }
        }
    }

    /// Forcefully terminate the process (teardown only)
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill engine process: {}", e);
        }
    }

    async fn collect_stdout(&mut self) -> Vec<u8> {
        let Some(task) = self.stdout_task.as_mut() else {
            return Vec::new();
        };

        let result = task.await;
        self.stdout_task = None;

        result.unwrap_or_else(|e| {
            error!("Stdout reader task failed: {}", e);
            Vec::new()
        })
    }
}

async fn read_stdout<R: AsyncRead + Unpin>(mut stdout: R) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(e) = stdout.read_to_end(&mut buffer).await {
        warn!(
            "Engine stdout read failed after {} bytes: {}",
            buffer.len(),
            e
        );
    }
    buffer
}

async fn read_stderr<R: AsyncRead + Unpin>(
    mut stderr: R,
    events: mpsc::UnboundedSender<StderrEvent>,
) {
    let mut decoder = MarkerDecoder::new();
    let mut chunk = [0u8; 1024];

    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for event in decoder.feed(&chunk[..n]) {
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Engine stderr read failed: {}", e);
                break;
            }
        }
    }

    if let Some(event) = decoder.finish() {
        let _ = events.send(event);
    }
}
