use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::LaunchError;
use super::launch::LaunchSpec;
use super::marker::StderrEvent;
use super::session::{CaptureSession, ExitReport, ProcessEvent};
use super::state::CaptureState;
use crate::cleanup::TextCleaner;
use crate::sink::{TextSink, Transcript};

const EVENT_CAPACITY: usize = 64;

/// How a capture session ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Text reached the sink
    Delivered { text: String, cleaned: bool },
    /// Engine succeeded but heard nothing
    NoVoiceDetected,
    /// Engine exited unsuccessfully; any partial output was discarded
    EngineFailed { code: Option<i32> },
    /// Text was produced but the sink refused it
    SinkFailed { text: String, error: String },
}

/// Observer-facing notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: CaptureState,
        to: CaptureState,
    },
    Diagnostic {
        line: String,
    },
    Finished {
        session_id: Uuid,
        outcome: CaptureOutcome,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { session_id: Uuid },
    /// A session is already running; nothing changed
    AlreadyActive { session_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Stop token written
    Requested,
    /// No session; nothing written
    NotActive,
    /// Stop was already requested for this session
    AlreadyStopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: CaptureState,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub stop_requested: bool,
    pub last_outcome: Option<CaptureOutcome>,
}

/// Owns at most one capture session and turns its process events into
/// state changes and deliveries.
pub struct SessionController {
    active: Option<CaptureSession>,
    sink: Arc<dyn TextSink>,
    cleaner: Option<Arc<dyn TextCleaner>>,
    events: broadcast::Sender<SessionEvent>,
    last_outcome: Option<CaptureOutcome>,
}

impl SessionController {
    pub fn new(sink: Arc<dyn TextSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            active: None,
            sink,
            cleaner: None,
            events,
            last_outcome: None,
        }
    }

    /// Route captured text through `cleaner` before it reaches the sink
    pub fn with_cleaner(mut self, cleaner: Arc<dyn TextCleaner>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> CaptureState {
        self.active
            .as_ref()
            .map_or(CaptureState::Idle, CaptureSession::state)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(CaptureSession::id)
    }

    pub fn active_pid(&self) -> Option<u32> {
        self.active.as_ref().and_then(CaptureSession::pid)
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state(),
            session_id: self.active_session_id(),
            started_at: self.active.as_ref().map(CaptureSession::started_at),
            stop_requested: self
                .active
                .as_ref()
                .is_some_and(CaptureSession::stop_requested),
            last_outcome: self.last_outcome.clone(),
        }
    }

    /// Launch the engine. Rejected without side effects while a session exists.
    pub fn start(&mut self, spec: &LaunchSpec) -> Result<StartOutcome, LaunchError> {
        if let Some(session) = &self.active {
            warn!(
                "Capture session {} already {}, ignoring start",
                session.id(),
                session.state()
            );
            return Ok(StartOutcome::AlreadyActive {
                session_id: session.id(),
            });
        }

        info!("Starting engine: {}", spec);
        self.emit(SessionEvent::StateChanged {
            from: CaptureState::Idle,
            to: CaptureState::Starting,
        });

        match CaptureSession::launch(spec) {
            Ok(session) => {
                let session_id = session.id();
                self.active = Some(session);
                Ok(StartOutcome::Started { session_id })
            }
            Err(e) => {
                error!("{} ({:?})", e, e.kind);
                self.emit(SessionEvent::StateChanged {
                    from: CaptureState::Starting,
                    to: CaptureState::Idle,
                });
                Err(e)
            }
        }
    }

    /// Ask the running engine to finish. No-op without a session.
    pub async fn stop(&mut self) -> StopOutcome {
        let Some(session) = self.active.as_mut() else {
            debug!("Stop requested with no active capture session");
            return StopOutcome::NotActive;
        };

        if session.state() == CaptureState::Stopping {
            return StopOutcome::AlreadyStopping;
        }

        info!("Stopping capture session {}", session.id());
        if let Err(e) = session.request_stop().await {
            // The engine most likely exited already; its exit event finalizes the session
            warn!("Failed to send stop token: {}", e);
        }

        let from = session.state();
        if session.transition(CaptureState::Stopping) {
            self.emit(SessionEvent::StateChanged {
                from,
                to: CaptureState::Stopping,
            });
        }

        StopOutcome::Requested
    }

    /// Wait for the active session's next process event. `None` when idle.
    ///
    /// Cancel safe, so it can sit in a `select!` next to other work.
    pub async fn wait_process_event(&mut self) -> Option<ProcessEvent> {
        match self.active.as_mut() {
            Some(session) => Some(session.next_event().await),
            None => None,
        }
    }

    /// Apply a process event. Exit finalizes the session and delivers text.
    pub async fn handle_process_event(&mut self, event: ProcessEvent) -> Option<SessionEvent> {
        match event {
            ProcessEvent::Stderr(StderrEvent::Ready) => {
                let session = self.active.as_mut()?;
                let from = session.state();
                if !session.transition(CaptureState::Listening) {
                    return None;
                }
                info!("Capture session {} listening", session.id());
                Some(self.emit(SessionEvent::StateChanged {
                    from,
                    to: CaptureState::Listening,
                }))
            }
            ProcessEvent::Stderr(StderrEvent::Diagnostic(line)) => {
                debug!("engine: {}", line);
                Some(self.emit(SessionEvent::Diagnostic { line }))
            }
            ProcessEvent::Exited(report) => {
                // Releasing the session drops the process handle
                let session = self.active.take()?;
                let session_id = session.id();
                let from = session.state();
                drop(session);

                let outcome = self.finalize(session_id, report).await;
                self.last_outcome = Some(outcome.clone());

                self.emit(SessionEvent::StateChanged {
                    from,
                    to: CaptureState::Idle,
                });
                Some(self.emit(SessionEvent::Finished {
                    session_id,
                    outcome,
                }))
            }
        }
    }

    /// Wait for and apply the next meaningful event. `None` when idle.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let event = self.wait_process_event().await?;
            if let Some(event) = self.handle_process_event(event).await {
                return Some(event);
            }
        }
    }

    /// Drive the active session until the engine exits
    pub async fn wait_finished(&mut self) -> Option<CaptureOutcome> {
        while let Some(event) = self.next_event().await {
            if let SessionEvent::Finished { outcome, .. } = event {
                return Some(outcome);
            }
        }
        None
    }

    /// Environment teardown: kill a still-running engine without delivering anything
    pub async fn shutdown(&mut self) {
        if let Some(mut session) = self.active.take() {
            warn!("Killing capture session {} on shutdown", session.id());
            let from = session.state();
            session.kill().await;
            self.emit(SessionEvent::StateChanged {
                from,
                to: CaptureState::Idle,
            });
        }
    }

    async fn finalize(&self, session_id: Uuid, report: ExitReport) -> CaptureOutcome {
        let raw = String::from_utf8_lossy(&report.stdout).trim().to_string();

        if !report.success {
            warn!(
                "Engine exited with code {:?}, discarding {} bytes of output",
                report.code,
                raw.len()
            );
            return CaptureOutcome::EngineFailed { code: report.code };
        }

        if raw.is_empty() {
            info!("No voice detected in session {}", session_id);
            return CaptureOutcome::NoVoiceDetected;
        }

        let text = match &self.cleaner {
            Some(cleaner) => {
                let cleaned = cleaner.clean(&raw).await;
                if cleaned.trim().is_empty() {
                    raw.clone()
                } else {
                    cleaned
                }
            }
            None => raw.clone(),
        };

        let transcript = Transcript {
            session_id,
            text,
            raw_text: raw,
            captured_at: Utc::now(),
        };

        match self.sink.deliver(&transcript).await {
            Ok(()) => {
                info!(
                    "Delivered {} chars from session {} to {}",
                    transcript.text.len(),
                    session_id,
                    self.sink.name()
                );
                CaptureOutcome::Delivered {
                    cleaned: transcript.was_cleaned(),
                    text: transcript.text,
                }
            }
            Err(e) => {
                error!("Sink {} rejected transcript: {}", self.sink.name(), e);
                CaptureOutcome::SinkFailed {
                    text: transcript.text,
                    error: e.to_string(),
                }
            }
        }
    }

    fn emit(&self, event: SessionEvent) -> SessionEvent {
        // No subscribers is fine
        let _ = self.events.send(event.clone());
        event
    }
}
