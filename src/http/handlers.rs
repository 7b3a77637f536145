use super::state::AppState;
use crate::capture::{
    CaptureError, CaptureState, ControllerStatus, LaunchFailureKind, StartOutcome, StopOutcome,
};
use crate::config::ExecutionMode;
use crate::engine::{AssetStatus, DownloadProgress, Platform, ProvisionOutcome, UnavailableReason};
use crate::launcher::LaunchPlan;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub capture_state: Option<CaptureState>,
}

#[derive(Debug, Serialize)]
pub struct EngineStatusResponse {
    pub platform: Platform,
    pub mode: ExecutionMode,
    pub path: PathBuf,
    pub asset: AssetStatus,
    pub download: DownloadProgress,
}

#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub status: String,
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct StartCaptureResponse {
    pub session_id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopCaptureResponse {
    pub result: StopOutcome,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<LaunchFailureKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: None,
            reason: None,
            remediation: None,
        }
    }
}

fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

fn controller_gone(e: CaptureError) -> Response {
    error!("Capture controller unavailable: {}", e);
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorResponse::new(e.to_string()),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let capture_state = state.controller.status().await.ok().map(|s| s.state);

    Json(HealthResponse {
        status: "ok".to_string(),
        capture_state,
    })
}

/// GET /engine/status
/// Engine file state and progress of the last download
pub async fn engine_status(State(state): State<AppState>) -> Response {
    let launcher = &state.launcher;
    let provisioner = launcher.provisioner();
    let platform = launcher.platform();

    match provisioner.status(platform).await {
        Ok(asset) => {
            let download = provisioner.progress().borrow().clone();
            Json(EngineStatusResponse {
                platform,
                mode: launcher.mode(),
                path: provisioner.store().resolve_path(platform),
                asset,
                download,
            })
            .into_response()
        }
        Err(e) => {
            error!("Failed to inspect engine: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(e.to_string()),
            )
        }
    }
}

/// POST /engine/provision
/// Download the engine if it is missing or corrupt
pub async fn provision_engine(State(state): State<AppState>) -> Response {
    let platform = state.launcher.platform();
    info!("Provisioning engine for {}", platform);

    match state.launcher.provisioner().ensure(platform).await {
        Ok(ProvisionOutcome::Ready(path)) => Json(ProvisionResponse {
            status: "ready".to_string(),
            path,
        })
        .into_response(),
        Ok(ProvisionOutcome::Unavailable(unavailable)) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse {
                reason: Some(unavailable.reason),
                remediation: Some(unavailable.user_message()),
                ..ErrorResponse::new(unavailable.detail)
            },
        ),
        Err(e) => {
            error!("Provisioning failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(e.to_string()),
            )
        }
    }
}

/// POST /capture/start
/// Launch a capture session
pub async fn start_capture(State(state): State<AppState>) -> Response {
    start_session(&state).await
}

/// POST /capture/stop
/// Ask the running engine to finish; delivery happens when it exits
pub async fn stop_capture(State(state): State<AppState>) -> Response {
    stop_session(&state).await
}

/// POST /capture/toggle
/// Start when idle, stop otherwise
pub async fn toggle_capture(State(state): State<AppState>) -> Response {
    match state.controller.status().await {
        Ok(status) if status.state == CaptureState::Idle => start_session(&state).await,
        Ok(_) => stop_session(&state).await,
        Err(e) => controller_gone(e),
    }
}

/// GET /capture/status
/// Current state and the outcome of the last finished session
pub async fn capture_status(State(state): State<AppState>) -> Response {
    match state.controller.status().await {
        Ok(status) => Json::<ControllerStatus>(status).into_response(),
        Err(e) => controller_gone(e),
    }
}

async fn start_session(state: &AppState) -> Response {
    // Don't provision while a session is already running
    match state.controller.status().await {
        Ok(status) => {
            if let Some(session_id) = status.session_id {
                return already_active(session_id);
            }
        }
        Err(e) => return controller_gone(e),
    }

    let spec = match state.launcher.prepare().await {
        Ok(LaunchPlan::Ready(spec)) => spec,
        Ok(LaunchPlan::Unavailable(unavailable)) => {
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    reason: Some(unavailable.reason),
                    remediation: Some(unavailable.user_message()),
                    ..ErrorResponse::new(unavailable.detail)
                },
            );
        }
        Err(e) => {
            error!("Failed to prepare engine: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(e.to_string()),
            );
        }
    };

    match state.controller.start(spec).await {
        Ok(StartOutcome::Started { session_id }) => {
            info!("Capture session {} started", session_id);
            (
                StatusCode::OK,
                Json(StartCaptureResponse {
                    session_id,
                    status: "starting".to_string(),
                    message: format!("Capture session {} started", session_id),
                }),
            )
                .into_response()
        }
        Ok(StartOutcome::AlreadyActive { session_id }) => already_active(session_id),
        Err(CaptureError::Launch(e)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse {
                kind: Some(e.kind),
                remediation: Some(e.remediation().to_string()),
                ..ErrorResponse::new(e.to_string())
            },
        ),
        Err(e) => controller_gone(e),
    }
}

async fn stop_session(state: &AppState) -> Response {
    match state.controller.stop().await {
        Ok(result) => {
            let message = match result {
                StopOutcome::Requested => "Stop requested",
                StopOutcome::NotActive => "No capture session is running",
                StopOutcome::AlreadyStopping => "Capture session is already stopping",
            };
            Json(StopCaptureResponse {
                result,
                message: message.to_string(),
            })
            .into_response()
        }
        Err(e) => controller_gone(e),
    }
}

fn already_active(session_id: Uuid) -> Response {
    warn!("Capture session {} already running", session_id);
    error_response(
        StatusCode::CONFLICT,
        ErrorResponse::new(format!("Capture session {} is already running", session_id)),
    )
}
