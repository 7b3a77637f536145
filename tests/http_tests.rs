// Integration tests for the HTTP control API
//
// Requests go straight into the router via tower's `oneshot`; capture
// sessions run a `sh` script through interpreter mode.

use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use kiro_voice::config::{CaptureConfig, EngineConfig, ExecutionMode};
use kiro_voice::engine::{BinaryStore, Provisioner, ReleaseSource};
use kiro_voice::sink::{ChannelSink, Transcript};
use kiro_voice::{create_router, AppState, ControllerHandle, Launcher, SessionController};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    transcripts: mpsc::UnboundedReceiver<Transcript>,
    _dir: TempDir,
}

fn engine_config(dir: &Path, mode: ExecutionMode, interpreter: &str, script: &str) -> EngineConfig {
    EngineConfig {
        mode,
        storage_dir: Some(dir.join("engine").to_string_lossy().into_owned()),
        python_path: interpreter.to_string(),
        script_path: script.to_string(),
        ..EngineConfig::default()
    }
}

async fn test_app(mode: ExecutionMode, interpreter: &str, script_body: &str) -> Result<TestApp> {
    let dir = TempDir::new()?;
    let script = dir.path().join("voice_engine.sh");
    std::fs::write(&script, script_body)?;

    let engine = engine_config(dir.path(), mode, interpreter, &script.to_string_lossy());

    // Nothing listens here, so binary mode can never download
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    let release = ReleaseSource {
        base_url: format!("http://{}", addr),
        ..ReleaseSource::default()
    };

    let provisioner = Provisioner::new(BinaryStore::new(engine.storage_dir()), release)?;
    let launcher = Launcher::new(&engine, CaptureConfig::default(), Arc::new(provisioner));

    let (sink, transcripts) = ChannelSink::new();
    let (handle, _task) = ControllerHandle::spawn(SessionController::new(Arc::new(sink)));

    Ok(TestApp {
        router: create_router(AppState::new(handle, Arc::new(launcher))),
        transcripts,
        _dir: dir,
    })
}

async fn call(router: &Router, method: &str, uri: &str) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())?;

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };

    Ok((status, body))
}

const LISTENING_ENGINE: &str = r#"echo READY_TO_RECORD >&2
read line
echo "http $line"
"#;

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let app = test_app(ExecutionMode::Interpreter, "sh", LISTENING_ENGINE).await?;

    let (status, body) = call(&app.router, "GET", "/health").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["capture_state"], "idle");

    Ok(())
}

#[tokio::test]
async fn test_engine_status_reports_missing_file() -> Result<()> {
    let app = test_app(ExecutionMode::Binary, "sh", LISTENING_ENGINE).await?;

    let (status, body) = call(&app.router, "GET", "/engine/status").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["asset"]["status"], "missing");
    assert_eq!(body["mode"], "binary");
    assert!(body["path"]
        .as_str()
        .is_some_and(|p| p.contains("kiro_voice_engine_")));

    Ok(())
}

#[tokio::test]
async fn test_provision_unreachable_release_host() -> Result<()> {
    let app = test_app(ExecutionMode::Binary, "sh", LISTENING_ENGINE).await?;

    let (status, body) = call(&app.router, "POST", "/engine/provision").await?;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["reason"], "transport");
    assert!(body["remediation"]
        .as_str()
        .is_some_and(|m| m.contains("interpreter")));

    Ok(())
}

#[tokio::test]
async fn test_start_in_binary_mode_without_engine() -> Result<()> {
    let app = test_app(ExecutionMode::Binary, "sh", LISTENING_ENGINE).await?;

    let (status, body) = call(&app.router, "POST", "/capture/start").await?;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["remediation"].is_string());

    // Nothing was launched
    let (_, status_body) = call(&app.router, "GET", "/capture/status").await?;
    assert_eq!(status_body["state"], "idle");

    Ok(())
}

#[tokio::test]
async fn test_stop_while_idle() -> Result<()> {
    let app = test_app(ExecutionMode::Interpreter, "sh", LISTENING_ENGINE).await?;

    let (status, body) = call(&app.router, "POST", "/capture/stop").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "not_active");

    Ok(())
}

#[tokio::test]
async fn test_missing_interpreter_reports_launch_failure() -> Result<()> {
    let app = test_app(
        ExecutionMode::Interpreter,
        "/nonexistent/python3",
        LISTENING_ENGINE,
    )
    .await?;

    let (status, body) = call(&app.router, "POST", "/capture/start").await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "not_found");
    assert!(body["remediation"].is_string());

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_capture_lifecycle() -> Result<()> {
    let mut app = test_app(ExecutionMode::Interpreter, "sh", LISTENING_ENGINE).await?;

    let (status, body) = call(&app.router, "POST", "/capture/start").await?;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["session_id"].clone();
    assert!(session_id.is_string());

    // A second start while running is rejected without side effects
    let (status, _) = call(&app.router, "POST", "/capture/start").await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = call(&app.router, "GET", "/capture/status").await?;
    assert_eq!(body["session_id"], session_id);

    let (status, body) = call(&app.router, "POST", "/capture/stop").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "requested");

    let transcript = tokio::time::timeout(Duration::from_secs(10), app.transcripts.recv()).await?;
    assert_eq!(transcript.map(|t| t.text), Some("http STOP".to_string()));

    let (_, body) = call(&app.router, "GET", "/capture/status").await?;
    assert_eq!(body["state"], "idle");
    assert_eq!(body["last_outcome"]["outcome"], "delivered");
    assert_eq!(body["last_outcome"]["text"], "http STOP");

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_toggle_starts_then_stops() -> Result<()> {
    let mut app = test_app(ExecutionMode::Interpreter, "sh", LISTENING_ENGINE).await?;

    let (status, body) = call(&app.router, "POST", "/capture/toggle").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].is_string());

    let (status, body) = call(&app.router, "POST", "/capture/toggle").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "requested");

    let transcript = tokio::time::timeout(Duration::from_secs(10), app.transcripts.recv()).await?;
    assert_eq!(transcript.map(|t| t.text), Some("http STOP".to_string()));

    Ok(())
}
