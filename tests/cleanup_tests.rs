// Integration tests for the text cleanup gateway
//
// A local axum server plays the chat completions endpoint. Whatever it does,
// the gateway must hand back usable text.

use anyhow::Result;
use axum::{
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use kiro_voice::cleanup::{CleanupGateway, LlmCleaner, ModelReadiness, OllamaManager, TextCleaner};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

const ENDPOINT_PATH: &str = "/v1/chat/completions";

async fn spawn_server(app: Router) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

fn endpoint(addr: SocketAddr) -> String {
    format!("http://{}{}", addr, ENDPOINT_PATH)
}

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    })
}

fn gateway(endpoint: String, timeout: Duration) -> CleanupGateway {
    CleanupGateway::new(LlmCleaner::new(endpoint, "mistral", ""), timeout)
}

#[tokio::test]
async fn test_valid_rewrite_is_used() -> Result<()> {
    let seen = Arc::new(Mutex::new(None::<Value>));
    let seen_by_server = seen.clone();

    let app = Router::new().route(
        ENDPOINT_PATH,
        post(move |Json(body): Json<Value>| {
            let seen = seen_by_server.clone();
            async move {
                if let Ok(mut slot) = seen.lock() {
                    *slot = Some(body);
                }
                Json(completion("  Add a dark mode toggle to the settings page.  "))
            }
        }),
    );
    let addr = spawn_server(app).await?;

    let cleaned = gateway(endpoint(addr), Duration::from_secs(5))
        .clean("um so like add a dark mode toggle to the uh settings page")
        .await;

    assert_eq!(cleaned, "Add a dark mode toggle to the settings page.");

    let request = seen.lock().ok().and_then(|slot| slot.clone());
    let request = request.expect("endpoint received a request");
    assert_eq!(request["model"], "mistral");
    assert_eq!(request["messages"][0]["role"], "system");
    assert_eq!(request["messages"][1]["role"], "user");
    assert_eq!(
        request["messages"][1]["content"],
        "um so like add a dark mode toggle to the uh settings page"
    );

    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_returns_original() -> Result<()> {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let cleaned = gateway(endpoint(addr), Duration::from_secs(5))
        .clean("add a dark mode toggle")
        .await;

    assert_eq!(cleaned, "add a dark mode toggle");

    Ok(())
}

#[tokio::test]
async fn test_error_status_returns_original() -> Result<()> {
    let app = Router::new().route(
        ENDPOINT_PATH,
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model crashed") }),
    );
    let addr = spawn_server(app).await?;

    let cleaned = gateway(endpoint(addr), Duration::from_secs(5))
        .clean("rename the config struct")
        .await;

    assert_eq!(cleaned, "rename the config struct");

    Ok(())
}

#[tokio::test]
async fn test_missing_content_returns_original() -> Result<()> {
    let app = Router::new().route(
        ENDPOINT_PATH,
        post(|| async { Json(json!({ "choices": [] })) }),
    );
    let addr = spawn_server(app).await?;

    let cleaned = gateway(endpoint(addr), Duration::from_secs(5))
        .clean("write unit tests for the parser")
        .await;

    assert_eq!(cleaned, "write unit tests for the parser");

    Ok(())
}

#[tokio::test]
async fn test_non_json_body_returns_original() -> Result<()> {
    let app = Router::new().route(ENDPOINT_PATH, post(|| async { "<html>busy</html>" }));
    let addr = spawn_server(app).await?;

    let cleaned = gateway(endpoint(addr), Duration::from_secs(5))
        .clean("fix the failing build")
        .await;

    assert_eq!(cleaned, "fix the failing build");

    Ok(())
}

#[tokio::test]
async fn test_slow_endpoint_times_out() -> Result<()> {
    let app = Router::new().route(
        ENDPOINT_PATH,
        post(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Json(completion("too late"))
        }),
    );
    let addr = spawn_server(app).await?;

    let started = Instant::now();
    let cleaned = gateway(endpoint(addr), Duration::from_millis(200))
        .clean("add logging to the server")
        .await;

    assert_eq!(cleaned, "add logging to the server");
    assert!(started.elapsed() < Duration::from_secs(5));

    Ok(())
}

#[tokio::test]
async fn test_empty_input_skips_request() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let server_hits = hits.clone();

    let app = Router::new().route(
        ENDPOINT_PATH,
        post(move || {
            let hits = server_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(completion("something"))
            }
        }),
    );
    let addr = spawn_server(app).await?;
    let gateway = gateway(endpoint(addr), Duration::from_secs(5));

    assert_eq!(gateway.clean("").await, "");
    assert_eq!(gateway.clean("   ").await, "   ");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_api_key_sent_as_bearer_token() -> Result<()> {
    let app = Router::new().route(
        ENDPOINT_PATH,
        post(|headers: HeaderMap| async move {
            let authorized = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                == Some("Bearer sk-test");

            if authorized {
                Json(completion("Summarize the open pull requests.")).into_response()
            } else {
                StatusCode::UNAUTHORIZED.into_response()
            }
        }),
    );
    let addr = spawn_server(app).await?;

    let with_key = CleanupGateway::new(
        LlmCleaner::new(endpoint(addr), "gpt-4o-mini", "sk-test"),
        Duration::from_secs(5),
    );
    assert_eq!(
        with_key.clean("summarize the open PRs").await,
        "Summarize the open pull requests."
    );

    let without_key = gateway(endpoint(addr), Duration::from_secs(5));
    assert_eq!(
        without_key.clean("summarize the open PRs").await,
        "summarize the open PRs"
    );

    Ok(())
}

#[tokio::test]
async fn test_missing_ollama_is_not_installed() -> Result<()> {
    let ollama = OllamaManager::new("/nonexistent/ollama");

    assert!(!ollama.is_installed().await);
    assert_eq!(
        ollama.ensure_model("mistral", true, None).await,
        ModelReadiness::NotInstalled
    );

    Ok(())
}

#[cfg(unix)]
mod fake_ollama {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tokio::sync::watch;

    /// Script answering `--version`, `list` and `pull` like the real CLI.
    /// `list` only shows the model once `pull` has run.
    fn install(dir: &Path) -> Result<PathBuf> {
        let marker = dir.join("pulled");
        let script = format!(
            r#"#!/bin/sh
case "$1" in
  --version) echo "ollama version is 0.3.0" ;;
  list)
    echo "NAME            ID              SIZE      MODIFIED"
    if [ -f "{marker}" ]; then echo "mistral:latest  f974a74358d6    4.1 GB    1 second ago"; fi
    ;;
  pull)
    printf 'pulling manifest\n' >&2
    printf 'pulling f974a74358d6...  42%%\r' >&2
    printf 'pulling f974a74358d6... 100%%\n' >&2
    touch "{marker}"
    ;;
  *) exit 1 ;;
esac
"#,
            marker = marker.display()
        );

        let path = dir.join("ollama");
        std::fs::write(&path, script)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    #[tokio::test]
    async fn test_missing_model_without_auto_pull() -> Result<()> {
        let dir = TempDir::new()?;
        let ollama = OllamaManager::new(install(dir.path())?);

        assert!(ollama.is_installed().await);
        assert!(!ollama.has_model("mistral").await);
        assert_eq!(
            ollama.ensure_model("mistral", false, None).await,
            ModelReadiness::Missing
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_pull_reports_progress() -> Result<()> {
        let dir = TempDir::new()?;
        let ollama = OllamaManager::new(install(dir.path())?);
        let (progress_tx, progress_rx) = watch::channel(0u8);

        let readiness = ollama.ensure_model("mistral", true, Some(&progress_tx)).await;

        assert_eq!(readiness, ModelReadiness::Ready);
        assert_eq!(*progress_rx.borrow(), 100);
        assert!(ollama.is_model_ready("mistral").await);

        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_skips_request_when_model_missing() -> Result<()> {
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = hits.clone();

        let app = Router::new().route(
            ENDPOINT_PATH,
            post(move || {
                let hits = server_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(completion("Cleaned."))
                }
            }),
        );
        let addr = spawn_server(app).await?;

        let dir = TempDir::new()?;
        let gateway = gateway(endpoint(addr), Duration::from_secs(5))
            .with_ollama(OllamaManager::new(install(dir.path())?));

        assert_eq!(gateway.clean("raw words").await, "raw words");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("pulled").exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_pulls_missing_model_in_background() -> Result<()> {
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = hits.clone();

        let app = Router::new().route(
            ENDPOINT_PATH,
            post(move || {
                let hits = server_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(completion("Cleaned."))
                }
            }),
        );
        let addr = spawn_server(app).await?;

        let dir = TempDir::new()?;
        let gateway = gateway(endpoint(addr), Duration::from_secs(5))
            .with_ollama(OllamaManager::new(install(dir.path())?))
            .pull_missing_model(true);

        // The capture that finds the model missing is not held up by the pull
        assert_eq!(gateway.clean("raw words").await, "raw words");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let marker = dir.path().join("pulled");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !marker.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(marker.exists(), "model was never pulled");

        assert_eq!(gateway.clean("raw words").await, "Cleaned.");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        Ok(())
    }
}
