//! HTTP API server for external control (editor extension, hotkey daemon)
//!
//! This module provides a REST API for the capture lifecycle:
//! - GET /health - Health check
//! - GET /engine/status - Engine file state and download progress
//! - POST /engine/provision - Download the engine if needed
//! - POST /capture/start - Launch a capture session
//! - POST /capture/stop - Send the stop token
//! - POST /capture/toggle - Start when idle, stop otherwise
//! - GET /capture/status - Current state and last outcome

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
