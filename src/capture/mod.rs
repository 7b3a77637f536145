//! Capture session management
//!
//! This module runs the external capture engine:
//! - Launching it with silence parameters
//! - Decoding control markers from its error stream
//! - Sending the stop token over its input stream
//! - Finalizing on exit: cleanup, then delivery to a text sink

mod controller;
mod error;
mod launch;
mod marker;
mod service;
mod session;
mod state;

pub use controller::{
    CaptureOutcome, ControllerStatus, SessionController, SessionEvent, StartOutcome, StopOutcome,
};
pub use error::{CaptureError, LaunchError, LaunchFailureKind};
pub use launch::{capture_args, LaunchSpec};
pub use marker::{MarkerDecoder, StderrEvent, READY_MARKER};
pub use service::ControllerHandle;
pub use session::{CaptureSession, ExitReport, ProcessEvent, STOP_TOKEN};
pub use state::CaptureState;
