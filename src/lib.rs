pub mod capture;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod http;
pub mod launcher;
pub mod nats;
pub mod sink;

pub use capture::{
    CaptureOutcome, CaptureState, ControllerHandle, LaunchSpec, SessionController, SessionEvent,
};
pub use cleanup::{CleanupGateway, TextCleaner};
pub use config::Config;
pub use engine::{BinaryStore, Platform, ProvisionOutcome, Provisioner, ReleaseSource};
pub use http::{create_router, AppState};
pub use launcher::{LaunchPlan, Launcher};
pub use nats::{NatsClient, TranscriptMessage};
pub use sink::{ChannelSink, NatsSink, StdoutSink, TextSink, Transcript};
