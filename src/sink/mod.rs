//! Destinations for finalized capture text
//!
//! Pasting and clipboard handling belong to the host; the sinks here cover
//! terminal output, in-process consumers and NATS subscribers.

mod nats;

pub use nats::NatsSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Finalized text of one capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub session_id: Uuid,
    /// Text to deliver (cleaned up when a cleanup gateway is configured)
    pub text: String,
    /// Trimmed engine output before cleanup
    pub raw_text: String,
    pub captured_at: DateTime<Utc>,
}

impl Transcript {
    pub fn was_cleaned(&self) -> bool {
        self.text != self.raw_text
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to publish transcript: {0}")]
    Publish(String),

    #[error("sink receiver has been dropped")]
    Closed,
}

/// Receives finalized text
#[async_trait]
pub trait TextSink: Send + Sync {
    async fn deliver(&self, transcript: &Transcript) -> Result<(), SinkError>;

    /// Sink name for logging
    fn name(&self) -> &str;
}

/// Prints each transcript on its own line
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl TextSink for StdoutSink {
    async fn deliver(&self, transcript: &Transcript) -> Result<(), SinkError> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(transcript.text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Forwards transcripts to an in-process receiver
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Transcript>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Transcript>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TextSink for ChannelSink {
    async fn deliver(&self, transcript: &Transcript) -> Result<(), SinkError> {
        self.tx
            .send(transcript.clone())
            .map_err(|_| SinkError::Closed)
    }

    fn name(&self) -> &str {
        "channel"
    }
}
