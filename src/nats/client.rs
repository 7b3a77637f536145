use anyhow::{Context, Result};
use async_nats::Client;
use tracing::info;

use super::messages::TranscriptMessage;

pub struct NatsClient {
    client: Client,
    source: String,
    subject_prefix: String,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, source: String, subject_prefix: String) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            source,
            subject_prefix,
        })
    }

    /// Subject transcripts from this source are published on
    pub fn subject(&self) -> String {
        format!("{}.{}", self.subject_prefix, self.source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publish a delivered transcript
    pub async fn publish_transcript(&self, message: &TranscriptMessage) -> Result<()> {
        let subject = self.subject();
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish transcript")?;

        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;

        info!(
            "Published transcript to {} (session={}, chars={}, cleaned={})",
            subject,
            message.session_id,
            message.text.len(),
            message.cleaned
        );

        Ok(())
    }
}
