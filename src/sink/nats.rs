use async_trait::async_trait;

use super::{SinkError, TextSink, Transcript};
use crate::nats::{NatsClient, TranscriptMessage};

/// Publishes delivered transcripts for other services to consume
pub struct NatsSink {
    client: NatsClient,
}

impl NatsSink {
    pub fn new(client: NatsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextSink for NatsSink {
    async fn deliver(&self, transcript: &Transcript) -> Result<(), SinkError> {
        let message = TranscriptMessage::from_transcript(self.client.source(), transcript);
        self.client
            .publish_transcript(&message)
            .await
            .map_err(|e| SinkError::Publish(format!("{:#}", e)))
    }

    fn name(&self) -> &str {
        "nats"
    }
}
