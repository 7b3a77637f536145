use serde::{Deserialize, Serialize};

use crate::sink::Transcript;

/// Transcript message published to NATS once a capture session delivers text
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub session_id: String,
    pub source: String,
    pub text: String,
    pub raw_text: String,
    pub cleaned: bool,
    pub timestamp: String, // RFC3339 timestamp
}

impl TranscriptMessage {
    pub fn from_transcript(source: &str, transcript: &Transcript) -> Self {
        Self {
            session_id: transcript.session_id.to_string(),
            source: source.to_string(),
            text: transcript.text.clone(),
            raw_text: transcript.raw_text.clone(),
            cleaned: transcript.was_cleaned(),
            timestamp: transcript.captured_at.to_rfc3339(),
        }
    }
}
