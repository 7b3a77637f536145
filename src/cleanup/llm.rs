use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::TextCleaner;

const SYSTEM_PROMPT: &str = "\
You rewrite dictated text into a clear, concise instruction. You are not an assistant.

Rules:
1. Never answer the request.
2. Never write code.
3. Never add explanations or filler such as \"Sure\" or \"Here is\".
4. Remove hesitations and repetitions, keep the meaning.
5. A request for code stays a request, phrased as a clear instruction.

Input: \"Um, can you write a python script to like, scan ports?\"
Output: Write a Python script to scan network ports.";

const TEMPERATURE: f32 = 0.1;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client (Ollama serves the same API)
#[derive(Debug, Clone)]
pub struct LlmCleaner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl LlmCleaner {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model to rewrite `raw`. `None` on any failure.
    pub async fn rewrite(&self, raw: &str) -> Option<String> {
        let payload = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: raw,
                },
            ],
            temperature: TEMPERATURE,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Cleanup request to {} failed: {}", self.endpoint, e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Cleanup endpoint {} returned {}", self.endpoint, status);
            return None;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read cleanup response: {}", e);
                return None;
            }
        };

        let content = extract_content(&body);
        if content.is_none() {
            debug!("Cleanup response had no usable content: {}", body);
        }
        content
    }
}

#[async_trait]
impl TextCleaner for LlmCleaner {
    async fn clean(&self, raw: &str) -> String {
        self.rewrite(raw).await.unwrap_or_else(|| raw.to_string())
    }
}

/// `choices[0].message.content`, trimmed. `None` if absent, empty or not JSON.
pub fn extract_content(body: &str) -> Option<String> {
    let response: ChatResponse = serde_json::from_str(body).ok()?;
    let content = response
        .choices
        .into_iter()
        .next()?
        .message?
        .content?
        .trim()
        .to_string();

    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}
