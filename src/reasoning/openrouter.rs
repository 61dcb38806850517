//! OpenRouter-backed reasoning client with retry for transient errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Completion, ReasoningService, TokenUsage};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// How many times to retry a rate-limited or 5xx response.
const MAX_RETRIES: u32 = 3;

/// Base backoff; doubled per attempt.
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Reasoning client over the OpenRouter chat-completions API.
pub struct OpenRouterReasoner {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenRouterReasoner {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    async fn execute(&self, prompt: &str) -> anyhow::Result<Completion> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.2,
        };

        let mut attempt = 0;
        loop {
            let response = self
                .client
                .post(OPENROUTER_API_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            let retryable = match &response {
                Ok(r) => {
                    let status = r.status();
                    status.as_u16() == 429 || status.is_server_error()
                }
                Err(e) => e.is_timeout() || e.is_connect(),
            };

            if retryable && attempt < MAX_RETRIES {
                let delay = RETRY_BASE * 2u32.pow(attempt);
                tracing::warn!(attempt, ?delay, "transient reasoning failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let response = response?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                anyhow::bail!("reasoning call failed: {} - {}", status, body);
            }

            let parsed: ChatResponse = serde_json::from_str(&body)
                .map_err(|e| anyhow::anyhow!("unparseable reasoning response: {} in {}", e, body))?;
            let text = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| anyhow::anyhow!("reasoning response had no content"))?;
            let usage = parsed
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
                .unwrap_or_default();

            return Ok(Completion { text, usage });
        }
    }
}

#[async_trait]
impl ReasoningService for OpenRouterReasoner {
    async fn complete(&self, prompt: &str) -> anyhow::Result<Completion> {
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "reasoning call");
        self.execute(prompt).await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
