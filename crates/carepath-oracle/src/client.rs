use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use carepath_core::config::{OracleConfig, RetryConfig};
use carepath_core::error::{CarepathError, Result};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Minimal OpenAI-compatible chat client shared by both oracles.
///
/// Non-streaming on purpose: every oracle call needs one complete JSON
/// document, so the response is requested in JSON mode and parsed whole.
pub struct ChatClient {
    http: Client,
    config: OracleConfig,
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

// Response types
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    /// One JSON-mode completion with bounded retry. Returns the raw
    /// document text.
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        let retry = &self.config.retry;
        let mut last_err = None;

        for attempt in 0..=retry.max_retries {
            match self.request(system, user).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if is_retryable(&e) && attempt < retry.max_retries {
                        let backoff = calculate_backoff(attempt, retry);
                        warn!(
                            attempt = attempt + 1,
                            max_retries = retry.max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying oracle request"
                        );
                        tokio::time::sleep(backoff).await;
                        last_err = Some(e);
                        continue;
                    }
                    last_err = Some(e);
                    break;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| CarepathError::OracleRequest("no attempts were made".into())))
    }

    async fn request(&self, system: &str, user: &str) -> Result<String> {
        let url = self.config.base_url.as_deref().unwrap_or(DEFAULT_API_URL);

        let body = ChatRequest {
            model: &self.config.model_id,
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: system,
                },
                RequestMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        };

        let mut req = self.http.post(url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| CarepathError::OracleRequest(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(CarepathError::OracleRequest(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CarepathError::OracleParse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| CarepathError::OracleParse("empty completion".into()))
    }
}

fn is_retryable(e: &CarepathError) -> bool {
    match e {
        CarepathError::OracleRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}
