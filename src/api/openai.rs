use super::{ChatModel, ChatRequest};
use crate::config::Config;
use crate::error::{ApiErrorKind, Result, SceneError, TimeoutStage};
use crate::retry::{RetryPolicy, retry};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u32>,
}

/// Chat-completion client for any OpenAI-compatible gateway.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SceneError::configuration("API key is required for the LLM client"))?;

        let client = Client::builder()
            .timeout(config.api_timeout)
            .build()
            .map_err(|e| SceneError::configuration(format!("failed to create HTTP client: {e}")))?;

        info!("LLM client initialized for {}", config.base_url);
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            timeout: config.api_timeout,
            retry: RetryPolicy::exponential(config.max_attempts, config.retry_delay),
        })
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<String> {
        let body = CompletionBody {
            model: request.model,
            messages: [
                Message {
                    role: "system",
                    content: request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let call = async {
            let response = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| self.classify_transport(e))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| self.classify_transport(e))?;

            if !status.is_success() {
                return Err(classify_status(status, &text));
            }
            parse_completion(&text)
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SceneError::timeout(TimeoutStage::Api, self.timeout)),
        }
    }

    fn classify_transport(&self, err: reqwest::Error) -> SceneError {
        if err.is_timeout() {
            SceneError::timeout(TimeoutStage::Api, self.timeout)
        } else if err.is_decode() {
            SceneError::api(ApiErrorKind::MalformedResponse, err.to_string())
        } else {
            SceneError::api(ApiErrorKind::Transport, err.to_string())
        }
    }
}

impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        retry(&self.retry, SceneError::is_transient, async |attempt| {
            debug!("Calling {} (attempt {})", request.model, attempt);
            self.send_once(request).await
        })
        .await
    }
}

fn classify_status(status: StatusCode, body: &str) -> SceneError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiErrorKind::Authentication,
        StatusCode::TOO_MANY_REQUESTS => ApiErrorKind::RateLimit,
        s if s.is_server_error() => ApiErrorKind::Server,
        _ => ApiErrorKind::Request,
    };
    let snippet: String = body.chars().take(500).collect();
    SceneError::api(kind, format!("HTTP {status}: {snippet}"))
}

fn parse_completion(body: &str) -> Result<String> {
    let parsed: CompletionResponse = serde_json::from_str(body).map_err(|e| {
        SceneError::api(
            ApiErrorKind::MalformedResponse,
            format!("failed to parse completion: {e}"),
        )
    })?;

    if let Some(tokens) = parsed.usage.and_then(|u| u.total_tokens) {
        debug!("Completion used {} tokens", tokens);
    }

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| {
            SceneError::api(
                ApiErrorKind::MalformedResponse,
                "completion contained no message content",
            )
        })
}
