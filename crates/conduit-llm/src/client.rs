use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::error::LlmError;
use crate::sse::SseTextStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Exponential backoff with jitter for retryable failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based). A server hint wins.
    pub fn delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp_ms = self.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_ms.min(self.max_delay.as_millis() as f64);

        let range = capped * self.jitter_factor;
        let jitter = if range > 0.0 {
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub api_key: Option<SecretString>,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ChatClientConfig {
    /// Read the API key from `api_key_env`. A missing key is reported on the
    /// first request rather than here.
    pub fn with_key_from_env(mut self, api_key_env: &str) -> Self {
        self.api_key = std::env::var(api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);
        self
    }
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.0,
            api_key: None,
            request_timeout: Duration::from_secs(60),
            stream_idle_timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
        }
    }
}

/// Minimal chat-completions client: one JSON-mode call and one streamed call.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    config: ChatClientConfig,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::NetworkError(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn has_api_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request(&self, body: &Value) -> Result<RequestBuilder, LlmError> {
        let key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::MissingApiKey("API key".into()))?;
        Ok(self
            .http
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", key.expose_secret()))
            .header("content-type", "application/json")
            .json(body))
    }

    /// Send with retries. Only the status line is retried; a body that
    /// started streaming is never replayed.
    async fn send(&self, body: &Value, timeout: Option<Duration>) -> Result<Response, LlmError> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let mut req = self.request(body)?;
            if let Some(t) = timeout {
                req = req.timeout(t);
            }

            let err = match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => error_from_response(resp).await,
                Err(e) => LlmError::NetworkError(e.to_string()),
            };
            if !err.is_retryable() || attempt >= retry.max_retries {
                return Err(err);
            }

            let delay = retry.delay(attempt, err.suggested_delay());
            warn!(
                attempt = attempt + 1,
                max_retries = retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying model request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One non-streamed completion in JSON mode, parsed into a JSON value.
    #[instrument(skip_all, fields(model = %self.config.model))]
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<Value, LlmError> {
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let resp = self.send(&body, Some(self.config.request_timeout)).await?;
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(format!("completion body: {e}")))?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::MalformedResponse("completion has no message content".into()))?;
        debug!(len = content.len(), "completion received");

        serde_json::from_str(content)
            .map_err(|e| LlmError::MalformedResponse(format!("completion is not JSON: {e}")))
    }

    /// Streamed completion as text chunks.
    #[instrument(skip_all, fields(model = %self.config.model))]
    pub async fn stream_text(&self, system: &str, user: &str) -> Result<ChunkStream, LlmError> {
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "stream": true,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let resp = self.send(&body, None).await?;
        Ok(Box::pin(SseTextStream::new(
            resp.bytes_stream(),
            self.config.stream_idle_timeout,
        )))
    }
}

async fn error_from_response(resp: Response) -> LlmError {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();
    LlmError::from_status(status, body, retry_after)
}
