use async_trait::async_trait;
use shadowscan_model::ErrorKind;
use std::time::Duration;

/// Classified transport failure. `retry_after_secs` carries a server-provided
/// Retry-After when present.
#[derive(Debug, Clone)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub reason: String,
    pub retry_after_secs: Option<u64>,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub body: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Outbound boundary to the external classifier. The production transport is
/// [`HttpLlmClient`]; tests script their own.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete(&self, prompt: &str) -> std::result::Result<TransportResponse, ClientError>;
}

/// reqwest-based transport speaking a chat-completion shaped endpoint.
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| ClientError {
                kind: ErrorKind::Network,
                reason: format!("build client: {err}"),
                retry_after_secs: None,
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> ErrorKind {
        match status.as_u16() {
            401 | 403 => ErrorKind::Authentication,
            429 => ErrorKind::RateLimit,
            400 => {
                if body.contains("context_length") || body.contains("maximum context") {
                    ErrorKind::ContextLengthExceeded
                } else if body.contains("invalid_api_key") || body.contains("api key") {
                    ErrorKind::InvalidApiKey
                } else {
                    ErrorKind::InvalidRequest
                }
            }
            413 => ErrorKind::ContextLengthExceeded,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::InvalidRequest,
        }
    }
}

#[async_trait]
impl LlmTransport for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> std::result::Result<TransportResponse, ClientError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "response_format": {"type": "json_object"},
            "temperature": 0,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ClientError {
                kind: if err.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Network
                },
                reason: err.to_string(),
                retry_after_secs: None,
            })?;

        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.map_err(|err| ClientError {
            kind: ErrorKind::Network,
            reason: format!("read body: {err}"),
            retry_after_secs: None,
        })?;

        if !status.is_success() {
            return Err(ClientError {
                kind: Self::classify_status(status, &body),
                reason: format!("HTTP {status}: {}", truncate(&body, 300)),
                retry_after_secs,
            });
        }

        // Chat-completion envelope: the model text lives at
        // choices[0].message.content; usage carries token counts.
        let envelope: serde_json::Value =
            serde_json::from_str(&body).map_err(|err| ClientError {
                kind: ErrorKind::InvalidRequest,
                reason: format!("malformed envelope: {err}"),
                retry_after_secs: None,
            })?;
        let content = envelope["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let input_tokens = envelope["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = envelope["usage"]["completion_tokens"].as_u64().unwrap_or(0);

        Ok(TransportResponse {
            body: content,
            input_tokens,
            output_tokens,
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
