//! Text-generation boundary.
//!
//! A [`TextGenerator`] turns one prompt into one completion or a typed
//! [`GenerationError`]. Callers never propagate that error; they render
//! [`diagnostic`] into the report in place of the missing text.
//!
//! [`HttpGenerator`] speaks two wire formats:
//!
//! | `generation.format` | Request | Completion read from |
//! |---------------------|---------|----------------------|
//! | `completion` | `{prompt, max_tokens, temperature}` | `text`, `response` or `choices[0].text` |
//! | `chat` | `{model, messages, max_tokens, temperature}` | `choices[0].message.content` |
//!
//! Status mapping: 401/403 → `Auth`, 404 → `ModelNotFound`, 405/501 or a
//! body saying "not supported" → `Unsupported`, 429 → `RateLimited`
//! (retried with backoff first), other 5xx and connection errors retried
//! then reported as `Http`, any other status → `Failed`.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GenerationConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("text generation endpoint is not configured")]
    NotConfigured,

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("operation not supported by the endpoint: {0}")]
    Unsupported(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("endpoint returned an empty completion")]
    EmptyCompletion,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{0}")]
    Failed(String),
}

impl GenerationError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited(_) | GenerationError::Http(_)
        )
    }
}

/// User-visible text shown in place of a failed generation.
pub fn diagnostic(err: &GenerationError) -> String {
    format!("LLM generation failed: {}", err)
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationParams {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            temperature: 0.7,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;
}

/// Build the generator described by `config`: HTTP when an endpoint is
/// set, [`DisabledGenerator`] otherwise.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    match &config.endpoint {
        Some(endpoint) if !endpoint.trim().is_empty() => {
            Ok(Arc::new(HttpGenerator::new(endpoint, config)?))
        }
        _ => {
            warn!("generation.endpoint not set, insights will carry diagnostics");
            Ok(Arc::new(DisabledGenerator))
        }
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::NotConfigured)
    }
}

// ============ HTTP ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Completion,
    Chat,
}

pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
    format: WireFormat,
    timeout_secs: u64,
    max_retries: u32,
}

impl HttpGenerator {
    pub fn new(endpoint: &str, config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let format = match config.format.as_str() {
            "chat" => WireFormat::Chat,
            _ => WireFormat::Completion,
        };
        Ok(Self {
            client,
            endpoint: endpoint.trim().to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            format,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &str, params: &GenerationParams) -> serde_json::Value {
        match self.format {
            WireFormat::Completion => {
                let mut body = serde_json::json!({
                    "prompt": prompt,
                    "max_tokens": params.max_tokens,
                    "temperature": params.temperature,
                });
                if let Some(model) = &self.model {
                    body["model"] = serde_json::json!(model);
                }
                body
            }
            WireFormat::Chat => serde_json::json!({
                "model": self.model.as_deref().unwrap_or("default"),
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
            }),
        }
    }

    async fn attempt(&self, body: &serde_json::Value) -> Result<String, GenerationError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout_secs)
            } else {
                GenerationError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout_secs)
            } else {
                GenerationError::Http(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Malformed(format!("invalid JSON: {}", e)))?;
        let completion = extract_completion(&json, self.format)?;
        let completion = completion.trim();
        if completion.is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }
        Ok(completion.to_string())
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let body = self.request_body(prompt, params);
        let mut attempt = 0;
        loop {
            match self.attempt(&body).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                    debug!(attempt, ?delay, error = %e, "retrying generation");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn classify_status(status: u16, body: &str) -> GenerationError {
    let snippet: String = body.chars().take(200).collect();
    let lower = body.to_lowercase();
    match status {
        401 | 403 => GenerationError::Auth(format!("HTTP {}", status)),
        404 => GenerationError::ModelNotFound(snippet),
        405 | 501 => GenerationError::Unsupported(snippet),
        _ if lower.contains("not supported") || lower.contains("unsupported") => {
            GenerationError::Unsupported(snippet)
        }
        429 => GenerationError::RateLimited(snippet),
        s if (500..600).contains(&s) => GenerationError::Http(format!("HTTP {}: {}", s, snippet)),
        s => GenerationError::Failed(format!("HTTP {}: {}", s, snippet)),
    }
}

fn extract_completion(
    json: &serde_json::Value,
    format: WireFormat,
) -> Result<String, GenerationError> {
    let found = match format {
        WireFormat::Completion => json
            .get("text")
            .or_else(|| json.get("response"))
            .or_else(|| json.pointer("/choices/0/text"))
            .and_then(|v| v.as_str()),
        WireFormat::Chat => json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str()),
    };
    found
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Malformed("no completion text in response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, format: &str) -> GenerationConfig {
        GenerationConfig {
            endpoint: Some(format!("{}/generate", server.uri())),
            format: format.to_string(),
            api_key: Some("secret".to_string()),
            max_retries: 1,
            timeout_secs: 2,
            ..GenerationConfig::default()
        }
    }

    async fn generate_with(server: &MockServer, format: &str) -> Result<String, GenerationError> {
        let generator = create_generator(&config(server, format)).unwrap();
        generator.generate("hi", &GenerationParams::default()).await
    }

    async fn respond(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_completion_format_variants() {
        for body in [
            serde_json::json!({"text": " Invest in training. "}),
            serde_json::json!({"response": "Invest in training."}),
            serde_json::json!({"choices": [{"text": "Invest in training."}]}),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/generate"))
                .and(header("authorization", "Bearer secret"))
                .and(body_partial_json(serde_json::json!({"prompt": "hi", "max_tokens": 300})))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&server)
                .await;
            assert_eq!(
                generate_with(&server, "completion").await.unwrap(),
                "Invest in training."
            );
        }
    }

    #[tokio::test]
    async fn test_chat_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(body_partial_json(
                serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Start small."}}]
            })))
            .mount(&server)
            .await;
        assert_eq!(generate_with(&server, "chat").await.unwrap(), "Start small.");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (401u16, "", "auth"),
            (404, "no such model", "not_found"),
            (501, "", "unsupported"),
            (400, "streaming is not supported", "unsupported"),
            (418, "teapot", "failed"),
        ];
        for (status, body, expected) in cases {
            let server = MockServer::start().await;
            respond(&server, ResponseTemplate::new(status).set_body_string(body)).await;
            let err = generate_with(&server, "completion").await.unwrap_err();
            let kind = match err {
                GenerationError::Auth(_) => "auth",
                GenerationError::ModelNotFound(_) => "not_found",
                GenerationError::Unsupported(_) => "unsupported",
                GenerationError::Failed(_) => "failed",
                other => panic!("unexpected {:?}", other),
            };
            assert_eq!(kind, expected, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(2)
            .mount(&server)
            .await;
        let err = generate_with(&server, "completion").await.unwrap_err();
        assert!(matches!(err, GenerationError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_empty_and_malformed() {
        let server = MockServer::start().await;
        respond(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "   "})),
        )
        .await;
        assert_eq!(
            generate_with(&server, "completion").await.unwrap_err(),
            GenerationError::EmptyCompletion
        );

        let server = MockServer::start().await;
        respond(&server, ResponseTemplate::new(200).set_body_string("<html>")).await;
        assert!(matches!(
            generate_with(&server, "completion").await.unwrap_err(),
            GenerationError::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        respond(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"text": "late"}))
                .set_delay(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(
            generate_with(&server, "completion").await.unwrap_err(),
            GenerationError::Timeout(2)
        );
    }

    #[tokio::test]
    async fn test_disabled_without_endpoint() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        let err = generator
            .generate("hi", &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::NotConfigured);
        assert!(diagnostic(&err).starts_with("LLM generation failed: "));
    }
}
