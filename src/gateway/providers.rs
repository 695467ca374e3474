//! HTTP [`ModelClient`] implementations.
//!
//! Each client sends exactly one request per [`ModelClient::complete`] call
//! and classifies failures:
//!
//! - HTTP 429 → `RateLimitExceeded`
//! - HTTP 401/403 → `Auth`
//! - other HTTP 4xx → `InvalidRequest`
//! - HTTP 5xx, connection errors → `Network`
//! - request timeout → `Timeout`
//! - unreadable body → `Unknown`

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use rag_coder_core::model::{ModelCallError, ModelClient};
use rag_coder_core::models::ErrorKind;

use crate::config::{GatewayConfig, SafetySetting};

const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Map a non-success HTTP status to an [`ErrorKind`].
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        429 => ErrorKind::RateLimitExceeded,
        401 | 403 => ErrorKind::Auth,
        400..=499 => ErrorKind::InvalidRequest,
        500..=599 => ErrorKind::Network,
        _ => ErrorKind::Unknown,
    }
}

/// Map a transport-level reqwest error to an [`ErrorKind`].
pub fn classify_transport(e: &reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        ErrorKind::Timeout
    } else if e.is_connect() || e.is_request() {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    }
}

fn build_http(config: &GatewayConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn require_model(config: &GatewayConfig, provider: &str) -> Result<String> {
    match config.model.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => Ok(m.to_string()),
        _ => bail!("gateway.model required for {} provider", provider),
    }
}

fn require_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{} environment variable not set", var),
    }
}

/// POST `body` and return the decoded JSON, classifying any failure.
async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
    provider: &str,
) -> Result<Value, ModelCallError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| {
            ModelCallError::new(classify_transport(&e), format!("{} request failed: {}", provider, e))
        })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(ModelCallError::new(
            classify_status(status),
            format!("{} API error {}: {}", provider, status, body_text),
        ));
    }

    response.json::<Value>().await.map_err(|e| {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Unknown
        };
        ModelCallError::new(kind, format!("{} returned an unreadable body: {}", provider, e))
    })
}

fn missing(provider: &str, what: &str) -> ModelCallError {
    ModelCallError::new(
        ErrorKind::Unknown,
        format!("Invalid {} response: missing {}", provider, what),
    )
}

// ============ Gemini ============

/// Client for the Gemini `generateContent` endpoint.
///
/// Requires `GOOGLE_API_KEY`.
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    safety_settings: Vec<SafetySetting>,
}

impl GeminiClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            model: require_model(config, "Gemini")?,
            url: config.url.clone().unwrap_or_else(|| GEMINI_URL.to_string()),
            api_key: require_env("GOOGLE_API_KEY")?,
            temperature: config.temperature,
            safety_settings: config.safety_settings.clone(),
        })
    }
}

fn gemini_request_body(prompt: &str, temperature: f32, safety: &[SafetySetting]) -> Value {
    let mut body = serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "temperature": temperature },
    });
    if !safety.is_empty() {
        body["safetySettings"] = safety
            .iter()
            .map(|s| serde_json::json!({ "category": s.category, "threshold": s.threshold }))
            .collect();
    }
    body
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError> {
        let body = gemini_request_body(prompt, self.temperature, &self.safety_settings);
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.url.trim_end_matches('/'),
            self.model
        );
        let request = self
            .http
            .post(endpoint)
            .header("x-goog-api-key", &self.api_key);
        let json = post_json(request, &body, "Gemini").await?;
        parse_gemini_response(&json)
    }
}

fn parse_gemini_response(json: &Value) -> Result<String, ModelCallError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| missing("Gemini", "candidates[0].content.parts"))?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ OpenAI ============

/// Client for the OpenAI chat completions API.
///
/// Requires `OPENAI_API_KEY`.
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
}

impl OpenAIClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            model: require_model(config, "OpenAI")?,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: require_env("OPENAI_API_KEY")?,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
        });
        let request = self
            .http
            .post(format!("{}/v1/chat/completions", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json(request, &body, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &Value) -> Result<String, ModelCallError> {
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing("OpenAI", "choices[0].message.content"))
}

// ============ Ollama ============

/// Client for a local Ollama instance's `/api/generate` endpoint.
pub struct OllamaClient {
    http: reqwest::Client,
    model: String,
    url: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            model: require_model(config, "Ollama")?,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let request = self
            .http
            .post(format!("{}/api/generate", self.url.trim_end_matches('/')));
        let json = post_json(request, &body, "Ollama").await.map_err(|mut e| {
            if e.kind == ErrorKind::Network {
                e.message = format!("{} (is Ollama running at {}?)", e.message, self.url);
            }
            e
        })?;
        json.get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| missing("Ollama", "response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::RateLimitExceeded
        );
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorKind::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorKind::Auth);
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorKind::Network
        );
        assert_eq!(classify_status(StatusCode::MOVED_PERMANENTLY), ErrorKind::Unknown);
    }

    #[test]
    fn gemini_parts_are_concatenated() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "codes: BUG-UI;" },
                { "text": " rationale: crash" }
            ]}}]
        });
        assert_eq!(
            parse_gemini_response(&json).unwrap(),
            "codes: BUG-UI; rationale: crash"
        );
    }

    #[test]
    fn gemini_body_carries_safety_settings() {
        let body = gemini_request_body("p", 0.0, &[]);
        assert!(body.get("safetySettings").is_none());

        let safety = vec![SafetySetting {
            category: "HARM_CATEGORY_HATE_SPEECH".into(),
            threshold: "BLOCK_ONLY_HIGH".into(),
        }];
        let body = gemini_request_body("p", 0.0, &safety);
        assert_eq!(
            body["safetySettings"],
            serde_json::json!([
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_ONLY_HIGH" }
            ])
        );
        assert_eq!(body["contents"][0]["parts"][0]["text"], "p");
    }

    #[test]
    fn gemini_without_candidates_is_unknown() {
        let err = parse_gemini_response(&serde_json::json!({ "promptFeedback": {} })).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
    }

    #[test]
    fn openai_content_extracted() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "codes: NONE" } }]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), "codes: NONE");
    }

    #[test]
    fn ollama_needs_no_key() {
        let config: GatewayConfig =
            toml::from_str("provider = \"ollama\"\nmodel = \"llama3\"\n").unwrap();
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.model_name(), "llama3");
        assert_eq!(client.url, OLLAMA_URL);
    }
}
