//! Default OpenAI-compatible HTTP client.

use super::{
    ChatRequest, ChatResponse, EndpointVariant, FileSearchRequest, FileSearchResponse, LlmClient,
};
use crate::types::TokenUsage;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

const OFFICIAL_HOST: &str = "api.openai.com";

/// Chat-completions client for OpenAI-compatible endpoints.
///
/// Minimal production-friendly defaults (env-overridable). A hung call is
/// bounded by the request timeout; there is no other cancellation primitive
/// in the pipeline.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let timeout_secs = env::var("GUARDRAILS_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: env::var("OPENAI_API_KEY").ok(),
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !status.is_success() {
            // Provider error bodies carry the classification string
            // ("content_filter" among them) that the runner keys on.
            let message = payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            let code = payload
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(Error::Transport(format!(
                "HTTP {}: {} {}",
                status.as_u16(),
                code,
                message
            )));
        }

        Ok(payload)
    }
}

fn parse_usage(payload: &Value) -> Option<TokenUsage> {
    let usage = payload.get("usage")?;
    Some(TokenUsage::available(
        usage.get("prompt_tokens").and_then(Value::as_u64)?,
        usage.get("completion_tokens").and_then(Value::as_u64)?,
        usage.get("total_tokens").and_then(Value::as_u64)?,
    ))
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat_json(&self, request: ChatRequest) -> Result<ChatResponse> {
        let payload = self
            .post_json("/chat/completions", &serde_json::to_value(&request)?)
            .await?;

        let content = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.pointer("/message/content"))
            .and_then(Value::as_str)
            .map(String::from);

        Ok(ChatResponse {
            content,
            usage: parse_usage(&payload),
        })
    }

    async fn file_search(&self, request: FileSearchRequest) -> Result<FileSearchResponse> {
        let body = json!({
            "model": request.model,
            "input": request.input,
            "tools": [{
                "type": "file_search",
                "vector_store_ids": [request.vector_store_id],
            }],
        });
        let payload = self.post_json("/responses", &body).await?;

        let output_text = payload
            .get("output_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(FileSearchResponse {
            output_text,
            usage: parse_usage(&payload),
        })
    }

    fn endpoint_variant(&self) -> EndpointVariant {
        // Base-URL heuristic: official host gets the safety identifier,
        // known alternative-cloud variants and local/compatible hosts do not.
        let host = url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase));
        match host.as_deref() {
            Some(h) if h == OFFICIAL_HOST || h.ends_with(".api.openai.com") => {
                EndpointVariant::Official
            }
            Some(h) if h.contains("azure") => EndpointVariant::AlternativeCloud,
            _ => EndpointVariant::Compatible,
        }
    }
}
