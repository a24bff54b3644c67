// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Anthropic Messages API client for the metered AI features.

use crate::error::{AppError, Provider};
use crate::services::retry::{retry_transient, DEFAULT_ATTEMPTS};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const MAX_TOKENS_CAP: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

/// Assistant reply with token accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub text: String,
    pub stop_reason: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, "https://api.anthropic.com".to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }

    pub fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.clamp(1, MAX_TOKENS_CAP),
            "messages": request.messages,
        });
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = Value::String(system.to_string());
        }
        body
    }

    /// Send a conversation and return the assistant reply.
    ///
    /// Generation has no side effects on our state, so transient failures
    /// (network, 429, 5xx, overload) are retried with bounded backoff.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AppError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(request);

        let http = &self.http;
        let api_key = self.api_key.as_str();
        let (url, body) = (url.as_str(), &body);

        let response: Value = retry_transient("anthropic_messages", DEFAULT_ATTEMPTS, move || async move {
            let response = http
                .post(url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(body)
                .send()
                .await
                .map_err(|e| AppError::from_transport(Provider::Anthropic, e))?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(AppError::from_status(Provider::Anthropic, status, &text));
            }

            response
                .json()
                .await
                .map_err(|e| AppError::upstream(Provider::Anthropic, format!("JSON parse error: {}", e)))
        })
        .await?;

        let completion = parse_response(&response)?;
        tracing::debug!(
            model = %self.model,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            "Completion received"
        );
        Ok(completion)
    }
}

/// Concatenate the text blocks of a Messages API response.
pub fn parse_response(body: &Value) -> Result<Completion, AppError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::upstream(Provider::Anthropic, "response without content"))?;

    let text = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");

    let usage = |key: &str| {
        body.pointer(&format!("/usage/{}", key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    Ok(Completion {
        text,
        stop_reason: body
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(str::to_string),
        input_tokens: usage("input_tokens"),
        output_tokens: usage("output_tokens"),
    })
}
