//! Cloud model-invocation adapter.
//!
//! The wire format is the managed-cloud invocation envelope: an
//! `anthropic_version` pin, system text hoisted to a top-level field, and
//! message content expressed as typed part arrays (`text`, `tool_use`,
//! `tool_result`). The transport is synchronous only; [`stream`] refuses and
//! the registry layers streaming emulation on top.
//!
//! [`stream`]: CloudInvokeBackend::stream

use std::sync::Arc;

use serde_json::{json, Value};

use crate::token::TokenCache;
use crate::traits::{ChatBackend, ChatMessage, GenerateRequest, GenerateResponse, ToolChoice};
use crate::util;
use lq_domain::error::{Error, Result};
use lq_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use lq_domain::tool::ToolCall;

/// Envelope version pin required by the invocation API.
const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Output cap when the caller does not set one.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct CloudInvokeBackend {
    provider_id: String,
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
}

impl CloudInvokeBackend {
    pub fn new(
        provider_id: String,
        client: reqwest::Client,
        base_url: String,
        tokens: Arc<TokenCache>,
    ) -> Self {
        Self {
            provider_id,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn invoke_url(&self, model: &str) -> String {
        format!("{}/model/{}/invoke", self.base_url, model)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn text_parts(text: &str) -> Value {
    json!([{ "type": "text", "text": text }])
}

fn user_message(text: &str) -> Value {
    json!({ "role": "user", "content": text_parts(text) })
}

fn assistant_message(text: &str) -> Value {
    json!({ "role": "assistant", "content": text_parts(text) })
}

fn assistant_tool_calls_message(content: &str, calls: &[ToolCall]) -> Value {
    let mut parts = Vec::new();
    if !content.is_empty() {
        parts.push(json!({ "type": "text", "text": content }));
    }
    for call in calls {
        parts.push(json!({
            "type": "tool_use",
            "id": call.call_id,
            "name": call.tool_name,
            "input": call.arguments,
        }));
    }
    json!({ "role": "assistant", "content": parts })
}

fn tool_result_message(call_id: &str, content: &str, is_error: bool) -> Value {
    json!({
        "role": "user",
        "content": [{
            "type": "tool_result",
            "tool_use_id": call_id,
            "content": [{ "type": "text", "text": content }],
            "is_error": is_error,
        }]
    })
}

/// Build the invocation body. Returns the body plus warnings about any
/// translation the caller should know of.
pub(crate) fn build_body(req: &GenerateRequest) -> (Value, Vec<String>) {
    let mut warnings = Vec::new();
    let mut system_texts: Vec<&str> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg {
            ChatMessage::Prompt(p) => match p.role {
                lq_domain::chat::Role::System => {
                    if !messages.is_empty() {
                        warnings.push(
                            "system message after conversation start was hoisted to the system field"
                                .to_string(),
                        );
                    }
                    system_texts.push(&p.content);
                }
                lq_domain::chat::Role::User => messages.push(user_message(&p.content)),
                lq_domain::chat::Role::Assistant => {
                    messages.push(assistant_message(&p.content))
                }
            },
            ChatMessage::AssistantToolCalls { content, calls } => {
                messages.push(assistant_tool_calls_message(content, calls));
            }
            ChatMessage::ToolResult {
                call_id,
                content,
                is_error,
                ..
            } => messages.push(tool_result_message(call_id, content, *is_error)),
        }
    }

    let mut body = json!({
        "anthropic_version": ANTHROPIC_VERSION,
        "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });

    if !system_texts.is_empty() {
        body["system"] = Value::String(system_texts.join("\n\n"));
    }
    if let Some(temperature) = req.temperature {
        body["temperature"] = json!(temperature);
    }

    if !req.tools.is_empty() && req.tool_choice != ToolChoice::None {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
        body["tool_choice"] = match req.tool_choice {
            ToolChoice::Required => json!({ "type": "any" }),
            _ => json!({ "type": "auto" }),
        };
    }

    (body, warnings)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") | Some("tool_use") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

pub(crate) fn parse_response(provider: &str, body: &Value) -> Result<GenerateResponse> {
    let parts = body
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Malformed {
            provider: provider.to_string(),
            message: "response has no content array".to_string(),
        })?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        match part.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    content.push_str(text);
                }
            }
            Some("tool_use") => {
                let call_id = part
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let tool_name = part
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Malformed {
                        provider: provider.to_string(),
                        message: "tool_use block has no name".to_string(),
                    })?
                    .to_string();
                let arguments = part.get("input").cloned().unwrap_or(Value::Null);
                tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            other => {
                tracing::debug!(provider, part_type = ?other, "ignoring unknown content part");
            }
        }
    }

    let finish_reason = map_stop_reason(body.get("stop_reason").and_then(|v| v.as_str()));
    let usage = body.get("usage").and_then(|u| {
        let input = u.get("input_tokens")?.as_u64()? as u32;
        let output = u.get("output_tokens")?.as_u64()? as u32;
        Some(Usage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        })
    });

    Ok(GenerateResponse {
        content,
        tool_calls,
        finish_reason,
        usage,
        warnings: Vec::new(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatBackend for CloudInvokeBackend {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let token = self.tokens.token().await?;
        let (body, warnings) = build_body(req);

        tracing::debug!(
            provider = %self.provider_id,
            model = %req.model,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "cloud invoke request"
        );

        let resp = self
            .client
            .post(self.invoke_url(&req.model))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| util::from_reqwest(&self.provider_id, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| util::from_reqwest(&self.provider_id, e))?;
        if !status.is_success() {
            return Err(util::status_error(&self.provider_id, status, &text));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| Error::Malformed {
            provider: self.provider_id.clone(),
            message: format!("response is not JSON: {e}"),
        })?;

        let mut response = parse_response(&self.provider_id, &parsed)?;
        response.warnings = warnings;
        Ok(response)
    }

    async fn stream(
        &self,
        _req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        // The invocation endpoint has no streaming transport. The registry
        // wraps this backend in the buffering decorator, so this is only
        // reachable through a wiring mistake.
        Err(Error::Config(format!(
            "provider '{}' has no native streaming; use the buffered decorator",
            self.provider_id
        )))
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
