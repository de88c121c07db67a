//! OpenAI-compatible chat-completions adapter.
//!
//! Flat string message content, function-style tool declarations, and native
//! SSE streaming terminated by a `[DONE]` sentinel.

use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::sse::SseParser;
use crate::traits::{ChatBackend, ChatMessage, GenerateRequest, GenerateResponse, ToolChoice};
use crate::util;
use lq_domain::error::{Error, Result};
use lq_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use lq_domain::tool::ToolCall;

pub struct OpenAiCompatBackend {
    provider_id: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatBackend {
    pub fn new(
        provider_id: String,
        client: reqwest::Client,
        base_url: String,
        api_key: String,
    ) -> Self {
        Self {
            provider_id,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post_completions(&self, body: &Value) -> Result<reqwest::Response> {
        self.client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| util::from_reqwest(&self.provider_id, e))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn wire_message(msg: &ChatMessage) -> Value {
    match msg {
        ChatMessage::Prompt(p) => json!({
            "role": p.role,
            "content": p.content,
        }),
        ChatMessage::AssistantToolCalls { content, calls } => {
            let tool_calls: Vec<Value> = calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.call_id,
                        "type": "function",
                        "function": {
                            "name": c.tool_name,
                            // Arguments travel as a JSON string on this API.
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let mut value = json!({ "role": "assistant", "tool_calls": tool_calls });
            if !content.is_empty() {
                value["content"] = Value::String(content.clone());
            }
            value
        }
        ChatMessage::ToolResult {
            call_id, content, ..
        } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }),
    }
}

pub(crate) fn build_body(req: &GenerateRequest, stream: bool) -> Value {
    let messages: Vec<Value> = req.messages.iter().map(wire_message).collect();

    let mut body = json!({
        "model": req.model,
        "messages": messages,
    });

    if let Some(temperature) = req.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = req.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    if !req.tools.is_empty() && req.tool_choice != ToolChoice::None {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
        if req.tool_choice == ToolChoice::Required {
            body["tool_choice"] = json!("required");
        }
    }

    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }

    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") | Some("tool_calls") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    let input = usage.get("prompt_tokens")?.as_u64()? as u32;
    let output = usage.get("completion_tokens")?.as_u64()? as u32;
    let total = usage
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(input + output);
    Some(Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: total,
    })
}

pub(crate) fn parse_response(provider: &str, body: &Value) -> Result<GenerateResponse> {
    let choice = body
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| Error::Malformed {
            provider: provider.to_string(),
            message: "response has no choices".to_string(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Malformed {
        provider: provider.to_string(),
        message: "choice has no message".to_string(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(raw_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for raw in raw_calls {
            let function = raw.get("function").ok_or_else(|| Error::Malformed {
                provider: provider.to_string(),
                message: "tool call has no function".to_string(),
            })?;
            let tool_name = function
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Malformed {
                    provider: provider.to_string(),
                    message: "tool call has no name".to_string(),
                })?
                .to_string();
            let raw_args = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let arguments: Value = serde_json::from_str(raw_args).unwrap_or_else(|e| {
                tracing::warn!(provider, tool = %tool_name, error = %e, "tool arguments are not JSON, passing raw string");
                Value::String(raw_args.to_string())
            });
            tool_calls.push(ToolCall {
                call_id: raw
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                tool_name,
                arguments,
            });
        }
    }

    let finish_reason =
        map_finish_reason(choice.get("finish_reason").and_then(|v| v.as_str()));

    Ok(GenerateResponse {
        content,
        tool_calls,
        finish_reason,
        usage: parse_usage(body),
        warnings: Vec::new(),
    })
}

/// What one SSE payload of the stream contributes.
#[derive(Debug, PartialEq)]
pub(crate) enum StreamChunk {
    Delta(String),
    Finish(FinishReason),
    Usage(Usage),
    Done,
    Noop,
}

pub(crate) fn parse_stream_payload(payload: &str) -> Result<StreamChunk> {
    if payload.trim() == "[DONE]" {
        return Ok(StreamChunk::Done);
    }

    let value: Value = serde_json::from_str(payload).map_err(|e| Error::Malformed {
        provider: "openai-compat".to_string(),
        message: format!("stream chunk is not JSON: {e}"),
    })?;

    let Some(choice) = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
    else {
        // The final usage chunk carries an empty choices array.
        if let Some(usage) = parse_usage(&value) {
            return Ok(StreamChunk::Usage(usage));
        }
        return Ok(StreamChunk::Noop);
    };

    if let Some(text) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
    {
        if !text.is_empty() {
            return Ok(StreamChunk::Delta(text.to_string()));
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
        return Ok(StreamChunk::Finish(map_finish_reason(Some(reason))));
    }

    Ok(StreamChunk::Noop)
}

/// Turn a raw SSE byte-chunk stream into the start/delta/finish envelope.
///
/// Separated from the HTTP call so the event bookkeeping can be driven with
/// scripted chunks in tests.
fn event_stream(
    provider: String,
    mut chunks: BoxStream<'static, Result<Vec<u8>>>,
) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::try_stream! {
        yield StreamEvent::StreamStart { warnings: Vec::new() };

        let mut parser = SseParser::new();
        let mut delta_seq = 0u64;
        let mut finish_reason: Option<FinishReason> = None;
        let mut usage: Option<Usage> = None;
        let mut done = false;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            for payload in parser.push_bytes(&chunk) {
                match parse_stream_payload(&payload)? {
                    StreamChunk::Delta(text) => {
                        let id = delta_seq.to_string();
                        delta_seq += 1;
                        yield StreamEvent::TextDelta { id, text };
                    }
                    StreamChunk::Finish(reason) => finish_reason = Some(reason),
                    StreamChunk::Usage(u) => usage = Some(u),
                    StreamChunk::Done => {
                        done = true;
                        break;
                    }
                    StreamChunk::Noop => {}
                }
            }
            if done {
                break;
            }
        }

        if !done && finish_reason.is_none() {
            tracing::warn!(provider = %provider, "stream ended without finish marker");
        }
        yield StreamEvent::Finish {
            reason: finish_reason.unwrap_or(FinishReason::Other),
            usage,
        };
    };
    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatBackend for OpenAiCompatBackend {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let body = build_body(req, false);

        tracing::debug!(
            provider = %self.provider_id,
            model = %req.model,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "chat completions request"
        );

        let resp = self.post_completions(&body).await?;
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
        parse_response(&self.provider_id, &parsed)
    }

    async fn stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = build_body(req, true);
        let provider = self.provider_id.clone();

        let resp = self.post_completions(&body).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .map_err(|e| util::from_reqwest(&provider, e))?;
            return Err(util::status_error(&provider, status, &text));
        }

        let err_provider = provider.clone();
        let chunks = resp
            .bytes_stream()
            .map(move |r| {
                r.map(|b| b.to_vec())
                    .map_err(|e| util::from_reqwest(&err_provider, e))
            });
        Ok(event_stream(provider, Box::pin(chunks)))
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
