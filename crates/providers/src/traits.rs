use lq_domain::chat::{PromptMessage, Role};
use lq_domain::error::Result;
use lq_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use lq_domain::tool::{ToolCall, ToolDescriptor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One message on the wire to a backend.
///
/// Plain prompt messages come from the context assembler; the other two
/// variants exist only inside the tool loop, where the model's tool calls and
/// their results are fed back in.
#[derive(Debug, Clone)]
pub enum ChatMessage {
    Prompt(PromptMessage),
    /// An assistant turn that requested tool calls (text may be empty).
    AssistantToolCalls {
        content: String,
        calls: Vec<ToolCall>,
    },
    /// The result of one tool call, answered back to the model.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

impl From<PromptMessage> for ChatMessage {
    fn from(msg: PromptMessage) -> Self {
        ChatMessage::Prompt(msg)
    }
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage::Prompt(PromptMessage::system(text))
    }
    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::Prompt(PromptMessage::user(text))
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        ChatMessage::Prompt(PromptMessage::assistant(text))
    }

    /// Whether this is a plain system prompt message.
    pub fn is_system(&self) -> bool {
        matches!(self, ChatMessage::Prompt(p) if p.role == Role::System)
    }
}

/// Whether the model may, must, or must not call tools on this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    /// The model must call at least one tool.
    Required,
    /// No tools are attached.
    None,
}

/// A backend-agnostic generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Model name within the backend's catalog (not the full specifier).
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: ToolChoice,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A backend-agnostic generation response.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Textual content of the response.
    pub content: String,
    /// Tool calls the model requested, if any.
    pub tool_calls: Vec<ToolCall>,
    /// The backend's stop reason, translated into the closed set.
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
    /// Warnings collected while translating the request (dropped content
    /// kinds, hoisted system messages, ...).
    pub warnings: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every backend adapter implements.
///
/// `stream` must uphold the event ordering invariant (one `StreamStart`,
/// deltas, one `Finish`). Adapters whose transport cannot stream return a
/// config error from `stream` and rely on the registry wrapping them in
/// [`crate::emulate::BufferedStream`].
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run one synchronous generation and wait for the full response.
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse>;

    /// Run one generation and return the event stream.
    async fn stream(&self, req: &GenerateRequest)
        -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Stable identifier of this backend instance (the provider id).
    fn provider_id(&self) -> &str;
}

/// Collect every event of a stream into a vec (test helper used across
/// crates, hence not `cfg(test)`).
pub async fn collect_events(
    mut stream: BoxStream<'static, Result<StreamEvent>>,
) -> Vec<Result<StreamEvent>> {
    use futures_util::StreamExt;
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}
