//! Provider gateway: backend adapters behind one `generate`/`stream` contract.
//!
//! Two materially different wire protocols are normalized here: a cloud
//! model-invocation envelope (synchronous only, bearer-token auth) and an
//! OpenAI-compatible chat-completions API (native SSE streaming, API-key
//! auth). The registry wraps non-streaming backends in the [`emulate::BufferedStream`]
//! decorator, so callers never learn which backends stream natively.

pub mod cloud_invoke;
pub mod emulate;
pub mod openai_compat;
pub mod registry;
pub mod token;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

pub use registry::{ProviderRegistry, ResolvedModel};
pub use traits::{
    collect_events, ChatBackend, ChatMessage, GenerateRequest, GenerateResponse, ToolChoice,
};
