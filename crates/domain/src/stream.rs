use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for streaming generation responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during a streaming generation call (backend-agnostic).
///
/// Ordering invariant: every call emits exactly one `StreamStart` first,
/// then zero-or-more `TextDelta`, then exactly one `Finish` last — no matter
/// which backend produced the result, and no matter whether streaming is
/// native or emulated.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// The stream has opened. Carries warnings collected while translating
    /// the request (e.g. content parts the backend does not support).
    #[serde(rename = "stream-start")]
    StreamStart { warnings: Vec<String> },

    /// An incremental text fragment.
    #[serde(rename = "text-delta")]
    TextDelta { id: String, text: String },

    /// The stream is finished.
    #[serde(rename = "finish")]
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

/// Why the model stopped generating.
///
/// Every backend's stop-reason vocabulary is translated into this closed set
/// by its adapter; anything unrecognized maps to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other,
}

/// Token usage for one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate usage across the steps of a multi-step generation.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}
