//! Messages, threads, model specifiers, and summaries.
//!
//! `StoredMessage` and `Thread` are owned by the storage collaborator; the
//! engine treats them as read-only values plus the counters/pin flag it may
//! ask the store to update. `PromptMessage` is the normalized unit handed to
//! a provider — downstream components never read raw thread history directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// The normalized unit passed to a provider backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// A persisted chat message, owned by the storage collaborator.
///
/// Immutable once persisted except for `pinned` and the optional structured
/// `payload` attached later (e.g. a ticket/task breakdown).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Build a fresh message for insertion into a thread.
    pub fn new(thread_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            role,
            content: content.into(),
            pinned: false,
            payload: None,
            created_at: Utc::now(),
        }
    }

    pub fn prompt_message(&self) -> PromptMessage {
        PromptMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A conversation thread with its running counters.
///
/// `turn_count` and `token_estimate` are updated by the facade after each
/// completed generation; they never decrease and are the sole inputs to the
/// summarization trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub summary_text: Option<String>,
    #[serde(default)]
    pub summary_model: Option<String>,
    #[serde(default)]
    pub summary_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub token_estimate: u32,
}

impl Thread {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            summary_text: None,
            summary_model: None,
            summary_updated_at: None,
            turn_count: 0,
            token_estimate: 0,
        }
    }
}

/// A structured thread summary produced by the summarizer.
///
/// Citations are message-id strings; the summarizer filters out ids that were
/// not part of its input before the summary is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub narrative: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub todos: Vec<String>,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// A `provider:model` pair resolved at call time.
///
/// A specifier is valid only if the named provider is known and the model is
/// present and enabled in that provider's static catalog — validation happens
/// in the provider registry, not here; this type only enforces the shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelSpecifier {
    pub provider: String,
    pub model: String,
}

impl ModelSpecifier {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn parse(spec: &str) -> Result<Self> {
        match spec.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok(Self {
                provider: provider.to_string(),
                model: model.to_string(),
            }),
            _ => Err(Error::Config(format!(
                "invalid model specifier '{spec}': expected 'provider:model'"
            ))),
        }
    }
}

impl std::str::FromStr for ModelSpecifier {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ModelSpecifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl TryFrom<String> for ModelSpecifier {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ModelSpecifier> for String {
    fn from(spec: ModelSpecifier) -> Self {
        spec.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specifier_parses_provider_and_model() {
        let spec = ModelSpecifier::parse("openai:gpt-4o").unwrap();
        assert_eq!(spec.provider, "openai");
        assert_eq!(spec.model, "gpt-4o");
        assert_eq!(spec.to_string(), "openai:gpt-4o");
    }

    #[test]
    fn specifier_rejects_bad_shapes() {
        assert!(ModelSpecifier::parse("no-colon").is_err());
        assert!(ModelSpecifier::parse(":model").is_err());
        assert!(ModelSpecifier::parse("provider:").is_err());
        assert!(ModelSpecifier::parse("").is_err());
    }

    #[test]
    fn specifier_keeps_colons_in_model_name() {
        // Only the first colon splits; model names may contain more.
        let spec = ModelSpecifier::parse("cloud:anthropic.claude-3:v2").unwrap();
        assert_eq!(spec.provider, "cloud");
        assert_eq!(spec.model, "anthropic.claude-3:v2");
    }

    #[test]
    fn stored_message_starts_unpinned() {
        let thread = Thread::new("test");
        let msg = StoredMessage::new(thread.id, Role::User, "hello");
        assert!(!msg.pinned);
        assert!(msg.payload.is_none());
        assert_eq!(msg.thread_id, thread.id);
    }

    #[test]
    fn summary_deserializes_with_missing_lists() {
        let summary: Summary =
            serde_json::from_str(r#"{"narrative": "we discussed widgets"}"#).unwrap();
        assert_eq!(summary.narrative, "we discussed widgets");
        assert!(summary.highlights.is_empty());
        assert!(summary.citations.is_empty());
    }
}
