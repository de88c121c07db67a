//! Structured thread summarization.
//!
//! Produces the five-field [`Summary`] from a thread's messages via one model
//! call. The summarizer never truncates its input (pinned messages are always
//! part of whatever the caller hands it) and never triggers itself — the
//! facade owns the trigger policy.

use std::collections::HashSet;

use lq_domain::chat::{StoredMessage, Summary};
use lq_domain::config::SummarizeConfig;
use lq_domain::error::{Error, Result};
use lq_providers::{ChatBackend, ChatMessage, GenerateRequest, ToolChoice};

const SUMMARY_INSTRUCTIONS: &str = "\
You summarize a conversation thread. Reply with a single JSON object and \
nothing else, using exactly these fields:
{
  \"narrative\": \"one-paragraph prose summary\",
  \"highlights\": [\"notable moments\"],
  \"facts\": [\"stable facts worth remembering\"],
  \"todos\": [\"open action items\"],
  \"citations\": [\"message ids from the transcript that support the above\"]
}
Cite only message ids that appear in the transcript.";

const SUMMARY_MAX_TOKENS: u32 = 800;

/// Facade-owned trigger: summarize when either running counter crosses its
/// threshold.
pub fn should_summarize(token_estimate: u32, turn_count: u32, config: &SummarizeConfig) -> bool {
    token_estimate > config.token_threshold || turn_count > config.turn_threshold
}

/// Summarize a thread with one model call.
pub async fn summarize(
    backend: &dyn ChatBackend,
    model: &str,
    title: &str,
    messages: &[StoredMessage],
) -> Result<Summary> {
    let transcript = render_transcript(title, messages);
    let request = GenerateRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(SUMMARY_INSTRUCTIONS),
            ChatMessage::user(transcript),
        ],
        tool_choice: ToolChoice::None,
        max_tokens: Some(SUMMARY_MAX_TOKENS),
        ..Default::default()
    };

    let response = backend.generate(&request).await?;

    let valid_ids: HashSet<String> = messages.iter().map(|m| m.id.to_string()).collect();
    parse_summary(backend.provider_id(), &response.content, &valid_ids)
}

fn render_transcript(title: &str, messages: &[StoredMessage]) -> String {
    let mut out = format!("Thread: {title}\n\n");
    for msg in messages {
        let pin = if msg.pinned { " (pinned)" } else { "" };
        out.push_str(&format!(
            "[{}] {:?}{}: {}\n",
            msg.id, msg.role, pin, msg.content
        ));
    }
    out
}

/// Parse the model's reply into a [`Summary`], dropping citations that do not
/// reference an input message id.
pub(crate) fn parse_summary(
    provider: &str,
    content: &str,
    valid_ids: &HashSet<String>,
) -> Result<Summary> {
    // Models wrap JSON in prose or code fences often enough to tolerate it.
    let start = content.find('{');
    let end = content.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => {
            return Err(Error::Malformed {
                provider: provider.to_string(),
                message: "summary reply contains no JSON object".to_string(),
            })
        }
    };

    let mut summary: Summary = serde_json::from_str(json).map_err(|e| Error::Malformed {
        provider: provider.to_string(),
        message: format!("summary reply is not the expected shape: {e}"),
    })?;

    summary.citations.retain(|id| {
        let known = valid_ids.contains(id);
        if !known {
            tracing::debug!(citation = %id, "dropping citation to unknown message id");
        }
        known
    });

    Ok(summary)
}
