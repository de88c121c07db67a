//! Deterministic context assembler.
//!
//! Pure function over pre-read inputs: given ordered thread history, an
//! optional summary, and a token budget, produce the ordered message list for
//! a model call plus a machine-readable report of what was kept and dropped.
//!
//! Inclusion-over-exclusion policy: system and pinned messages are never
//! dropped, whatever the budget. Only the non-pinned tail is trimmed, oldest
//! first — most recent context wins over older context.

use lq_domain::chat::{PromptMessage, Role, StoredMessage};

use crate::estimate::estimate_tokens;

/// The assembled prompt plus accounting for observability.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub messages: Vec<PromptMessage>,
    /// Estimated tokens of everything included.
    pub estimated_tokens: usize,
    /// Non-pinned messages dropped from the oldest end.
    pub dropped: usize,
}

/// Budget-bounded prompt builder.
pub struct ContextAssembler {
    pub token_budget: usize,
    pub headroom: usize,
}

impl ContextAssembler {
    pub fn new(token_budget: usize, headroom: usize) -> Self {
        Self {
            token_budget,
            headroom,
        }
    }

    /// Assemble the prompt for one model call.
    ///
    /// Emits, in order: all system messages, then (if present) one synthetic
    /// system message embedding the summary, then pinned messages in original
    /// order, then the budget-fitted tail in chronological order.
    pub fn assemble(&self, history: &[StoredMessage], summary: Option<&str>) -> AssembledContext {
        let mut system: Vec<&StoredMessage> = Vec::new();
        let mut pinned: Vec<&StoredMessage> = Vec::new();
        let mut non_pinned: Vec<&StoredMessage> = Vec::new();

        for msg in history {
            if msg.role == Role::System {
                system.push(msg);
            } else if msg.pinned {
                pinned.push(msg);
            } else {
                non_pinned.push(msg);
            }
        }

        let summary_cost = summary.map(estimate_tokens).unwrap_or(0);
        let pinned_cost: usize = pinned.iter().map(|m| estimate_tokens(&m.content)).sum();
        let remaining = self
            .token_budget
            .saturating_sub(summary_cost)
            .saturating_sub(pinned_cost)
            .saturating_sub(self.headroom);

        // Walk the non-pinned tail from most recent to oldest, stopping at
        // the first message that would exceed the remaining budget.
        let mut tail_start = non_pinned.len();
        let mut tail_cost = 0usize;
        for (idx, msg) in non_pinned.iter().enumerate().rev() {
            let cost = estimate_tokens(&msg.content);
            if tail_cost + cost > remaining {
                break;
            }
            tail_cost += cost;
            tail_start = idx;
        }
        let dropped = tail_start;

        let mut messages: Vec<PromptMessage> = Vec::new();
        let mut estimated = tail_cost + pinned_cost + summary_cost;

        for msg in &system {
            estimated += estimate_tokens(&msg.content);
            messages.push(msg.prompt_message());
        }
        if let Some(summary_text) = summary {
            messages.push(PromptMessage::system(format!(
                "Summary of the conversation so far:\n{summary_text}"
            )));
        }
        for msg in &pinned {
            messages.push(msg.prompt_message());
        }
        for msg in &non_pinned[tail_start..] {
            messages.push(msg.prompt_message());
        }

        if dropped > 0 {
            tracing::debug!(
                dropped,
                kept = non_pinned.len() - dropped,
                budget = self.token_budget,
                "trimmed context tail"
            );
        }

        AssembledContext {
            messages,
            estimated_tokens: estimated,
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lq_domain::chat::Thread;
    use uuid::Uuid;

    fn msg(thread_id: Uuid, role: Role, content: &str) -> StoredMessage {
        StoredMessage::new(thread_id, role, content)
    }

    fn pinned_msg(thread_id: Uuid, content: &str) -> StoredMessage {
        let mut m = msg(thread_id, Role::User, content);
        m.pinned = true;
        m
    }

    fn turn_history(thread_id: Uuid, turns: usize, words_per_msg: usize) -> Vec<StoredMessage> {
        let body = "word ".repeat(words_per_msg);
        (0..turns)
            .flat_map(|i| {
                vec![
                    msg(thread_id, Role::User, &format!("q{i}: {body}")),
                    msg(thread_id, Role::Assistant, &format!("a{i}: {body}")),
                ]
            })
            .collect()
    }

    #[test]
    fn empty_history_yields_nothing() {
        let assembler = ContextAssembler::new(3200, 128);
        let out = assembler.assemble(&[], None);
        assert!(out.messages.is_empty());
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn empty_history_with_summary_yields_summary_only() {
        let assembler = ContextAssembler::new(3200, 128);
        let out = assembler.assemble(&[], Some("prior discussion"));
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, Role::System);
        assert!(out.messages[0].content.contains("prior discussion"));
    }

    #[test]
    fn system_message_survives_tiny_budget() {
        let thread = Thread::new("t");
        let mut history = vec![msg(thread.id, Role::System, "be terse")];
        history.extend(turn_history(thread.id, 10, 50));

        let assembler = ContextAssembler::new(10, 5);
        let out = assembler.assemble(&history, None);
        assert_eq!(out.messages[0].content, "be terse");
        // Budget is too small for any tail.
        assert_eq!(out.messages.len(), 1);
    }

    #[test]
    fn pinned_never_dropped_even_over_budget() {
        let thread = Thread::new("t");
        let big = "word ".repeat(500);
        let history = vec![
            pinned_msg(thread.id, &big),
            pinned_msg(thread.id, &big),
            msg(thread.id, Role::User, "recent question"),
        ];

        let assembler = ContextAssembler::new(100, 10);
        let out = assembler.assemble(&history, None);
        // Both pinned messages included, tail empty.
        assert_eq!(out.messages.len(), 2);
        assert!(out.messages.iter().all(|m| m.content == big));
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn tail_trims_oldest_first() {
        let thread = Thread::new("t");
        // 40 turns of ~50 tokens each (~200 chars) against a 3200 budget.
        let history = turn_history(thread.id, 40, 40);

        let assembler = ContextAssembler::new(3200, 128);
        let out = assembler.assemble(&history, None);

        assert!(out.dropped > 0, "expected oldest turns to be trimmed");
        // Newest message always present.
        assert!(out
            .messages
            .last()
            .unwrap()
            .content
            .starts_with("a39"));
        // Oldest message trimmed.
        assert!(!out.messages.iter().any(|m| m.content.starts_with("q0")));
        // Kept tail is contiguous and chronological.
        let kept: Vec<&str> = out.messages.iter().map(|m| m.content.as_str()).collect();
        let mut sorted = kept.clone();
        sorted.sort_by_key(|c| {
            history
                .iter()
                .position(|h| h.content == *c)
                .unwrap_or(usize::MAX)
        });
        assert_eq!(kept, sorted);
    }

    #[test]
    fn ordering_is_system_summary_pinned_tail() {
        let thread = Thread::new("t");
        let history = vec![
            msg(thread.id, Role::User, "first question"),
            pinned_msg(thread.id, "pinned note"),
            msg(thread.id, Role::System, "be terse"),
            msg(thread.id, Role::Assistant, "first answer"),
        ];

        let assembler = ContextAssembler::new(3200, 128);
        let out = assembler.assemble(&history, Some("the summary"));
        let contents: Vec<&str> = out.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[0], "be terse");
        assert!(contents[1].contains("the summary"));
        assert_eq!(contents[2], "pinned note");
        assert_eq!(contents[3], "first question");
        assert_eq!(contents[4], "first answer");
    }

    #[test]
    fn budget_invariant_holds_for_fitting_pinned_and_summary() {
        let thread = Thread::new("t");
        let history = vec![
            pinned_msg(thread.id, "keep me around"),
            msg(thread.id, Role::User, "hello"),
        ];
        let assembler = ContextAssembler::new(3200, 128);
        let out = assembler.assemble(&history, Some("short summary"));
        assert!(out.messages.iter().any(|m| m.content == "keep me around"));
        assert!(out
            .messages
            .iter()
            .any(|m| m.content.contains("short summary")));
    }
}
