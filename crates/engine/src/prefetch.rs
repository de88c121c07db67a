//! Best-effort repository prefetch.
//!
//! Given a detected reference, canonicalize the project slug against the
//! "get project" tool, then fetch a compact overview and (when a sub-path was
//! referenced) a bounded file listing. Every step degrades to "no data" on
//! failure; prefetch can only enrich a request, never fail it.

use serde_json::{json, Value};

use crate::reference::RepoReference;
use crate::tools::Tools;
use lq_domain::chat::PromptMessage;

const GET_PROJECT_TOOL: &str = "get_project";
const OVERVIEW_TOOL: &str = "repository_overview";
const LIST_FILES_TOOL: &str = "list_repository_files";

/// Recursive listings are paged; stop after this many pages.
const MAX_LISTING_PAGES: u32 = 3;

/// What a prefetch run produced. Both slots are optional and independent.
#[derive(Debug, Clone, Default)]
pub struct PrefetchResult {
    pub canonical_path: Option<String>,
    pub overview: Option<String>,
    pub listing: Option<String>,
}

impl PrefetchResult {
    /// Render the filled slots as system messages for the prompt.
    pub fn into_messages(self) -> Vec<PromptMessage> {
        let mut messages = Vec::new();
        if let Some(overview) = self.overview {
            messages.push(PromptMessage::system(format!(
                "Repository overview (prefetched):\n{overview}"
            )));
        }
        if let Some(listing) = self.listing {
            messages.push(PromptMessage::system(format!(
                "Repository file listing (prefetched):\n{listing}"
            )));
        }
        messages
    }
}

pub struct Prefetcher<'a> {
    tools: &'a dyn Tools,
}

impl<'a> Prefetcher<'a> {
    pub fn new(tools: &'a dyn Tools) -> Self {
        Self { tools }
    }

    /// Run the full prefetch for one detected reference.
    pub async fn prefetch(&self, reference: &RepoReference) -> PrefetchResult {
        let canonical = self.canonicalize(&reference.project_path).await;

        let overview_fut = self.fetch_overview(&canonical);
        let listing_fut = self.fetch_listing(&canonical, reference);
        // Independent slots: one failing must not cancel the other.
        let (overview, listing) = tokio::join!(overview_fut, listing_fut);

        PrefetchResult {
            canonical_path: Some(canonical),
            overview,
            listing,
        }
    }

    /// Resolve the detected slug to the provider's canonical path.
    ///
    /// The slug is best-effort text: it may include sub-directories or miss a
    /// namespace level. Probe prefixes from longest to shortest (minimum two
    /// segments), strictly sequentially, adopting the first that resolves;
    /// shorter candidates are only meaningful once longer ones have failed.
    pub async fn canonicalize(&self, detected: &str) -> String {
        for candidate in prefix_candidates(detected) {
            match self
                .tools
                .invoke(GET_PROJECT_TOOL, json!({ "project_path": candidate }))
                .await
            {
                Ok(outcome) if !outcome.is_error => {
                    if let Some(path) = canonical_from_response(&outcome.text, &candidate) {
                        if path != detected {
                            tracing::debug!(detected, canonical = %path, "canonicalized project path");
                        }
                        return path;
                    }
                }
                Ok(outcome) => {
                    tracing::debug!(candidate = %candidate, error = %outcome.text, "project lookup rejected candidate");
                }
                Err(e) => {
                    tracing::debug!(candidate = %candidate, error = %e, "project lookup failed");
                }
            }
        }
        detected.to_string()
    }

    async fn fetch_overview(&self, project_path: &str) -> Option<String> {
        match self
            .tools
            .invoke(OVERVIEW_TOOL, json!({ "project_path": project_path }))
            .await
        {
            Ok(outcome) if !outcome.is_error && !outcome.text.is_empty() => Some(outcome.text),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(project_path, error = %e, "overview prefetch failed");
                None
            }
        }
    }

    async fn fetch_listing(
        &self,
        project_path: &str,
        reference: &RepoReference,
    ) -> Option<String> {
        let sub_path = reference.sub_path.as_deref()?;

        let mut args = json!({
            "project_path": project_path,
            "path": sub_path,
            "recursive": true,
            "max_pages": MAX_LISTING_PAGES,
        });
        if let Some(ref_name) = &reference.ref_name {
            args["ref"] = Value::String(ref_name.clone());
        }

        match self.tools.invoke(LIST_FILES_TOOL, args).await {
            Ok(outcome) if !outcome.is_error && !outcome.text.is_empty() => Some(outcome.text),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(project_path, sub_path, error = %e, "listing prefetch failed");
                None
            }
        }
    }
}

/// Path-prefix candidates, longest first, minimum two segments.
fn prefix_candidates(detected: &str) -> Vec<String> {
    let segments: Vec<&str> = detected.split('/').filter(|s| !s.is_empty()).collect();
    let mut candidates = Vec::new();
    for len in (2..=segments.len()).rev() {
        candidates.push(segments[..len].join("/"));
    }
    candidates
}

/// Extract the canonical path from a "get project" response: the response's
/// own path field if present, else the probed candidate when the response
/// carries a numeric project id.
fn canonical_from_response(text: &str, candidate: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    if let Some(path) = value.get("path_with_namespace").and_then(|v| v.as_str()) {
        return Some(path.to_string());
    }
    if value.get("id").map(|v| v.is_number()).unwrap_or(false) {
        return Some(candidate.to_string());
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lq_domain::error::{Error, Result};
    use lq_domain::tool::ToolDescriptor;
    use lq_mcp_client::ToolOutcome;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Scripted tool source: canned responses per (tool, project_path) plus a
    /// recorded invocation log.
    struct FakeTools {
        responses: HashMap<(String, String), Result<ToolOutcome>>,
        log: Mutex<Vec<(String, String)>>,
    }

    impl FakeTools {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                log: Mutex::new(Vec::new()),
            }
        }

        fn respond(mut self, tool: &str, path: &str, outcome: Result<ToolOutcome>) -> Self {
            self.responses
                .insert((tool.to_string(), path.to_string()), outcome);
            self
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.log.lock().clone()
        }
    }

    fn ok_text(text: &str) -> Result<ToolOutcome> {
        Ok(ToolOutcome {
            text: text.to_string(),
            is_error: false,
        })
    }

    fn tool_error(text: &str) -> Result<ToolOutcome> {
        Ok(ToolOutcome {
            text: text.to_string(),
            is_error: true,
        })
    }

    #[async_trait]
    impl Tools for FakeTools {
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            Vec::new()
        }

        async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome> {
            let path = arguments
                .get("project_path")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            self.log.lock().push((name.to_string(), path.clone()));
            match self.responses.get(&(name.to_string(), path)) {
                Some(Ok(outcome)) => Ok(outcome.clone()),
                Some(Err(e)) => Err(Error::Other(e.to_string())),
                None => tool_error("not found"),
            }
        }
    }

    fn reference(path: &str, sub_path: Option<&str>) -> RepoReference {
        RepoReference {
            project_path: path.to_string(),
            ref_name: Some("main".to_string()),
            sub_path: sub_path.map(str::to_string),
        }
    }

    #[test]
    fn candidates_run_longest_to_shortest_with_min_two_segments() {
        assert_eq!(
            prefix_candidates("a/b/c/d"),
            vec!["a/b/c/d", "a/b/c", "a/b"]
        );
        assert_eq!(prefix_candidates("a/b"), vec!["a/b"]);
        assert!(prefix_candidates("lonely").is_empty());
    }

    #[tokio::test]
    async fn canonicalization_short_circuits_on_first_hit() {
        let tools = FakeTools::new()
            .respond(
                GET_PROJECT_TOOL,
                "acme/widgets/src",
                tool_error("404 project not found"),
            )
            .respond(
                GET_PROJECT_TOOL,
                "acme/widgets",
                ok_text(r#"{"id": 42, "path_with_namespace": "acme/widgets"}"#),
            );

        let prefetcher = Prefetcher::new(&tools);
        let canonical = prefetcher.canonicalize("acme/widgets/src").await;
        assert_eq!(canonical, "acme/widgets");

        let calls = tools.calls();
        assert_eq!(
            calls,
            vec![
                (GET_PROJECT_TOOL.to_string(), "acme/widgets/src".to_string()),
                (GET_PROJECT_TOOL.to_string(), "acme/widgets".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn canonicalization_is_idempotent() {
        let tools = FakeTools::new().respond(
            GET_PROJECT_TOOL,
            "acme/widgets",
            ok_text(r#"{"id": 42, "path_with_namespace": "acme/widgets"}"#),
        );
        let prefetcher = Prefetcher::new(&tools);
        assert_eq!(prefetcher.canonicalize("acme/widgets").await, "acme/widgets");
    }

    #[tokio::test]
    async fn canonical_path_comes_from_the_response() {
        // The probed slug differs in case from the provider's canonical path.
        let tools = FakeTools::new().respond(
            GET_PROJECT_TOOL,
            "Acme/Widgets",
            ok_text(r#"{"id": 42, "path_with_namespace": "acme/widgets"}"#),
        );
        let prefetcher = Prefetcher::new(&tools);
        assert_eq!(prefetcher.canonicalize("Acme/Widgets").await, "acme/widgets");
    }

    #[tokio::test]
    async fn unresolvable_slug_falls_back_unmodified() {
        let tools = FakeTools::new();
        let prefetcher = Prefetcher::new(&tools);
        assert_eq!(
            prefetcher.canonicalize("ghost/project/deep").await,
            "ghost/project/deep"
        );
        // All three candidates were probed before giving up.
        assert_eq!(tools.calls().len(), 3);
    }

    #[tokio::test]
    async fn overview_failure_does_not_cancel_listing() {
        let tools = FakeTools::new()
            .respond(
                GET_PROJECT_TOOL,
                "acme/widgets",
                ok_text(r#"{"id": 7, "path_with_namespace": "acme/widgets"}"#),
            )
            .respond(OVERVIEW_TOOL, "acme/widgets", tool_error("rate limited"))
            .respond(
                LIST_FILES_TOOL,
                "acme/widgets",
                ok_text("src/lib.rs\nsrc/main.rs"),
            );

        let prefetcher = Prefetcher::new(&tools);
        let result = prefetcher
            .prefetch(&reference("acme/widgets", Some("src")))
            .await;

        assert!(result.overview.is_none());
        assert_eq!(result.listing.as_deref(), Some("src/lib.rs\nsrc/main.rs"));

        let messages = result.into_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("src/lib.rs"));
    }

    #[tokio::test]
    async fn no_subpath_skips_the_listing_call() {
        let tools = FakeTools::new()
            .respond(
                GET_PROJECT_TOOL,
                "acme/widgets",
                ok_text(r#"{"id": 7, "path_with_namespace": "acme/widgets"}"#),
            )
            .respond(OVERVIEW_TOOL, "acme/widgets", ok_text("A widget factory."));

        let prefetcher = Prefetcher::new(&tools);
        let result = prefetcher.prefetch(&reference("acme/widgets", None)).await;

        assert_eq!(result.overview.as_deref(), Some("A widget factory."));
        assert!(result.listing.is_none());
        assert!(!tools
            .calls()
            .iter()
            .any(|(tool, _)| tool == LIST_FILES_TOOL));
    }

    #[tokio::test]
    async fn fully_failed_prefetch_yields_empty_slots() {
        let tools = FakeTools::new();
        let prefetcher = Prefetcher::new(&tools);
        let result = prefetcher
            .prefetch(&reference("acme/widgets", Some("src")))
            .await;
        assert!(result.overview.is_none());
        assert!(result.listing.is_none());
        assert!(result.into_messages().is_empty());
    }
}
