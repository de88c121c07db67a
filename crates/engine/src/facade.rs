//! Orchestration facade: one entry point per generation request.
//!
//! Composes the assembler, reference detector, prefetcher, provider registry
//! and step loop, relays the event stream to the caller, and on natural
//! completion persists the assistant message, bumps thread counters, and
//! evaluates the summarization trigger. Aborted or failed streams persist
//! nothing.

use std::sync::Arc;

use futures_util::StreamExt;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::generation::stream_generation;
use crate::prefetch::Prefetcher;
use crate::reference::{self, RepoReference};
use crate::stepper::{StepObserver, StepPolicy, TracingObserver};
use crate::storage::{ThreadPatch, ThreadStore};
use crate::summarize;
use crate::tools::{NoTools, Tools};
use lq_context::{estimate_tokens, ContextAssembler};
use lq_domain::chat::{ModelSpecifier, PromptMessage, Role, StoredMessage, Thread};
use lq_domain::config::EngineConfig;
use lq_domain::error::{Error, Result};
use lq_domain::stream::{BoxStream, StreamEvent};
use lq_domain::tool::ToolDescriptor;
use lq_mcp_client::ToolGateway;
use lq_providers::{ChatBackend, ChatMessage, GenerateRequest, ProviderRegistry};

/// Fixed formatting guardrail prepended to every prompt.
const GUARDRAIL: &str = "\
Format responses as concise, well-structured Markdown. Use short paragraphs \
and fenced code blocks with language tags for code. Rely on the provided \
context and tool results; never fabricate repository contents.";

pub struct Engine {
    config: EngineConfig,
    registry: ProviderRegistry,
    tools: Arc<dyn Tools>,
    store: Arc<dyn ThreadStore>,
    observer: Arc<dyn StepObserver>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        registry: ProviderRegistry,
        tools: Arc<dyn Tools>,
        store: Arc<dyn ThreadStore>,
    ) -> Self {
        Self {
            config,
            registry,
            tools,
            store,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Build an engine from config alone: providers from the catalog, tools
    /// from the configured MCP servers (an empty/unreachable set degrades to
    /// no tools).
    pub async fn connect(config: EngineConfig, store: Arc<dyn ThreadStore>) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&config.providers)?;
        let tools: Arc<dyn Tools> = if config.mcp.servers.is_empty() {
            Arc::new(NoTools)
        } else {
            Arc::new(ToolGateway::connect(&config.mcp).await)
        };
        Ok(Self::new(config, registry, tools, store))
    }

    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run one generation for a thread and return the caller-facing event
    /// stream.
    ///
    /// Configuration problems (unknown specifier, missing default model)
    /// surface here, before any network call. Transport and backend errors
    /// arrive as `Err` items on the stream.
    pub async fn respond(
        &self,
        thread_id: Uuid,
        model: Option<ModelSpecifier>,
        cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let thread = self.store.get_thread(thread_id).await?;
        let history = self.store.list_messages(thread_id).await?;

        let spec = self.resolve_specifier(model)?;
        let resolved = self.registry.resolve(&spec)?;

        let assembler = ContextAssembler::new(
            self.config.context.token_budget as usize,
            self.config.context.headroom as usize,
        );
        let assembled = assembler.assemble(&history, thread.summary_text.as_deref());

        let reference = latest_user_message(&history).and_then(|m| reference::detect(&m.content));

        let catalog = self.tools.list_tools();
        let tools_enabled = resolved.model.supports_tools && !catalog.is_empty();

        let prefetch_messages = match (&reference, tools_enabled) {
            (Some(reference), true) => self.run_prefetch(reference).await,
            _ => Vec::new(),
        };

        let messages =
            build_prompt(&catalog, tools_enabled, prefetch_messages, &assembled.messages);

        tracing::info!(
            thread_id = %thread_id,
            model = %spec,
            context_tokens = assembled.estimated_tokens,
            dropped = assembled.dropped,
            tools_enabled,
            reference = reference.is_some(),
            "starting generation"
        );

        let policy = StepPolicy::new(
            &self.config.stepping,
            tools_enabled,
            reference.is_some(),
        );
        let request = GenerateRequest {
            model: spec.model.clone(),
            messages,
            tools: if tools_enabled { catalog } else { Vec::new() },
            ..Default::default()
        };

        // Resolve the summarizer's backend up front so finalization cannot
        // hit a config error.
        let (sum_backend, sum_spec) = self.summarizer_target(&resolved.backend, &spec)?;

        let inner = stream_generation(
            Arc::clone(&resolved.backend),
            request,
            Arc::clone(&self.tools),
            policy,
            Arc::clone(&self.observer),
            cancel.clone(),
        );

        Ok(self.relay_and_finalize(inner, thread, history, sum_backend, sum_spec, cancel))
    }

    fn resolve_specifier(&self, model: Option<ModelSpecifier>) -> Result<ModelSpecifier> {
        match model {
            Some(spec) => Ok(spec),
            None => {
                let default = self.config.default_model.as_deref().ok_or_else(|| {
                    Error::Config("no model specified and no default configured".into())
                })?;
                ModelSpecifier::parse(default)
            }
        }
    }

    /// The backend and model specifier used for summarization: the configured
    /// summarize model if set, else the request's own.
    fn summarizer_target(
        &self,
        request_backend: &Arc<dyn ChatBackend>,
        request_spec: &ModelSpecifier,
    ) -> Result<(Arc<dyn ChatBackend>, ModelSpecifier)> {
        match &self.config.summarize.model {
            Some(raw) => {
                let spec = ModelSpecifier::parse(raw)?;
                let resolved = self.registry.resolve(&spec)?;
                Ok((resolved.backend, spec))
            }
            None => Ok((Arc::clone(request_backend), request_spec.clone())),
        }
    }

    async fn run_prefetch(&self, reference: &RepoReference) -> Vec<PromptMessage> {
        Prefetcher::new(self.tools.as_ref())
            .prefetch(reference)
            .await
            .into_messages()
    }

    /// Forward events to the caller while accumulating the full text; after
    /// a natural `Finish`, persist and evaluate the summarization trigger.
    fn relay_and_finalize(
        &self,
        mut inner: BoxStream<'static, Result<StreamEvent>>,
        thread: Thread,
        history: Vec<StoredMessage>,
        sum_backend: Arc<dyn ChatBackend>,
        sum_spec: ModelSpecifier,
        cancel: CancelToken,
    ) -> BoxStream<'static, Result<StreamEvent>> {
        let store = Arc::clone(&self.store);
        let summarize_config = self.config.summarize.clone();

        let stream = async_stream::stream! {
            let mut text = String::new();
            let mut history = Some(history);

            while let Some(event) = inner.next().await {
                match &event {
                    Ok(StreamEvent::TextDelta { text: delta, .. }) => text.push_str(delta),
                    Ok(StreamEvent::Finish { .. }) => {
                        if cancel.is_cancelled() {
                            // Abort raced the finish; treat as aborted.
                            break;
                        }
                        finalize(
                            store.as_ref(),
                            &thread,
                            history.take().unwrap_or_default(),
                            sum_backend.as_ref(),
                            &sum_spec,
                            &summarize_config,
                            std::mem::take(&mut text),
                        )
                        .await;
                        yield event;
                        return;
                    }
                    _ => {}
                }
                yield event;
            }
            tracing::debug!(
                thread_id = %thread.id,
                "generation ended without natural completion, persisting nothing"
            );
        };
        Box::pin(stream)
    }
}

/// Final prompt order: guardrail, tool hint, prefetch results, assembled
/// context.
fn build_prompt(
    catalog: &[ToolDescriptor],
    tools_enabled: bool,
    prefetch_messages: Vec<PromptMessage>,
    assembled: &[PromptMessage],
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(GUARDRAIL)];
    if tools_enabled {
        messages.push(ChatMessage::system(tool_hint(catalog)));
    }
    messages.extend(prefetch_messages.into_iter().map(ChatMessage::from));
    messages.extend(assembled.iter().cloned().map(ChatMessage::from));
    messages
}

/// Advisory catalog injection; the orchestrator only ever matches by name.
fn tool_hint(catalog: &[ToolDescriptor]) -> String {
    let mut hint =
        String::from("You can call these repository tools when they would help:\n");
    for tool in catalog {
        hint.push_str(&format!("- {}", tool.name));
        let params = tool.parameter_names();
        if !params.is_empty() {
            hint.push_str(&format!("({})", params.join(", ")));
        }
        if !tool.description.is_empty() {
            hint.push_str(&format!(": {}", tool.description));
        }
        hint.push('\n');
    }
    hint.push_str("Prefer tool results over assumptions about repository contents.");
    hint
}

fn latest_user_message(history: &[StoredMessage]) -> Option<&StoredMessage> {
    history.iter().rev().find(|m| m.role == Role::User)
}

/// Post-completion bookkeeping. Persistence failures and summarizer failures
/// are logged, never surfaced; the response already reached the caller.
#[allow(clippy::too_many_arguments)]
async fn finalize(
    store: &dyn ThreadStore,
    thread: &Thread,
    mut history: Vec<StoredMessage>,
    sum_backend: &dyn ChatBackend,
    sum_spec: &ModelSpecifier,
    summarize_config: &lq_domain::config::SummarizeConfig,
    text: String,
) {
    let assistant = StoredMessage::new(thread.id, Role::Assistant, text);
    if let Err(e) = store.create_message(assistant.clone()).await {
        tracing::error!(thread_id = %thread.id, error = %e, "failed to persist assistant message");
        return;
    }
    history.push(assistant);

    let token_estimate: usize = history.iter().map(|m| estimate_tokens(&m.content)).sum();
    let token_estimate = token_estimate as u32;
    let turn_count = thread.turn_count + 1;

    if let Err(e) = store
        .patch_thread(
            thread.id,
            ThreadPatch {
                turn_count: Some(turn_count),
                token_estimate: Some(token_estimate),
                ..Default::default()
            },
        )
        .await
    {
        tracing::error!(thread_id = %thread.id, error = %e, "failed to update thread counters");
    }

    if !summarize::should_summarize(token_estimate, turn_count, summarize_config) {
        return;
    }

    tracing::info!(
        thread_id = %thread.id,
        token_estimate,
        turn_count,
        "summarization trigger fired"
    );
    match summarize::summarize(sum_backend, &sum_spec.model, &thread.title, &history).await {
        Ok(summary) => {
            let patch = ThreadPatch {
                summary_text: Some(render_summary(&summary)),
                summary_model: Some(sum_spec.to_string()),
                summary_updated_at: Some(chrono::Utc::now()),
                ..Default::default()
            };
            if let Err(e) = store.patch_thread(thread.id, patch).await {
                tracing::warn!(thread_id = %thread.id, error = %e, "failed to persist summary");
            }
        }
        Err(e) => {
            // Summarization is an optimization; its failure never fails the
            // response that triggered it.
            tracing::warn!(thread_id = %thread.id, error = %e, "summarization failed");
        }
    }
}

/// Render a structured summary as the text embedded in future prompts.
fn render_summary(summary: &lq_domain::chat::Summary) -> String {
    let mut out = summary.narrative.clone();
    for (label, items) in [
        ("Highlights", &summary.highlights),
        ("Facts", &summary.facts),
        ("Open items", &summary.todos),
    ] {
        if !items.is_empty() {
            out.push_str(&format!("\n\n{label}:\n"));
            for item in items {
                out.push_str(&format!("- {item}\n"));
            }
        }
    }
    out.trim_end().to_string()
}
