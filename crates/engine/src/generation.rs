//! The per-request generation loop.
//!
//! With tools enabled the loop owns the stream envelope: one `StreamStart`,
//! a text delta per step that produced text, one `Finish`. Each step is one
//! buffered `generate` call; tool calls requested by the model are executed
//! between steps and their results fed back. With tools disabled the backend
//! stream is passed through untouched.

use std::sync::Arc;

use futures_util::StreamExt;

use crate::cancel::CancelToken;
use crate::stepper::{StepObserver, StepPolicy, StepReport, StepState};
use crate::tools::Tools;
use lq_domain::error::Result;
use lq_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use lq_providers::{ChatBackend, ChatMessage, GenerateRequest};

pub(crate) fn stream_generation(
    backend: Arc<dyn ChatBackend>,
    request: GenerateRequest,
    tools: Arc<dyn Tools>,
    policy: StepPolicy,
    observer: Arc<dyn StepObserver>,
    cancel: CancelToken,
) -> BoxStream<'static, Result<StreamEvent>> {
    if policy.tools_enabled && !request.tools.is_empty() {
        tool_loop(backend, request, tools, policy, observer, cancel)
    } else {
        passthrough(backend, request, cancel)
    }
}

/// Forward the backend's native (or emulated) stream, stopping on abort.
fn passthrough(
    backend: Arc<dyn ChatBackend>,
    mut request: GenerateRequest,
    cancel: CancelToken,
) -> BoxStream<'static, Result<StreamEvent>> {
    request.tools.clear();
    request.tool_choice = lq_providers::ToolChoice::None;

    let stream = async_stream::stream! {
        match backend.stream(&request).await {
            Err(e) => yield Err(e),
            Ok(mut inner) => loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    event = inner.next() => event,
                };
                match next {
                    Some(event) => yield event,
                    // Aborted or exhausted; either way stop emitting.
                    None => break,
                }
            },
        }
    };
    Box::pin(stream)
}

fn tool_loop(
    backend: Arc<dyn ChatBackend>,
    mut request: GenerateRequest,
    tools: Arc<dyn Tools>,
    policy: StepPolicy,
    observer: Arc<dyn StepObserver>,
    cancel: CancelToken,
) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::stream! {
        yield Ok(StreamEvent::StreamStart { warnings: Vec::new() });

        let mut state = StepState::new();
        let mut usage_total = Usage::default();
        let mut saw_usage = false;

        loop {
            if cancel.is_cancelled() {
                return;
            }
            if !state.can_continue(&policy) {
                tracing::warn!(
                    steps = state.step(),
                    tool_calls = state.tool_calls_made(),
                    "step ceiling reached, forcing completion"
                );
                yield Ok(StreamEvent::Finish {
                    reason: FinishReason::Other,
                    usage: saw_usage.then(|| usage_total.clone()),
                });
                return;
            }

            request.tool_choice = state.tool_choice(&policy);

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                response = backend.generate(&request) => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    observer.on_error(state.step(), &e);
                    yield Err(e);
                    return;
                }
            };

            if let Some(usage) = &response.usage {
                usage_total.add(usage);
                saw_usage = true;
            }
            if !response.content.is_empty() {
                yield Ok(StreamEvent::TextDelta {
                    id: state.step().to_string(),
                    text: response.content.clone(),
                });
            }

            if response.tool_calls.is_empty() {
                observer.on_step(&StepReport {
                    step: state.step(),
                    tool_calls: 0,
                    tool_results: 0,
                    finish_reason: response.finish_reason,
                });
                yield Ok(StreamEvent::Finish {
                    reason: response.finish_reason,
                    usage: saw_usage.then(|| usage_total.clone()),
                });
                return;
            }

            request.messages.push(ChatMessage::AssistantToolCalls {
                content: response.content.clone(),
                calls: response.tool_calls.clone(),
            });

            let mut results = 0u32;
            for call in &response.tool_calls {
                if cancel.is_cancelled() {
                    return;
                }
                let (content, is_error) =
                    match tools.invoke(&call.tool_name, call.arguments.clone()).await {
                        Ok(outcome) => {
                            if !outcome.is_error {
                                results += 1;
                            }
                            (outcome.text, outcome.is_error)
                        }
                        Err(e) => {
                            tracing::warn!(
                                tool = %call.tool_name,
                                error = %e,
                                "tool invocation failed, reporting failure to the model"
                            );
                            (format!("tool invocation failed: {e}"), true)
                        }
                    };
                request.messages.push(ChatMessage::ToolResult {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    content,
                    is_error,
                });
            }

            observer.on_step(&StepReport {
                step: state.step(),
                tool_calls: response.tool_calls.len() as u32,
                tool_results: results,
                finish_reason: response.finish_reason,
            });
            state.record_step(response.tool_calls.len() as u32);
        }
    };
    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stepper::TracingObserver;
    use async_trait::async_trait;
    use lq_domain::config::SteppingConfig;
    use lq_domain::error::Error;
    use lq_domain::tool::{ToolCall, ToolDescriptor};
    use lq_mcp_client::ToolOutcome;
    use lq_providers::{collect_events, GenerateResponse, ToolChoice};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend scripted with a queue of responses; repeats the last response
    /// when the queue runs dry (for ceiling tests).
    struct ScriptedBackend {
        responses: Mutex<VecDeque<GenerateResponse>>,
        repeat_last: Option<GenerateResponse>,
        calls: AtomicU32,
        choices: Mutex<Vec<ToolChoice>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<GenerateResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                repeat_last: None,
                calls: AtomicU32::new(0),
                choices: Mutex::new(Vec::new()),
            })
        }

        fn repeating(response: GenerateResponse) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::new()),
                repeat_last: Some(response),
                calls: AtomicU32::new(0),
                choices: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.choices.lock().push(req.tool_choice);
            self.responses
                .lock()
                .pop_front()
                .or_else(|| self.repeat_last.clone())
                .ok_or_else(|| Error::Other("script exhausted".into()))
        }

        async fn stream(
            &self,
            _req: &GenerateRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            unreachable!("tool loop uses generate")
        }

        fn provider_id(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTools;

    #[async_trait]
    impl Tools for EchoTools {
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "echo".into(),
                description: String::new(),
                parameters: serde_json::json!({}),
            }]
        }

        async fn invoke(&self, _name: &str, arguments: serde_json::Value) -> Result<ToolOutcome> {
            Ok(ToolOutcome {
                text: arguments.to_string(),
                is_error: false,
            })
        }
    }

    fn text_response(text: &str) -> GenerateResponse {
        GenerateResponse {
            content: text.into(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            }),
            warnings: vec![],
        }
    }

    fn tool_call_response() -> GenerateResponse {
        GenerateResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "echo".into(),
                arguments: serde_json::json!({ "q": 1 }),
            }],
            finish_reason: FinishReason::Stop,
            usage: None,
            warnings: vec![],
        }
    }

    fn base_request() -> GenerateRequest {
        GenerateRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: EchoTools.list_tools(),
            ..Default::default()
        }
    }

    fn policy() -> StepPolicy {
        StepPolicy::new(&SteppingConfig::default(), true, false)
    }

    async fn run(
        backend: Arc<ScriptedBackend>,
        policy: StepPolicy,
        cancel: CancelToken,
    ) -> Vec<Result<StreamEvent>> {
        let stream = stream_generation(
            backend,
            base_request(),
            Arc::new(EchoTools),
            policy,
            Arc::new(TracingObserver),
            cancel,
        );
        collect_events(stream).await
    }

    #[tokio::test]
    async fn tool_loop_upholds_event_ordering() {
        let backend = ScriptedBackend::new(vec![tool_call_response(), text_response("answer")]);
        let events = run(backend.clone(), policy(), CancelToken::new()).await;

        assert!(matches!(
            events.first().unwrap().as_ref().unwrap(),
            StreamEvent::StreamStart { .. }
        ));
        assert!(matches!(
            events.last().unwrap().as_ref().unwrap(),
            StreamEvent::Finish {
                reason: FinishReason::Stop,
                ..
            }
        ));
        let text: String = events
            .iter()
            .filter_map(|e| match e.as_ref().unwrap() {
                StreamEvent::TextDelta { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "answer");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn step_ceiling_forces_completion_at_twenty() {
        let backend = ScriptedBackend::repeating(tool_call_response());
        let events = run(backend.clone(), policy(), CancelToken::new()).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 20);
        match events.last().unwrap().as_ref().unwrap() {
            StreamEvent::Finish { reason, .. } => assert_eq!(*reason, FinishReason::Other),
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forced_steps_request_required_tool_choice() {
        let backend = ScriptedBackend::new(vec![
            tool_call_response(),
            tool_call_response(),
            text_response("done"),
        ]);
        let forced = StepPolicy::new(&SteppingConfig::default(), true, true);
        run(backend.clone(), forced, CancelToken::new()).await;

        let choices = backend.choices.lock().clone();
        // Step 0 forced by force_first; step 1 forced by the early-step
        // window (only 2 cumulative calls); step 2 still inside it.
        assert_eq!(
            choices,
            vec![ToolChoice::Required, ToolChoice::Required, ToolChoice::Required]
        );
    }

    #[tokio::test]
    async fn backend_error_terminates_after_emitted_deltas() {
        let backend = ScriptedBackend::new(vec![GenerateResponse {
            content: "partial thoughts".into(),
            ..tool_call_response()
        }]);
        let events = run(backend, policy(), CancelToken::new()).await;

        // The delta from the first step stays emitted; the script-exhausted
        // error on step 2 terminates the stream with no finish event.
        assert!(events
            .iter()
            .any(|e| matches!(e.as_ref().ok(), Some(StreamEvent::TextDelta { .. }))));
        assert!(events.last().unwrap().is_err());
        assert!(!events
            .iter()
            .any(|e| matches!(e.as_ref().ok(), Some(StreamEvent::Finish { .. }))));
    }

    #[tokio::test]
    async fn cancel_stops_the_loop_without_finish() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let backend = ScriptedBackend::repeating(tool_call_response());
        let events = run(backend.clone(), policy(), cancel).await;

        // StreamStart only; cancellation was observed before the first step.
        assert_eq!(events.len(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn usage_accumulates_across_steps() {
        let with_usage = GenerateResponse {
            usage: Some(Usage {
                input_tokens: 100,
                output_tokens: 20,
                total_tokens: 120,
            }),
            ..tool_call_response()
        };
        let backend = ScriptedBackend::new(vec![with_usage, text_response("done")]);
        let events = run(backend, policy(), CancelToken::new()).await;

        match events.last().unwrap().as_ref().unwrap() {
            StreamEvent::Finish { usage, .. } => {
                assert_eq!(usage.as_ref().unwrap().total_tokens, 135);
            }
            other => panic!("expected finish, got {other:?}"),
        }
    }
}
