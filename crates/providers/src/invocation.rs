//! Tool-invocation middleware.
//!
//! Sits between the session and the raw transport. When the model requests
//! tool calls, this layer executes them via the registered `ToolExecutor`
//! while the outer stream is paused — the result events are spliced into
//! the sequence, the working history grows assistant/tool messages, and the
//! inner request is re-issued. The session above sees one uninterrupted
//! stream per turn with a single trailing usage report.
//!
//! Tool calls are fire-and-forget within the turn: a call that executed
//! before a later failure is not rolled back or retried.

use async_trait::async_trait;
use quill_core::error::ProviderError;
use quill_core::message::{Message, MessageToolCall};
use quill_core::provider::{ChatProvider, ChatRequest, StreamEvent, Usage};
use quill_core::tool::{ToolCall, ToolExecutor, ToolOutput};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_MAX_ROUNDS: u32 = 25;

/// Wraps a `ChatProvider` with mid-stream tool execution.
pub struct ToolInvocationLayer {
    inner: Arc<dyn ChatProvider>,
    executor: Arc<dyn ToolExecutor>,
    max_rounds: u32,
}

impl ToolInvocationLayer {
    pub fn new(inner: Arc<dyn ChatProvider>, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            inner,
            executor,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Cap the number of model rounds within one turn.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }
}

#[async_trait]
impl ChatProvider for ToolInvocationLayer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamEvent, ProviderError>>, ProviderError>
    {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let inner = self.inner.clone();
        let executor = self.executor.clone();
        let max_rounds = self.max_rounds;

        tokio::spawn(async move {
            let mut working = request;
            let mut total_usage = Usage::default();
            let mut model = working.model.clone();

            for round in 1..=max_rounds {
                let mut inner_rx = match inner.stream(working.clone()).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                let mut text = String::new();
                let mut requested: Vec<ToolCall> = Vec::new();

                while let Some(item) = inner_rx.recv().await {
                    match item {
                        Ok(StreamEvent::Text { delta }) => {
                            text.push_str(&delta);
                            if tx.send(Ok(StreamEvent::Text { delta })).await.is_err() {
                                return;
                            }
                        }
                        Ok(StreamEvent::ToolCallRequest { id, name, arguments }) => {
                            requested.push(ToolCall {
                                id: id.clone(),
                                name: name.clone(),
                                arguments: arguments.clone(),
                            });
                            let event = StreamEvent::ToolCallRequest { id, name, arguments };
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Ok(StreamEvent::UsageMetadata { usage, model: m }) => {
                            // Swallowed: one merged report goes out at the end.
                            total_usage.merge(&usage);
                            model = m;
                        }
                        Ok(StreamEvent::ToolCallResult { .. }) => {
                            // The raw transport never produces results; a
                            // nested layer might. Pass them through untouched.
                        }
                        Ok(StreamEvent::Done) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }

                if requested.is_empty() {
                    let _ = tx
                        .send(Ok(StreamEvent::UsageMetadata {
                            usage: total_usage,
                            model,
                        }))
                        .await;
                    let _ = tx.send(Ok(StreamEvent::Done)).await;
                    return;
                }

                debug!(round, calls = requested.len(), "Executing requested tool calls");

                // Splice the assistant turn and each result into the
                // working history for the next round.
                let message_calls: Vec<MessageToolCall> = requested
                    .iter()
                    .map(|call| MessageToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    })
                    .collect();
                working
                    .messages
                    .push(Message::assistant_with_calls(std::mem::take(&mut text), message_calls));

                for call in &requested {
                    let output = match executor.execute(call).await {
                        Ok(output) => output,
                        Err(e) => {
                            warn!(tool = %call.name, error = %e, "Tool execution failed");
                            // Report the failure to the model so it can recover.
                            ToolOutput {
                                call_id: call.id.clone(),
                                success: false,
                                output: format!("Error: {e}"),
                            }
                        }
                    };

                    let event = StreamEvent::ToolCallResult {
                        id: output.call_id.clone(),
                        name: call.name.clone(),
                        output: output.output.clone(),
                        success: output.success,
                    };
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }

                    working
                        .messages
                        .push(Message::tool_result(output.call_id, output.output));
                }
            }

            warn!(max_rounds, "Turn hit the tool-round ceiling, ending stream");
            let _ = tx
                .send(Ok(StreamEvent::UsageMetadata {
                    usage: total_usage,
                    model,
                }))
                .await;
            let _ = tx.send(Ok(StreamEvent::Done)).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::error::ToolError;
    use std::sync::Mutex;

    /// Plays back one scripted event sequence per round and records every
    /// request it receives.
    struct ScriptedProvider {
        rounds: Mutex<Vec<Vec<StreamEvent>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(rounds: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                rounds: Mutex::new(rounds),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(
            &self,
            request: ChatRequest,
        ) -> Result<
            tokio::sync::mpsc::Receiver<Result<StreamEvent, ProviderError>>,
            ProviderError,
        > {
            self.requests.lock().unwrap().push(request);
            let mut rounds = self.rounds.lock().unwrap();
            let events = if rounds.is_empty() {
                vec![StreamEvent::Done]
            } else {
                rounds.remove(0)
            };
            let (tx, rx) = tokio::sync::mpsc::channel(64);
            tokio::spawn(async move {
                for event in events {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    struct EchoExecutor {
        calls: Mutex<Vec<ToolCall>>,
        fail: bool,
    }

    impl EchoExecutor {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
            self.calls.lock().unwrap().push(call.clone());
            if self.fail {
                return Err(ToolError::ExecutionFailed {
                    tool_name: call.name.clone(),
                    reason: "boom".into(),
                });
            }
            Ok(ToolOutput {
                call_id: call.id.clone(),
                success: true,
                output: format!("ran {}", call.name),
            })
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "test-model".into(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            temperature: 0.7,
            max_tokens: None,
            tools: vec![],
        }
    }

    fn usage(input: u32, output: u32) -> StreamEvent {
        StreamEvent::UsageMetadata {
            usage: Usage {
                input_tokens: input,
                output_tokens: output,
                cached_tokens: 0,
            },
            model: "test-model".into(),
        }
    }

    async fn collect(
        mut rx: tokio::sync::mpsc::Receiver<Result<StreamEvent, ProviderError>>,
    ) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(item) = rx.recv().await {
            events.push(item.unwrap());
        }
        events
    }

    #[tokio::test]
    async fn text_only_turn_passes_through() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            StreamEvent::Text { delta: "Hello".into() },
            usage(10, 2),
            StreamEvent::Done,
        ]]));
        let executor = Arc::new(EchoExecutor::new());
        let layer = ToolInvocationLayer::new(provider, executor.clone());

        let events = collect(layer.stream(request()).await.unwrap()).await;

        assert!(matches!(&events[0], StreamEvent::Text { delta } if delta == "Hello"));
        assert!(matches!(
            &events[1],
            StreamEvent::UsageMetadata { usage, .. } if usage.input_tokens == 10
        ));
        assert!(matches!(events[2], StreamEvent::Done));
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_round_splices_results_and_merges_usage() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                StreamEvent::Text { delta: "Using a tool".into() },
                StreamEvent::ToolCallRequest {
                    id: "call_1".into(),
                    name: "calculator".into(),
                    arguments: serde_json::json!({"expr": "2+2"}),
                },
                usage(10, 5),
                StreamEvent::Done,
            ],
            vec![
                StreamEvent::Text { delta: "The answer is 4.".into() },
                usage(30, 7),
                StreamEvent::Done,
            ],
        ]));
        let executor = Arc::new(EchoExecutor::new());
        let layer = ToolInvocationLayer::new(provider.clone(), executor.clone());

        let events = collect(layer.stream(request()).await.unwrap()).await;

        // Order: text, request, result, text, usage, done
        assert!(matches!(&events[0], StreamEvent::Text { .. }));
        assert!(matches!(&events[1], StreamEvent::ToolCallRequest { name, .. } if name == "calculator"));
        match &events[2] {
            StreamEvent::ToolCallResult { name, output, success, .. } => {
                assert_eq!(name, "calculator");
                assert_eq!(output, "ran calculator");
                assert!(*success);
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert!(matches!(&events[3], StreamEvent::Text { delta } if delta == "The answer is 4."));
        match &events[4] {
            StreamEvent::UsageMetadata { usage, .. } => {
                assert_eq!(usage.input_tokens, 40);
                assert_eq!(usage.output_tokens, 12);
            }
            other => panic!("expected usage, got {other:?}"),
        }
        assert!(matches!(events[5], StreamEvent::Done));

        // The executor saw the call with parsed arguments
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["expr"], "2+2");

        // Round two was issued with the spliced assistant + tool messages
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        let roles: Vec<_> = second.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                quill_core::Role::System,
                quill_core::Role::User,
                quill_core::Role::Assistant,
                quill_core::Role::Tool,
            ]
        );
        assert_eq!(second.messages[2].tool_calls.len(), 1);
        assert_eq!(
            second.messages[3].tool_call_id.as_deref(),
            Some("call_1")
        );
    }

    #[tokio::test]
    async fn tool_failure_is_reported_not_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                StreamEvent::ToolCallRequest {
                    id: "call_1".into(),
                    name: "broken".into(),
                    arguments: serde_json::json!({}),
                },
                StreamEvent::Done,
            ],
            vec![
                StreamEvent::Text { delta: "recovered".into() },
                StreamEvent::Done,
            ],
        ]));
        let executor = Arc::new(EchoExecutor::failing());
        let layer = ToolInvocationLayer::new(provider.clone(), executor);

        let events = collect(layer.stream(request()).await.unwrap()).await;

        let result = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCallResult { output, success, .. } => {
                    Some((output.clone(), *success))
                }
                _ => None,
            })
            .expect("a result event");
        assert!(!result.1);
        assert!(result.0.starts_with("Error:"));

        // The failure text was spliced into the next round for the model
        let requests = provider.requests.lock().unwrap();
        assert!(requests[1].messages.last().unwrap().content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn round_ceiling_terminates_stream() {
        // Every round requests another tool call; the layer must give up.
        let always_tooling: Vec<Vec<StreamEvent>> = (0..10)
            .map(|i| {
                vec![
                    StreamEvent::ToolCallRequest {
                        id: format!("call_{i}"),
                        name: "loop".into(),
                        arguments: serde_json::json!({}),
                    },
                    StreamEvent::Done,
                ]
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(always_tooling));
        let executor = Arc::new(EchoExecutor::new());
        let layer = ToolInvocationLayer::new(provider, executor.clone()).with_max_rounds(3);

        let events = collect(layer.stream(request()).await.unwrap()).await;

        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        assert_eq!(executor.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn inner_error_propagates() {
        struct FailingProvider;

        #[async_trait]
        impl ChatProvider for FailingProvider {
            fn name(&self) -> &str {
                "failing"
            }
            async fn stream(
                &self,
                _request: ChatRequest,
            ) -> Result<
                tokio::sync::mpsc::Receiver<Result<StreamEvent, ProviderError>>,
                ProviderError,
            > {
                Err(ProviderError::RateLimited {
                    message: "too many requests".into(),
                })
            }
        }

        let layer = ToolInvocationLayer::new(
            Arc::new(FailingProvider),
            Arc::new(EchoExecutor::new()),
        );
        let mut rx = layer.stream(request()).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(ProviderError::RateLimited { .. })));
    }
}
