//! The tool-calling loop controller.
//!
//! One [`Turn`] drives a single streamed request: up to
//! [`AgentConfig::max_loops`] rounds of asking the model gateway, relaying
//! its text incrementally, resolving any tool calls it requested,
//! executing them sequentially, and folding a transcript of the results
//! into the context for the next round.
//!
//! [`stream_turn`] wraps the controller in a spawned task and returns the
//! outward event stream. It guarantees exactly one terminal event per
//! request: `done` on normal completion (including loop exhaustion),
//! `err` on any unrecoverable failure — panics included.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use steward_llm::{
    BlockStart, ContentDelta, GenerationRequest, SharedGateway, StreamEvent, Usage,
};

use crate::accumulator::{ResolvedToolCall, ToolCallAssembler};
use crate::audit::{AuditSink, ToolInvocationRecord};
use crate::context::{BlockKind, ConversationContext};
use crate::error::{AgentError, Result};
use crate::events::{AgentEvent, EventEmitter};
use crate::media::MediaAnalyzer;
use crate::tool::{ToolContext, ToolRegistry};
use crate::transcript;
use crate::types::{AgentConfig, Attachment, SessionId, TraceId};

// ─────────────────────────────────────────────────────────────────────────────
// Turn Request / Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// One streamed request to the loop controller.
#[derive(Debug)]
pub struct TurnRequest {
    /// Trace id carried in the `init` event.
    pub trace_id: TraceId,
    /// Session the request belongs to.
    pub session_id: SessionId,
    /// Initial conversation context built from the inbound history.
    pub context: ConversationContext,
    /// Attachments to run through the media analyzer, if any.
    pub attachments: Vec<Attachment>,
    /// Cancelled when the client disconnects.
    pub cancellation: CancellationToken,
}

impl TurnRequest {
    /// Create a request for the given session and context.
    pub fn new(session_id: SessionId, context: ConversationContext) -> Self {
        Self {
            trace_id: TraceId::new(),
            session_id,
            context,
            attachments: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach files/images to the request.
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// The final outcome of a completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Full accumulated answer text.
    pub text: String,
    /// Loop iterations used.
    pub iterations: u32,
    /// Every tool call made across all iterations, in execution order.
    pub tool_calls: Vec<ResolvedToolCall>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Turn (Loop Controller)
// ─────────────────────────────────────────────────────────────────────────────

/// The loop controller: gateway + registry + configuration.
///
/// A `Turn` is cheap to share; each call to [`Turn::run`] is an
/// independent, sequential state machine instance.
pub struct Turn {
    gateway: SharedGateway,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    media: Option<Arc<dyn MediaAnalyzer>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Turn {
    /// Create a new controller.
    pub fn new(gateway: SharedGateway, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            gateway,
            tools,
            config,
            media: None,
            audit: None,
        }
    }

    /// Attach a media analyzer for attachment pre-processing.
    pub fn with_media_analyzer(mut self, media: Arc<dyn MediaAnalyzer>) -> Self {
        self.media = Some(media);
        self
    }

    /// Attach an audit sink for fire-and-forget invocation records.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the loop to completion, emitting progress events as they occur.
    ///
    /// Returns the outcome for the caller to turn into the terminal event.
    /// `Err(AgentError::Cancelled)` means the client went away and no
    /// terminal event should be produced.
    pub async fn run(&self, request: TurnRequest, emitter: &EventEmitter) -> Result<TurnOutcome> {
        let TurnRequest {
            trace_id,
            session_id,
            context,
            attachments,
            cancellation,
        } = request;

        emitter.emit(AgentEvent::Init {
            trace_id: trace_id.to_string(),
            session_id: session_id.to_string(),
            model: self.config.model.clone(),
        });

        let mut context = self.analyze_attachments(&attachments, context, emitter).await;

        let mut answer = String::new();
        let mut all_calls: Vec<ResolvedToolCall> = Vec::new();
        let mut iteration: u32 = 0;

        loop {
            if cancellation.is_cancelled() || !emitter.is_open() {
                return Err(AgentError::Cancelled);
            }

            // Loop exhaustion truncates silently: whatever text has
            // accumulated becomes the answer.
            if iteration >= self.config.max_loops {
                tracing::warn!(
                    session_id = %session_id,
                    max_loops = self.config.max_loops,
                    "Loop budget exhausted with tools still being requested"
                );
                break;
            }
            iteration += 1;

            emitter.emit(AgentEvent::LoopStart {
                iteration,
                max_iterations: self.config.max_loops,
            });
            emitter.emit(AgentEvent::ModelCall {
                model: self.config.model.clone(),
            });

            let resolved = self
                .stream_model_round(&context, &cancellation, emitter, &mut answer)
                .await?;

            if resolved.is_empty() {
                break;
            }

            let first = all_calls.len();
            self.dispatch_tools(
                resolved,
                session_id,
                trace_id,
                &cancellation,
                emitter,
                &mut all_calls,
            )
            .await;

            context = context.with_block(
                BlockKind::ToolTranscript,
                transcript::synthesize(&all_calls[first..]),
            );
        }

        Ok(TurnOutcome {
            text: answer,
            iterations: iteration,
            tool_calls: all_calls,
        })
    }

    /// Fold media-derived descriptions of the attachments into the context.
    async fn analyze_attachments(
        &self,
        attachments: &[Attachment],
        mut context: ConversationContext,
        emitter: &EventEmitter,
    ) -> ConversationContext {
        let Some(media) = &self.media else {
            return context;
        };

        for attachment in attachments {
            emitter.emit(AgentEvent::thinking(format!(
                "Analyzing attachment '{}'",
                attachment.name
            )));
            match media.describe(attachment).await {
                Ok(description) => {
                    context = context.with_block(BlockKind::Media, description);
                }
                Err(e) => {
                    tracing::warn!(
                        attachment = %attachment.name,
                        error = %e,
                        "Attachment analysis failed, continuing without it"
                    );
                }
            }
        }
        context
    }

    /// Run one gateway stream, relaying text and resolving tool calls.
    async fn stream_model_round(
        &self,
        context: &ConversationContext,
        cancellation: &CancellationToken,
        emitter: &EventEmitter,
        answer: &mut String,
    ) -> Result<Vec<ResolvedToolCall>> {
        let gen_request = self.generation_request(context);
        let mut stream = self.gateway.generate_stream(gen_request).await?;

        let mut assembler = ToolCallAssembler::new();
        let mut resolved: Vec<ResolvedToolCall> = Vec::new();

        while let Some(item) = stream.next().await {
            if cancellation.is_cancelled() || !emitter.is_open() {
                return Err(AgentError::Cancelled);
            }

            match item? {
                StreamEvent::MessageStart { .. } | StreamEvent::Ping => {}
                StreamEvent::ContentBlockStart {
                    index,
                    block: BlockStart::ToolUse { id, name },
                } => {
                    assembler.start(index, id, name);
                }
                StreamEvent::ContentBlockStart { .. } => {}
                StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta(text),
                    ..
                } => {
                    answer.push_str(&text);
                    emitter.emit(AgentEvent::text(text));
                }
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta(fragment),
                } => {
                    assembler.append_fragment(index, fragment);
                }
                StreamEvent::ContentBlockStop { index } => {
                    if let Some(call) = assembler.complete(index) {
                        resolved.push(call);
                    }
                }
                StreamEvent::MessageDelta { usage, .. } => {
                    emitter.emit(self.usage_event(usage));
                }
                StreamEvent::MessageStop => break,
                StreamEvent::Error { message } => {
                    return Err(AgentError::Gateway(steward_llm::GatewayError::Backend(
                        message,
                    )));
                }
            }
        }

        if !assembler.is_empty() {
            tracing::debug!(
                pending = assembler.pending_len(),
                "Discarding tool calls never completed by the model stream"
            );
        }

        Ok(resolved)
    }

    /// Execute one iteration's resolved calls sequentially, in request order.
    async fn dispatch_tools(
        &self,
        resolved: Vec<ResolvedToolCall>,
        session_id: SessionId,
        trace_id: TraceId,
        cancellation: &CancellationToken,
        emitter: &EventEmitter,
        all_calls: &mut Vec<ResolvedToolCall>,
    ) {
        emitter.emit(AgentEvent::ToolsStart);

        let ctx = ToolContext::with_cancellation(session_id, trace_id, cancellation.clone());

        for mut call in resolved {
            // A disconnect observed mid-dispatch stops scheduling work.
            if cancellation.is_cancelled() || !emitter.is_open() {
                return;
            }

            let category = self.tools.category_of(&call.name);
            emitter.emit(AgentEvent::ToolExecuting {
                tool: call.name.clone(),
                category: category.clone(),
                args: call.arguments.clone(),
            });

            let started = Instant::now();
            match self.tools.invoke(&call.name, call.arguments.clone(), &ctx).await {
                Ok(result) => {
                    emitter.emit(AgentEvent::ToolResult {
                        tool: call.name.clone(),
                        category: category.clone(),
                        result: result.clone(),
                    });
                    call.result = Some(result);
                }
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                    emitter.emit(AgentEvent::ToolError {
                        tool: call.name.clone(),
                        category: category.clone(),
                        error: e.message.clone(),
                    });
                    call.error = Some(e.message);
                }
            }

            self.record_audit(session_id, &call, &category, started);
            all_calls.push(call);
        }

        emitter.emit(AgentEvent::ToolsEnd);
    }

    /// Report one invocation to the audit sink without awaiting it.
    fn record_audit(
        &self,
        session_id: SessionId,
        call: &ResolvedToolCall,
        category: &str,
        started: Instant,
    ) {
        let Some(audit) = self.audit.clone() else {
            return;
        };

        let record = ToolInvocationRecord {
            session_id,
            tool: call.name.clone(),
            category: category.to_string(),
            args: call.arguments.clone(),
            result: call.result.clone(),
            error: call.error.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            success: call.error.is_none(),
        };

        tokio::spawn(async move {
            if let Err(e) = audit.record_tool_invocation(record).await {
                tracing::warn!(error = %e, "Failed to record tool invocation");
            }
        });
    }

    fn generation_request(&self, context: &ConversationContext) -> GenerationRequest {
        let flattened = context.flatten();
        let instructions = match &self.config.system_prompt {
            Some(prompt) => format!("{}\n\n{}", prompt, flattened),
            None => flattened,
        };

        let mut request =
            GenerationRequest::new(&self.config.model, instructions, self.config.max_tokens)
                .with_streaming();

        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        let manifest = self.tools.manifest();
        if !manifest.is_empty() {
            request = request.with_tools(manifest);
        }

        request
    }

    fn usage_event(&self, usage: Usage) -> AgentEvent {
        AgentEvent::Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streamed turn wrapper
// ─────────────────────────────────────────────────────────────────────────────

/// A boxed stream of outward events.
pub type AgentStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send + 'static>>;

/// Run a turn in the background and return its outward event stream.
///
/// The stream ends after the single terminal event. Dropping the stream
/// cancels the turn: in-flight gateway and registry work stops at the
/// next suspension point and nothing further is scheduled.
pub fn stream_turn(turn: Arc<Turn>, request: TurnRequest) -> AgentStream {
    let (emitter, mut rx) = EventEmitter::channel();
    let session_id = request.session_id;
    let cancellation = request.cancellation.clone();
    let model = turn.config.model.clone();

    let task_emitter = emitter.clone();
    tokio::spawn(async move {
        let run_emitter = task_emitter.clone();
        let handle = tokio::spawn(async move { turn.run(request, &run_emitter).await });

        match handle.await {
            Ok(Ok(outcome)) => {
                task_emitter.emit(AgentEvent::Done {
                    text: outcome.text,
                    session_id: session_id.to_string(),
                    tool_calls: outcome.tool_calls.len() as u32,
                    iterations: outcome.iterations,
                    model,
                });
            }
            Ok(Err(AgentError::Cancelled)) => {
                tracing::debug!(session_id = %session_id, "Turn abandoned after client disconnect");
            }
            Ok(Err(e)) => {
                tracing::error!(session_id = %session_id, error = %e, "Turn failed");
                task_emitter.emit(AgentEvent::error(e.to_string()));
            }
            Err(join_error) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %join_error,
                    "Turn task aborted unexpectedly"
                );
                task_emitter.emit(AgentEvent::error("internal error"));
            }
        }
    });

    Box::pin(async_stream::stream! {
        let _guard = cancellation.drop_guard();
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            yield event;
            if terminal {
                break;
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use steward_llm::{GatewayError, MockGateway, StopReason, text_turn};

    use crate::tool::MockTool;

    fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind()).collect()
    }

    async fn collect(stream: AgentStream) -> Vec<AgentEvent> {
        stream.collect().await
    }

    /// One model turn that requests the given tool calls, each with
    /// pre-fragmented JSON arguments, optionally preceded by some text.
    fn tool_turn(
        text: Option<&str>,
        calls: &[(&str, &str, &[&str])],
    ) -> Vec<std::result::Result<StreamEvent, GatewayError>> {
        let mut events = vec![Ok(StreamEvent::MessageStart {
            id: "msg_1".to_string(),
            model: "mock-model".to_string(),
        })];

        let mut index = 0;
        if let Some(text) = text {
            events.push(Ok(StreamEvent::ContentBlockStart {
                index,
                block: BlockStart::Text,
            }));
            events.push(Ok(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::TextDelta(text.to_string()),
            }));
            events.push(Ok(StreamEvent::ContentBlockStop { index }));
            index += 1;
        }

        for (id, name, fragments) in calls {
            events.push(Ok(StreamEvent::ContentBlockStart {
                index,
                block: BlockStart::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                },
            }));
            for fragment in *fragments {
                events.push(Ok(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta(fragment.to_string()),
                }));
            }
            events.push(Ok(StreamEvent::ContentBlockStop { index }));
            index += 1;
        }

        events.push(Ok(StreamEvent::MessageDelta {
            stop_reason: StopReason::ToolUse,
            usage: Usage::new(10, 5),
        }));
        events.push(Ok(StreamEvent::MessageStop));
        events
    }

    fn turn_with(gateway: MockGateway, registry: ToolRegistry) -> Arc<Turn> {
        Arc::new(Turn::new(
            Arc::new(gateway),
            Arc::new(registry),
            AgentConfig::new("mock-model"),
        ))
    }

    fn request() -> TurnRequest {
        TurnRequest::new(
            SessionId::new(),
            ConversationContext::from_history(&[crate::types::ChatMessage::user("hi")]),
        )
    }

    #[tokio::test]
    async fn test_text_only_turn_event_sequence() {
        let turn = turn_with(MockGateway::with_text("Hello!"), ToolRegistry::new());
        let events = collect(stream_turn(turn, request())).await;

        assert_eq!(
            kinds(&events),
            vec!["init", "loop_start", "model_call", "t", "usage", "done"]
        );
        match events.last().unwrap() {
            AgentEvent::Done {
                text,
                tool_calls,
                iterations,
                ..
            } => {
                assert_eq!(text, "Hello!");
                assert_eq!(*tool_calls, 0);
                assert_eq!(*iterations, 1);
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let mut registry = ToolRegistry::new();
        registry.register(
            MockTool::new("lookup_user")
                .with_category("users")
                .with_response(serde_json::json!({"name": "Ada"})),
        );

        let gateway = MockGateway::new(vec![
            tool_turn(
                Some("Checking."),
                &[("call_1", "lookup_user", &["{\"id\":", "42}"])],
            ),
            text_turn("Ada is the user."),
        ]);
        let turn = turn_with(gateway, registry);
        let events = collect(stream_turn(turn, request())).await;

        assert_eq!(
            kinds(&events),
            vec![
                "init",
                "loop_start",
                "model_call",
                "t",
                "usage",
                "tools_start",
                "tool_executing",
                "tool_result",
                "tools_end",
                "loop_start",
                "model_call",
                "t",
                "usage",
                "done",
            ]
        );

        // Fragmented arguments were reassembled before dispatch
        match &events[6] {
            AgentEvent::ToolExecuting { tool, category, args } => {
                assert_eq!(tool, "lookup_user");
                assert_eq!(category, "users");
                assert_eq!(args, &serde_json::json!({"id": 42}));
            }
            other => panic!("expected tool_executing, got {:?}", other),
        }

        match events.last().unwrap() {
            AgentEvent::Done {
                text,
                tool_calls,
                iterations,
                ..
            } => {
                assert_eq!(text, "Checking.Ada is the user.");
                assert_eq!(*tool_calls, 1);
                assert_eq!(*iterations, 2);
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mixed_success_and_failure_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("lookup_user").with_response(serde_json::json!("ok")));
        registry.register(MockTool::new("revoke_token").with_failure("permission denied"));

        let gateway = MockGateway::new(vec![
            tool_turn(
                None,
                &[
                    ("call_1", "lookup_user", &["{}"]),
                    ("call_2", "revoke_token", &["{}"]),
                ],
            ),
            text_turn("Partially done."),
        ]);
        let turn = turn_with(gateway, registry);
        let events = collect(stream_turn(turn, request())).await;

        let dispatch: Vec<_> = kinds(&events)
            .into_iter()
            .skip_while(|k| *k != "tools_start")
            .take_while(|k| *k != "loop_start")
            .collect();
        assert_eq!(
            dispatch,
            vec![
                "tools_start",
                "tool_executing",
                "tool_result",
                "tool_executing",
                "tool_error",
                "tools_end",
            ]
        );

        // The failed call did not end the request
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
        match events.last().unwrap() {
            AgentEvent::Done { tool_calls, .. } => assert_eq!(*tool_calls, 2),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recoverable() {
        let gateway = MockGateway::new(vec![
            tool_turn(None, &[("call_1", "no_such_tool", &["{}"])]),
            text_turn("Could not do that."),
        ]);
        let turn = turn_with(gateway, ToolRegistry::new());
        let events = collect(stream_turn(turn, request())).await;

        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolError { tool, error, .. }
                if tool == "no_such_tool" && error.contains("unknown tool")
        )));
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
    }

    #[tokio::test]
    async fn test_malformed_arguments_fall_back_to_empty_object() {
        let mut registry = ToolRegistry::new();
        let tool = Arc::new(MockTool::new("lookup_user"));
        registry.register_arc(tool.clone());

        let gateway = MockGateway::new(vec![
            tool_turn(None, &[("call_1", "lookup_user", &["definitely not json"])]),
            text_turn("done"),
        ]);
        let turn = turn_with(gateway, registry);
        let events = collect(stream_turn(turn, request())).await;

        assert_eq!(tool.calls(), vec![serde_json::json!({})]);
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
    }

    #[tokio::test]
    async fn test_loop_exhaustion_ends_with_done() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("ping"));

        // The model requests a tool on every iteration, past the budget.
        let turns = (0..5)
            .map(|_| tool_turn(None, &[("call", "ping", &["{}"])]))
            .collect();
        let turn = turn_with(MockGateway::new(turns), registry);
        let events = collect(stream_turn(turn, request())).await;

        let loop_starts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::LoopStart { iteration, .. } => Some(*iteration),
                _ => None,
            })
            .collect();
        assert_eq!(loop_starts, vec![1, 2, 3, 4, 5]);

        match events.last().unwrap() {
            AgentEvent::Done {
                tool_calls,
                iterations,
                ..
            } => {
                assert_eq!(*tool_calls, 5);
                assert_eq!(*iterations, 5);
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gateway_failure_mid_stream_ends_with_err() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("ping"));

        let gateway = MockGateway::new(vec![
            tool_turn(None, &[("call", "ping", &["{}"])]),
            vec![
                Ok(StreamEvent::MessageStart {
                    id: "msg_2".to_string(),
                    model: "mock-model".to_string(),
                }),
                Err(GatewayError::Network("connection reset".to_string())),
            ],
        ]);
        let turn = turn_with(gateway, registry);
        let events = collect(stream_turn(turn, request())).await;

        // Iteration 1 completed normally, iteration 2 died
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolsEnd)));
        match events.last().unwrap() {
            AgentEvent::Error { error } => assert!(error.contains("connection reset")),
            other => panic!("expected err, got {:?}", other),
        }
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_upstream_error_event_is_fatal() {
        let gateway = MockGateway::new(vec![vec![
            Ok(StreamEvent::MessageStart {
                id: "msg_1".to_string(),
                model: "mock-model".to_string(),
            }),
            Ok(StreamEvent::Error {
                message: "overloaded".to_string(),
            }),
        ]]);
        let turn = turn_with(gateway, ToolRegistry::new());
        let events = collect(stream_turn(turn, request())).await;

        match events.last().unwrap() {
            AgentEvent::Error { error } => assert!(error.contains("overloaded")),
            other => panic!("expected err, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event_last() {
        let scenarios: Vec<Arc<Turn>> = vec![
            turn_with(MockGateway::with_text("hi"), ToolRegistry::new()),
            turn_with(MockGateway::new(vec![]), ToolRegistry::new()),
        ];

        for turn in scenarios {
            let events = collect(stream_turn(turn, request())).await;
            let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
            assert_eq!(terminal_count, 1);
            assert!(events.last().unwrap().is_terminal());
        }
    }

    #[tokio::test]
    async fn test_attachments_emit_thinking_and_extend_context() {
        let gateway = MockGateway::with_text("Looks like an invoice.");
        let gateway = Arc::new(gateway);
        let turn = Arc::new(
            Turn::new(
                gateway.clone(),
                Arc::new(ToolRegistry::new()),
                AgentConfig::new("mock-model"),
            )
            .with_media_analyzer(Arc::new(crate::media::NoopMediaAnalyzer)),
        );

        let req = request().with_attachments(vec![Attachment {
            name: "invoice.png".to_string(),
            media_type: "image/png".to_string(),
            data: None,
            url: None,
        }]);
        let events = collect(stream_turn(turn, req)).await;

        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::Thinking { status } if status.contains("invoice.png")
        )));

        // The description was folded into the instructions
        let requests = gateway.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].instructions.contains("invoice.png"));
    }

    #[tokio::test]
    async fn test_transcript_reaches_next_iteration_context() {
        let mut registry = ToolRegistry::new();
        registry.register(
            MockTool::new("lookup_user").with_response(serde_json::json!({"name": "Ada"})),
        );

        let gateway = Arc::new(MockGateway::new(vec![
            tool_turn(None, &[("call_1", "lookup_user", &["{\"id\":42}"])]),
            text_turn("Done."),
        ]));
        let turn = Arc::new(Turn::new(
            gateway.clone(),
            Arc::new(registry),
            AgentConfig::new("mock-model"),
        ));

        collect(stream_turn(turn, request())).await;

        let requests = gateway.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].instructions.contains("Tool invocations"));
        assert!(requests[1].instructions.contains("Tool invocations"));
        assert!(requests[1].instructions.contains("lookup_user"));
        assert!(requests[1].instructions.contains("Ada"));
    }

    #[tokio::test]
    async fn test_system_prompt_prepended_to_instructions() {
        let gateway = Arc::new(MockGateway::with_text("ok"));
        let turn = Arc::new(Turn::new(
            gateway.clone(),
            Arc::new(ToolRegistry::new()),
            AgentConfig::new("mock-model").with_system_prompt("You are an admin assistant."),
        ));

        collect(stream_turn(turn, request())).await;

        let requests = gateway.requests();
        assert!(requests[0].instructions.starts_with("You are an admin assistant."));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_turn() {
        // A gateway turn that never ends on its own would hang the loop;
        // dropping the stream must stop it instead.
        let gateway = MockGateway::new(vec![tool_turn(None, &[("call", "ping", &["{}"])])]);
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("ping"));
        let turn = turn_with(gateway, registry);

        let req = request();
        let cancellation = req.cancellation.clone();
        let mut stream = stream_turn(turn, req);

        // Consume the first event, then walk away.
        let first = stream.next().await.unwrap();
        assert_eq!(first.kind(), "init");
        drop(stream);

        // The drop guard fires as the stream unwinds.
        tokio::time::timeout(std::time::Duration::from_secs(1), cancellation.cancelled())
            .await
            .expect("cancellation token was not triggered by stream drop");
    }
}
