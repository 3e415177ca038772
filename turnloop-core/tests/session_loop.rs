use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use turnloop_commons::{ErrorCategory, FinishReason};
use turnloop_core::llm::provider::LLMErrorMetadata;
use turnloop_core::llm::{BackendFamily, ReasoningParam, RetryPolicy, WireFormat};
use turnloop_core::{
    BackendSpec, HistoryProvider, LLMError, LLMFactory, LLMProvider, LLMRequest, LLMResponse,
    Message, MessageRole, Orchestrator, SessionError, SessionOutcome, SessionRequest,
    SessionSettings, SessionTrace, ToolCall, ToolDefinition, ToolGateway, ToolOutput, TraceSink,
};

const SCRIPTED: BackendSpec = BackendSpec {
    id: "scripted",
    family: BackendFamily::D,
    wire: WireFormat::OpenAiChat,
    default_base_url: "http://127.0.0.1:9",
    default_model: "scripted-1",
    api_key_env: "TURNLOOP_SCRIPTED_API_KEY",
    dropped_in_reasoning: &[],
    reasoning_param: ReasoningParam::ReasoningEffortField,
};

type Script = Arc<Mutex<VecDeque<Result<LLMResponse, LLMError>>>>;

/// Replays canned responses and records every request it receives.
struct ScriptedProvider {
    script: Script,
    requests: Arc<Mutex<Vec<LLMRequest>>>,
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        SCRIPTED.id
    }

    fn default_model(&self) -> &str {
        SCRIPTED.default_model
    }

    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        self.requests.lock().expect("requests lock").push(request);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Ok(LLMResponse::text("script exhausted")))
    }
}

struct Harness {
    orchestrator: Orchestrator,
    requests: Arc<Mutex<Vec<LLMRequest>>>,
}

impl Harness {
    fn new(settings: SessionSettings, script: Vec<Result<LLMResponse, LLMError>>) -> Self {
        let script: Script = Arc::new(Mutex::new(script.into()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let mut factory = LLMFactory::new();
        let (shared_script, shared_requests) = (Arc::clone(&script), Arc::clone(&requests));
        factory.register_provider(SCRIPTED, move |_config| {
            Box::new(ScriptedProvider {
                script: Arc::clone(&shared_script),
                requests: Arc::clone(&shared_requests),
            })
        });

        Self {
            orchestrator: Orchestrator::new(Arc::new(factory), Arc::new(settings)),
            requests,
        }
    }

    fn requests(&self) -> Vec<LLMRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingGateway {
    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ToolGateway for RecordingGateway {
    fn definitions(&self) -> Vec<ToolDefinition> {
        ["web_search", "read_file", "explode"]
            .into_iter()
            .map(|name| {
                ToolDefinition::function(
                    name.to_owned(),
                    format!("{name} tool"),
                    json!({"type": "object"}),
                )
            })
            .collect()
    }

    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<ToolOutput> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((tool_name.to_owned(), arguments.clone()));
        if tool_name == "explode" {
            bail!("sandbox unavailable");
        }
        Ok(ToolOutput::success(format!("{tool_name} result for {arguments}")))
    }
}

fn settings() -> SessionSettings {
    SessionSettings {
        max_iterations: 4,
        tool_limits: BTreeMap::from([("web_search".to_owned(), 3)]),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..SessionSettings::default()
    }
}

fn tool_turn(calls: &[(&str, &str, &str)]) -> Result<LLMResponse, LLMError> {
    Ok(LLMResponse {
        content: None,
        tool_calls: Some(
            calls
                .iter()
                .map(|(id, name, args)| {
                    ToolCall::function((*id).to_owned(), (*name).to_owned(), (*args).to_owned())
                })
                .collect(),
        ),
        finish_reason: FinishReason::ToolCalls,
        ..LLMResponse::text("")
    })
}

fn answer(text: &str) -> Result<LLMResponse, LLMError> {
    Ok(LLMResponse::text(text))
}

fn unavailable() -> Result<LLMResponse, LLMError> {
    Err(LLMError::Provider {
        message: "HTTP 503".into(),
        metadata: Some(LLMErrorMetadata::new(
            "scripted",
            Some(503),
            None,
            None,
            None,
            Some("overloaded".into()),
        )),
    })
}

fn offered(request: &LLMRequest) -> Vec<String> {
    request
        .tools
        .as_deref()
        .map(|tools| {
            tools
                .iter()
                .map(|tool| tool.function_name().to_owned())
                .collect()
        })
        .unwrap_or_default()
}

async fn run(harness: &Harness, gateway: Arc<RecordingGateway>) -> turnloop_core::SessionResult {
    harness
        .orchestrator
        .orchestrate(
            SessionRequest::new("scripted", "Why is the deploy slow?"),
            gateway,
            CancellationToken::new(),
        )
        .await
        .expect("known backend")
}

#[tokio::test]
async fn answer_without_tools_completes_in_one_iteration() {
    let harness = Harness::new(
        settings(),
        vec![answer(
            "<analysis>The image is rebuilt on every deploy.</analysis>\n<instruction>Cache the base layer.</instruction>",
        )],
    );
    let gateway = Arc::new(RecordingGateway::default());

    let result = run(&harness, Arc::clone(&gateway)).await;

    assert_eq!(result.outcome, SessionOutcome::Completed);
    assert_eq!(result.analysis, "The image is rebuilt on every deploy.");
    assert_eq!(result.instruction, "Cache the base layer.");
    assert_eq!(result.iterations, 1);
    assert!(result.tool_calls.is_empty());
    assert!(gateway.calls().is_empty());

    let requests = harness.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        offered(&requests[0]),
        vec!["web_search", "read_file", "explode"]
    );
    assert_eq!(requests[0].messages[0].role, MessageRole::System);
    assert_eq!(requests[0].messages[1].content, "Why is the deploy slow?");
}

#[tokio::test]
async fn tool_results_follow_the_assistant_turn_in_request_order() {
    let harness = Harness::new(
        settings(),
        vec![
            tool_turn(&[
                ("c1", "read_file", r#"{"path":"deploy.yml"}"#),
                ("c2", "web_search", r#"{"query":"slow docker build"}"#),
            ]),
            answer("done"),
        ],
    );
    let gateway = Arc::new(RecordingGateway::default());

    let result = run(&harness, Arc::clone(&gateway)).await;

    assert_eq!(result.outcome, SessionOutcome::Completed);
    assert_eq!(result.iterations, 2);
    let ids: Vec<_> = result.tool_calls.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert!(result.tool_calls.iter().all(|record| record.success));

    let second = &harness.requests()[1];
    let tail: Vec<_> = second
        .messages
        .iter()
        .skip(2)
        .map(|message| (message.role, message.tool_call_id.clone()))
        .collect();
    assert_eq!(
        tail,
        vec![
            (MessageRole::Assistant, None),
            (MessageRole::Tool, Some("c1".to_owned())),
            (MessageRole::Tool, Some("c2".to_owned())),
        ]
    );
    assert_eq!(second.messages[2].get_tool_calls().map(<[_]>::len), Some(2));
    let flags: Vec<_> = second.messages[3..].iter().map(|m| m.success).collect();
    assert_eq!(flags, vec![Some(true), Some(true)]);
}

/// Finishes each call after the delay given in its `delay_ms` argument.
#[derive(Default)]
struct StaggeredGateway {
    completed: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolGateway for StaggeredGateway {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::function(
            "read_file".to_owned(),
            "read_file tool".to_owned(),
            json!({"type": "object"}),
        )]
    }

    async fn execute(&self, _tool_name: &str, arguments: Value) -> Result<ToolOutput> {
        let delay = arguments["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        let path = arguments["path"].as_str().unwrap_or_default().to_owned();
        self.completed.lock().expect("completed lock").push(path.clone());
        Ok(ToolOutput::success(format!("contents of {path}")))
    }
}

#[tokio::test]
async fn parallel_results_keep_request_order_when_completion_order_differs() {
    let harness = Harness::new(
        SessionSettings {
            parallel_tool_calls: true,
            ..settings()
        },
        vec![
            tool_turn(&[
                ("c1", "read_file", r#"{"path":"slow.log","delay_ms":300}"#),
                ("c2", "read_file", r#"{"path":"fast.log","delay_ms":0}"#),
            ]),
            answer("done"),
        ],
    );
    let gateway = Arc::new(StaggeredGateway::default());

    let result = harness
        .orchestrator
        .orchestrate(
            SessionRequest::new("scripted", "Compare the logs"),
            Arc::clone(&gateway) as Arc<dyn ToolGateway>,
            CancellationToken::new(),
        )
        .await
        .expect("known backend");

    assert_eq!(
        *gateway.completed.lock().expect("completed lock"),
        vec!["fast.log", "slow.log"]
    );

    let ids: Vec<_> = result.tool_calls.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);

    let second = &harness.requests()[1];
    let tool_turns: Vec<_> = second
        .messages
        .iter()
        .filter(|message| message.role == MessageRole::Tool)
        .map(|message| (message.tool_call_id.clone(), message.content.clone()))
        .collect();
    assert_eq!(
        tool_turns,
        vec![
            (Some("c1".to_owned()), "contents of slow.log".to_owned()),
            (Some("c2".to_owned()), "contents of fast.log".to_owned()),
        ]
    );
}

#[tokio::test]
async fn web_search_over_budget_is_denied_without_dispatch() {
    let harness = Harness::new(
        SessionSettings {
            tool_limits: BTreeMap::from([("web_search".to_owned(), 1)]),
            ..settings()
        },
        vec![
            tool_turn(&[
                ("s1", "web_search", r#"{"query":"a"}"#),
                ("s2", "web_search", r#"{"query":"b"}"#),
            ]),
            answer("done"),
        ],
    );
    let gateway = Arc::new(RecordingGateway::default());

    let result = run(&harness, Arc::clone(&gateway)).await;

    let calls = gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ("web_search".to_owned(), json!({"query": "a"})));

    assert_eq!(result.tool_calls.len(), 2);
    assert!(result.tool_calls[0].success);
    assert!(!result.tool_calls[0].denied);
    let denied = &result.tool_calls[1];
    assert!(denied.denied);
    assert!(!denied.success);
    assert!(denied.output.starts_with("Error: web_search limit reached"));

    let requests = harness.requests();
    assert_eq!(offered(&requests[1]), vec!["read_file", "explode"]);
    let denial_turn = requests[1]
        .messages
        .iter()
        .find(|message| message.tool_call_id.as_deref() == Some("s2"))
        .expect("denial is reported to the model");
    assert_eq!(denial_turn.content, denied.output);
    assert_eq!(denial_turn.success, Some(false));
}

#[tokio::test]
async fn iteration_ceiling_forces_a_tools_free_answer() {
    let harness = Harness::new(
        SessionSettings {
            max_iterations: 2,
            ..settings()
        },
        vec![
            tool_turn(&[("c1", "read_file", "{}")]),
            tool_turn(&[("c2", "read_file", "{}")]),
            answer("## Analysis\nLogs are flushed synchronously.\n## Instruction\nBuffer the writer."),
        ],
    );
    let gateway = Arc::new(RecordingGateway::default());

    let result = run(&harness, Arc::clone(&gateway)).await;

    assert_eq!(result.outcome, SessionOutcome::ForcedFinalization);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.analysis, "Logs are flushed synchronously.");
    assert_eq!(result.instruction, "Buffer the writer.");

    let requests = harness.requests();
    assert_eq!(requests.len(), 3);
    let last = &requests[2];
    assert!(last.tools.is_none());
    let prompt = last.messages.last().expect("finalization prompt");
    assert_eq!(prompt.role, MessageRole::User);
    assert_eq!(prompt.content, settings().finalization_prompt);
}

#[tokio::test]
async fn forced_answer_with_tool_calls_falls_back_to_last_text() {
    let harness = Harness::new(
        SessionSettings {
            max_iterations: 1,
            ..settings()
        },
        vec![
            Ok(LLMResponse {
                content: Some("Checking the config first.".into()),
                ..tool_turn(&[("c1", "read_file", "{}")]).expect("tool turn")
            }),
            tool_turn(&[("c2", "read_file", "{}")]),
        ],
    );
    let gateway = Arc::new(RecordingGateway::default());

    let result = run(&harness, gateway).await;

    assert_eq!(result.outcome, SessionOutcome::ForcedFinalization);
    assert_eq!(result.raw_final_text, "Checking the config first.");
    assert_eq!(result.tool_calls.len(), 1);
}

#[tokio::test]
async fn exhausted_retries_end_the_session_with_completed_calls_kept() {
    let harness = Harness::new(
        settings(),
        vec![
            tool_turn(&[("c1", "read_file", "{}")]),
            unavailable(),
            unavailable(),
            unavailable(),
        ],
    );
    let gateway = Arc::new(RecordingGateway::default());

    let result = run(&harness, gateway).await;

    assert_eq!(
        result.outcome,
        SessionOutcome::BackendFailure {
            category: ErrorCategory::ServiceUnavailable
        }
    );
    assert!(result.analysis.contains("failed after 3 attempt(s)"));
    assert!(result.analysis.contains("1 tool call(s) completed"));
    assert_eq!(result.instruction, "");
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(harness.requests().len(), 4);
}

#[tokio::test]
async fn malformed_arguments_and_gateway_errors_become_failed_results() {
    let harness = Harness::new(
        settings(),
        vec![
            tool_turn(&[
                ("bad", "web_search", "{not json"),
                ("boom", "explode", "{}"),
            ]),
            answer("done"),
        ],
    );
    let gateway = Arc::new(RecordingGateway::default());

    let result = run(&harness, Arc::clone(&gateway)).await;

    assert_eq!(result.outcome, SessionOutcome::Completed);
    let names: Vec<_> = gateway.calls().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["explode"]);

    let malformed = &result.tool_calls[0];
    assert!(!malformed.success);
    assert!(!malformed.denied);
    assert!(malformed.output.starts_with("Error: invalid JSON arguments for web_search"));

    let failed = &result.tool_calls[1];
    assert!(!failed.success);
    assert_eq!(failed.output, "Error: sandbox unavailable");
}

#[tokio::test]
async fn reasoning_is_attributed_to_the_first_call_of_a_batch() {
    let harness = Harness::new(
        settings(),
        vec![
            Ok(LLMResponse {
                reasoning: Some("Need the config and the logs.".into()),
                ..tool_turn(&[("c1", "read_file", "{}"), ("c2", "read_file", "{}")])
                    .expect("tool turn")
            }),
            answer("done"),
        ],
    );

    let result = run(&harness, Arc::new(RecordingGateway::default())).await;

    assert_eq!(
        result.tool_calls[0].attributed_text.as_deref(),
        Some("Need the config and the logs.")
    );
    assert_eq!(result.tool_calls[1].attributed_text, None);
}

#[tokio::test]
async fn unknown_backend_fails_fast() {
    let harness = Harness::new(settings(), Vec::new());
    let err = harness
        .orchestrator
        .orchestrate(
            SessionRequest::new("nonexistent", "q"),
            Arc::new(RecordingGateway::default()),
            CancellationToken::new(),
        )
        .await
        .expect_err("unknown backend");
    assert!(matches!(err, SessionError::UnknownBackend(id) if id == "nonexistent"));
    assert!(harness.requests().is_empty());
}

#[tokio::test]
async fn cancelled_session_makes_no_requests() {
    let harness = Harness::new(settings(), vec![answer("never")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = harness
        .orchestrator
        .orchestrate(
            SessionRequest::new("scripted", "q"),
            Arc::new(RecordingGateway::default()),
            cancel,
        )
        .await
        .expect("known backend");

    assert_eq!(result.outcome, SessionOutcome::Cancelled);
    assert_eq!(result.iterations, 0);
    assert!(harness.requests().is_empty());
}

struct ChannelSink(mpsc::UnboundedSender<SessionTrace>);

#[async_trait]
impl TraceSink for ChannelSink {
    async fn record_session(&self, trace: SessionTrace) -> Result<()> {
        self.0.send(trace)?;
        Ok(())
    }
}

struct FixedHistory;

#[async_trait]
impl HistoryProvider for FixedHistory {
    async fn get_history_for_llm(
        &self,
        thread_id: &str,
        _current_query: &str,
    ) -> Result<Vec<Message>> {
        Ok(vec![
            Message::user(format!("earlier question in {thread_id}")),
            Message::assistant("earlier answer".into()),
        ])
    }
}

#[tokio::test]
async fn thread_history_precedes_the_query_and_trace_is_recorded() {
    let harness = Harness::new(settings(), vec![answer("done")]);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let Harness {
        orchestrator,
        requests,
    } = harness;
    let orchestrator = orchestrator
        .with_history_provider(Arc::new(FixedHistory))
        .with_trace_sink(Arc::new(ChannelSink(sender)));

    let result = orchestrator
        .orchestrate_thread(
            "thread-7",
            SessionRequest::new("scripted", "And now?"),
            Arc::new(RecordingGateway::default()),
            CancellationToken::new(),
        )
        .await
        .expect("known backend");
    assert_eq!(result.outcome, SessionOutcome::Completed);

    let requests = requests.lock().expect("requests lock").clone();
    let contents: Vec<_> = requests[0]
        .messages
        .iter()
        .skip(1)
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(
        contents,
        vec!["earlier question in thread-7", "earlier answer", "And now?"]
    );

    let trace = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("trace arrives")
        .expect("sender alive");
    assert_eq!(trace.thread_id.as_deref(), Some("thread-7"));
    assert_eq!(trace.backend, "scripted");
    assert_eq!(trace.final_text, "done");
}
