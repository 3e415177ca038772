use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use turnloop_commons::{ErrorCategory, Usage};
use uuid::Uuid;

use super::output::parse_final_output;
use super::types::{
    ContextChunk, SessionError, SessionOutcome, SessionRequest, SessionResult, SessionSettings,
    ToolCallRecord,
};
use crate::budget::BudgetTracker;
use crate::collaborators::{HistoryProvider, SessionTrace, TraceSink};
use crate::llm::backends::BackendSpec;
use crate::llm::factory::{LLMFactory, ProviderConfig};
use crate::llm::invoker::{BackendInvoker, InvocationParams, InvokeError};
use crate::llm::provider::{LLMResponse, Message, ToolCall, ToolDefinition};
use crate::tools::{ERROR_MARKER, ToolGateway, ToolOutput};

/// Runs analysis sessions against any registered backend.
///
/// Holds only shared, read-only state; every session gets its own transcript
/// and budget, so sessions can run concurrently on one orchestrator.
pub struct Orchestrator {
    factory: Arc<LLMFactory>,
    settings: Arc<SessionSettings>,
    history: Option<Arc<dyn HistoryProvider>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
}

impl Orchestrator {
    pub fn new(factory: Arc<LLMFactory>, settings: Arc<SessionSettings>) -> Self {
        Self {
            factory,
            settings,
            history: None,
            trace_sink: None,
        }
    }

    pub fn with_history_provider(mut self, history: Arc<dyn HistoryProvider>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Load the thread's compacted history, then run a session on it.
    ///
    /// A history lookup failure is logged and the session starts without history.
    pub async fn orchestrate_thread(
        &self,
        thread_id: &str,
        mut request: SessionRequest,
        tool_gateway: Arc<dyn ToolGateway>,
        cancel: CancellationToken,
    ) -> Result<SessionResult, SessionError> {
        if let Some(history) = &self.history {
            match history
                .get_history_for_llm(thread_id, &request.user_query)
                .await
            {
                Ok(turns) => request.history = turns,
                Err(err) => {
                    warn!(thread_id, error = %format!("{err:#}"), "failed to load thread history");
                }
            }
        }
        request.thread_id = Some(thread_id.to_owned());
        self.orchestrate(request, tool_gateway, cancel).await
    }

    /// Run one session to completion.
    ///
    /// Only an unknown backend id is reported as an error; every other failure
    /// is folded into the returned [`SessionResult`].
    #[tracing::instrument(name = "session", skip_all, fields(backend = %request.backend_id))]
    pub async fn orchestrate(
        &self,
        request: SessionRequest,
        tool_gateway: Arc<dyn ToolGateway>,
        cancel: CancellationToken,
    ) -> Result<SessionResult, SessionError> {
        let backend_id = request.backend_id.trim().to_ascii_lowercase();
        let spec = self
            .factory
            .spec(&backend_id)
            .ok_or_else(|| SessionError::UnknownBackend(request.backend_id.clone()))?;
        let invoker = self.build_invoker(&backend_id, spec)?;

        let mut run = SessionRun::new(&self.settings, &request, tool_gateway.definitions());
        info!(
            session_id = %run.session_id,
            max_iterations = self.settings.max_iterations,
            tools = run.tools.len(),
            reasoning = invoker.reasoning_mode(),
            "session started"
        );

        let result = run
            .drive(&invoker, tool_gateway.as_ref(), &self.settings, &cancel)
            .await;

        info!(
            session_id = %run.session_id,
            outcome = ?result.outcome,
            iterations = result.iterations,
            tool_calls = result.tool_calls.len(),
            "session finished"
        );
        self.emit_trace(&run, &request, &backend_id, &result);
        Ok(result)
    }

    fn build_invoker(
        &self,
        backend_id: &str,
        spec: BackendSpec,
    ) -> Result<BackendInvoker, SessionError> {
        let backend = self.settings.backend(backend_id);
        let api_key_env = backend
            .api_key_env
            .clone()
            .unwrap_or_else(|| spec.api_key_env.to_owned());
        let api_key = std::env::var(&api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            debug!(backend = backend_id, env = %api_key_env, "no API key in environment");
        }

        let provider = self
            .factory
            .create_provider(
                backend_id,
                ProviderConfig {
                    api_key,
                    base_url: backend.base_url.clone(),
                    model: backend.model.clone(),
                    connect_timeout: Some(self.settings.connect_timeout),
                    request_timeout: Some(self.settings.request_timeout),
                },
            )
            .map_err(|_| SessionError::UnknownBackend(backend_id.to_owned()))?;

        let mut params = InvocationParams::from(&backend);
        params.parallel_tool_calls = Some(self.settings.parallel_tool_calls);

        Ok(BackendInvoker::new(provider, spec, params)
            .with_retry(self.settings.retry)
            .with_request_timeout(self.settings.request_timeout))
    }

    fn emit_trace(
        &self,
        run: &SessionRun,
        request: &SessionRequest,
        backend_id: &str,
        result: &SessionResult,
    ) {
        let Some(sink) = self.trace_sink.clone() else {
            return;
        };
        let trace = SessionTrace {
            session_id: run.session_id,
            thread_id: request.thread_id.clone(),
            backend: backend_id.to_owned(),
            user_query: request.user_query.clone(),
            outcome: result.outcome,
            iterations: result.iterations,
            tool_calls: result.tool_calls.clone(),
            final_text: result.raw_final_text.clone(),
            usage: result.usage.clone(),
        };
        tokio::spawn(async move {
            let session_id = trace.session_id;
            if let Err(err) = sink.record_session(trace).await {
                warn!(%session_id, error = %format!("{err:#}"), "failed to record session trace");
            }
        });
    }
}

/// Render the opening user turn from the query and its context chunks.
pub fn render_user_turn(query: &str, chunks: &[ContextChunk]) -> String {
    let mut rendered = query.trim().to_owned();
    for chunk in chunks {
        rendered.push_str(&format!(
            "\n\n<context source=\"{}\">\n{}\n</context>",
            chunk.source,
            chunk.content.trim_end()
        ));
    }
    rendered
}

enum Planned {
    Dispatch(Value),
    Refused(ToolOutput, bool),
}

/// Mutable state of a single session.
struct SessionRun {
    session_id: Uuid,
    transcript: Vec<Message>,
    budget: BudgetTracker,
    tools: Vec<ToolDefinition>,
    records: Vec<ToolCallRecord>,
    usage: Usage,
    last_text: String,
}

impl SessionRun {
    fn new(settings: &SessionSettings, request: &SessionRequest, tools: Vec<ToolDefinition>) -> Self {
        let mut transcript = Vec::with_capacity(request.history.len() + 2);
        if !settings.system_prompt.trim().is_empty() {
            transcript.push(Message::system(settings.system_prompt.clone()));
        }
        transcript.extend(request.history.iter().cloned());
        transcript.push(Message::user(render_user_turn(
            &request.user_query,
            &request.context_chunks,
        )));

        Self {
            session_id: Uuid::new_v4(),
            transcript,
            budget: BudgetTracker::new(settings.max_iterations, &settings.tool_limits),
            tools,
            records: Vec::new(),
            usage: Usage::default(),
            last_text: String::new(),
        }
    }

    async fn drive(
        &mut self,
        invoker: &BackendInvoker,
        gateway: &dyn ToolGateway,
        settings: &SessionSettings,
        cancel: &CancellationToken,
    ) -> SessionResult {
        loop {
            if cancel.is_cancelled() {
                info!(iteration = self.budget.iterations_used(), "session cancelled");
                return self.cancelled();
            }
            if self.budget.iterations_exhausted() {
                return self.finalize(invoker, settings, cancel).await;
            }

            self.budget.begin_iteration();
            let iteration = self.budget.iterations_used();
            let available = self.budget.available_tools(&self.tools);
            debug!(
                iteration,
                offered = available.as_ref().map_or(0, |tools| tools.len()),
                "invoking backend"
            );

            let response = match invoker.invoke(&self.transcript, available, cancel).await {
                Ok(response) => response,
                Err(err) => return self.failed(invoker.spec(), err),
            };
            self.absorb(&response);

            if !response.has_tool_calls() {
                let final_text = response.content_text().to_owned();
                return self.finish(final_text, SessionOutcome::Completed);
            }
            let calls = response.tool_calls.clone().unwrap_or_default();

            let results = self
                .execute_batch(&calls, &response, iteration, gateway, settings)
                .await;

            self.transcript.push(
                Message::assistant_with_tools(response.content_text().to_owned(), calls)
                    .with_envelope(response.envelope.clone()),
            );
            self.transcript.extend(results);
        }
    }

    fn absorb(&mut self, response: &LLMResponse) {
        if let Some(usage) = &response.usage {
            self.usage.accumulate(usage);
        }
        if let Some(text) = response.content.as_deref().filter(|text| !text.trim().is_empty()) {
            self.last_text = text.to_owned();
        }
    }

    /// Budget-check every call in request order, run the allowed ones, and
    /// return the tool result turns in request order.
    async fn execute_batch(
        &mut self,
        calls: &[ToolCall],
        response: &LLMResponse,
        iteration: u32,
        gateway: &dyn ToolGateway,
        settings: &SessionSettings,
    ) -> Vec<Message> {
        let planned: Vec<Planned> = calls
            .iter()
            .map(|call| self.plan(call))
            .collect();

        let dispatch: Vec<(usize, &str, Value)> = planned
            .iter()
            .zip(calls)
            .enumerate()
            .filter_map(|(index, (plan, call))| match plan {
                Planned::Dispatch(args) => Some((index, call.name(), args.clone())),
                Planned::Refused(..) => None,
            })
            .collect();

        let mut executed: Vec<Option<(ToolOutput, Duration)>> = vec![None; calls.len()];
        if settings.parallel_tool_calls && dispatch.len() > 1 {
            let outputs = join_all(
                dispatch
                    .iter()
                    .map(|(_, name, args)| run_tool(gateway, name, args.clone())),
            )
            .await;
            for ((index, _, _), output) in dispatch.iter().zip(outputs) {
                executed[*index] = Some(output);
            }
        } else {
            for (index, name, args) in &dispatch {
                executed[*index] = Some(run_tool(gateway, name, args.clone()).await);
            }
        }

        let mut attributed = response
            .reasoning
            .clone()
            .or_else(|| response.content.clone())
            .filter(|text| !text.trim().is_empty());

        let mut turns = Vec::with_capacity(calls.len());
        for ((call, plan), outcome) in calls.iter().zip(planned).zip(executed) {
            let (output, denied, duration) = match (plan, outcome) {
                (Planned::Refused(output, denied), _) => (output, denied, Duration::ZERO),
                (Planned::Dispatch(_), Some((output, duration))) => (output, false, duration),
                (Planned::Dispatch(_), None) => {
                    (ToolOutput::failure("tool was not executed"), false, Duration::ZERO)
                }
            };
            let success = output.effective_success();
            let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

            info!(
                iteration,
                tool = call.name(),
                call_id = %call.id,
                success,
                denied,
                duration_ms,
                "tool call finished"
            );

            self.records.push(ToolCallRecord {
                iteration,
                call_id: call.id.clone(),
                tool_name: call.name().to_owned(),
                arguments: call.function.arguments.clone(),
                output: output.output.clone(),
                success,
                denied,
                duration_ms,
                attributed_text: attributed.take(),
            });
            turns.push(
                Message::tool_response(call.id.clone(), call.name().to_owned(), output.output)
                    .with_success(success),
            );
        }
        turns
    }

    /// Decide, in request order, whether a call may reach the gateway.
    fn plan(&mut self, call: &ToolCall) -> Planned {
        let name = call.name();
        if !self.budget.can_use(name) {
            // usage saturates at the ceiling
            let limit = self.budget.used(name);
            warn!(tool = name, call_id = %call.id, limit, "tool budget exhausted");
            return Planned::Refused(
                ToolOutput {
                    output: format!(
                        "{ERROR_MARKER} {name} limit reached for this session ({limit} call(s) allowed). \
                         Do not call {name} again; continue with the information already gathered."
                    ),
                    success: false,
                },
                true,
            );
        }

        match call.parsed_arguments() {
            Ok(args) => {
                self.budget.consume(name);
                Planned::Dispatch(args)
            }
            Err(err) => {
                warn!(tool = name, call_id = %call.id, error = %err, "malformed tool arguments");
                Planned::Refused(
                    ToolOutput::failure(format!("invalid JSON arguments for {name}: {err}")),
                    false,
                )
            }
        }
    }

    async fn finalize(
        &mut self,
        invoker: &BackendInvoker,
        settings: &SessionSettings,
        cancel: &CancellationToken,
    ) -> SessionResult {
        info!(
            iterations = self.budget.iterations_used(),
            "iteration limit reached; forcing final answer"
        );
        self.transcript
            .push(Message::user(settings.finalization_prompt.clone()));

        match invoker.invoke(&self.transcript, None, cancel).await {
            Ok(response) => {
                self.absorb(&response);
                let text = response
                    .content
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| self.last_text.clone());
                self.finish(text, SessionOutcome::ForcedFinalization)
            }
            Err(err) if self.last_text.trim().is_empty() => self.failed(invoker.spec(), err),
            Err(err) => {
                warn!(error = %err, "final answer request failed; using last model text");
                let text = self.last_text.clone();
                self.finish(text, SessionOutcome::ForcedFinalization)
            }
        }
    }

    fn finish(&mut self, final_text: String, outcome: SessionOutcome) -> SessionResult {
        let parsed = parse_final_output(&final_text);
        if !parsed.structured {
            debug!("final answer had no analysis/instruction structure");
        }
        SessionResult {
            analysis: parsed.analysis,
            instruction: parsed.instruction,
            tool_calls: std::mem::take(&mut self.records),
            raw_final_text: final_text,
            outcome,
            iterations: self.budget.iterations_used(),
            usage: self.usage.clone(),
        }
    }

    fn failed(&mut self, spec: &BackendSpec, err: InvokeError) -> SessionResult {
        if err.category == ErrorCategory::Cancelled {
            return self.cancelled();
        }
        warn!(
            backend = spec.id,
            category = %err.category,
            attempts = err.attempts,
            error = %err.source,
            "backend request failed; ending session"
        );
        let completed = self.records.len();
        SessionResult {
            analysis: format!(
                "The session ended early because the {} backend request failed after {} attempt(s): {} ({}). {} tool call(s) completed before the failure.",
                spec.id,
                err.attempts,
                err.category.user_label(),
                err.source,
                completed
            ),
            instruction: String::new(),
            tool_calls: std::mem::take(&mut self.records),
            raw_final_text: self.last_text.clone(),
            outcome: SessionOutcome::BackendFailure {
                category: err.category,
            },
            iterations: self.budget.iterations_used(),
            usage: self.usage.clone(),
        }
    }

    fn cancelled(&mut self) -> SessionResult {
        SessionResult {
            analysis: format!(
                "The session was cancelled after {} iteration(s).",
                self.budget.iterations_used()
            ),
            instruction: String::new(),
            tool_calls: std::mem::take(&mut self.records),
            raw_final_text: self.last_text.clone(),
            outcome: SessionOutcome::Cancelled,
            iterations: self.budget.iterations_used(),
            usage: self.usage.clone(),
        }
    }
}

async fn run_tool(gateway: &dyn ToolGateway, name: &str, args: Value) -> (ToolOutput, Duration) {
    let started = Instant::now();
    let output = match gateway.execute(name, args).await {
        Ok(output) => output,
        Err(err) => {
            warn!(tool = name, error = %format!("{err:#}"), "tool gateway failed");
            ToolOutput::failure(format!("{err:#}"))
        }
    };
    (output, started.elapsed())
}
