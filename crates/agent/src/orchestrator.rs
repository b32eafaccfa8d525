//! The orchestrator loop: one streaming turn, start to finish.
//!
//! A turn moves through these phases:
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!       Streaming ──(gate opens: Call)──► ToolExecuting ─┤
//!        │   │  └───(gate opens: Duplicate)────────────►│ IterationBoundary
//!        │   └──(gate opens: LimitExceeded)──► Terminated
//!        └──(stream ends, no tool request)──► Finalizing
//! ```
//!
//! Per chunk: extract the last complete JSON object, emit mood/content
//! deltas, detect a tool request (at most one per response), then check
//! the sentence gate against the pending tool. End of stream also opens the
//! gate. Every event reaches the caller in production order, and
//! [`TurnEvent::Done`] is always last unless the caller hung up.

use std::sync::Arc;
use std::time::Duration;

use cabm_config::AgentConfig;
use cabm_core::character::Character;
use cabm_core::error::{ProviderError, ToolError};
use cabm_core::history::HistoryStore;
use cabm_core::message::{Message, Role};
use cabm_core::options::OptionGenerator;
use cabm_core::provider::{CompletionRequest, Provider};
use cabm_core::tool::ToolRegistry;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::context::{ContextAssembler, IterationState, tool_guide};
use crate::delta::{Delta, DeltaTracker};
use crate::envelope::{Envelope, ToolRequest};
use crate::extractor::extract_last_object;
use crate::governor::Admission;
use crate::notice;
use crate::sentence::is_sentence_boundary;
use crate::stream_event::TurnEvent;

/// Tool rounds allowed per turn when nothing else is configured.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Tunables shared by every turn an orchestrator runs.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub max_iterations: u32,
    pub tools_enabled_by_default: bool,
    pub tool_result_max_chars: usize,
    pub chunk_timeout: Duration,
    pub tool_timeout: Duration,
    /// Follow-up options that take longer are dropped.
    pub option_timeout: Duration,
    /// Prior messages loaded into the frozen base.
    pub history_window: usize,
    pub suggest_options: bool,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tools_enabled_by_default: false,
            tool_result_max_chars: 800,
            chunk_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            option_timeout: Duration::from_secs(20),
            history_window: 200,
            suggest_options: true,
        }
    }
}

impl From<&AgentConfig> for TurnSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_ai_iterations,
            tools_enabled_by_default: config.tools_enabled_by_default,
            tool_result_max_chars: config.tool_result_max_chars,
            chunk_timeout: config.chunk_timeout(),
            tool_timeout: config.tool_timeout(),
            option_timeout: config.option_timeout(),
            history_window: config.history_window,
            suggest_options: config.suggest_options,
        }
    }
}

/// One user-initiated exchange.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_message: String,
    pub tools_enabled: bool,
    pub max_iterations: u32,
}

impl Turn {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            tools_enabled: false,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_tools(mut self, enabled: bool) -> Self {
        self.tools_enabled = enabled;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }
}

/// States of the turn state machine, recorded in order of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Streaming,
    ToolExecuting,
    IterationBoundary,
    Finalizing,
    Terminated,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A tool-free envelope was finalized; `content` is what was persisted.
    Finalized { content: String },
    /// The governor refused further tool rounds.
    LimitReached,
    /// Upstream failure or timeout; an error event was emitted.
    Failed(String),
    /// The caller stopped listening.
    Cancelled,
}

/// Terminal failures of a turn.
#[derive(Debug, Error)]
pub enum TurnFailure {
    #[error("Provider error: {0}")]
    Upstream(#[from] ProviderError),

    #[error("No response from the model within {0}s")]
    ChunkTimeout(u64),

    #[error("Tool '{tool}' did not finish within {secs}s")]
    ToolTimeout { tool: String, secs: u64 },
}

/// What happened during a turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub turn_id: String,
    pub outcome: TurnOutcome,
    pub phases: Vec<TurnPhase>,
    /// Completion calls issued.
    pub completions: usize,
    /// Tools actually invoked (duplicates and refusals excluded).
    pub tool_calls: usize,
    /// Assistant JSON objects that carried a tool request.
    pub tool_request_history: Vec<String>,
}

impl TurnReport {
    fn new(turn_id: String) -> Self {
        Self {
            turn_id,
            outcome: TurnOutcome::Cancelled,
            phases: Vec::new(),
            completions: 0,
            tool_calls: 0,
            tool_request_history: Vec::new(),
        }
    }

    fn enter(&mut self, phase: TurnPhase) {
        debug!(turn_id = %self.turn_id, phase = ?phase, "Turn phase");
        self.phases.push(phase);
    }

    pub fn count(&self, phase: TurnPhase) -> usize {
        self.phases.iter().filter(|p| **p == phase).count()
    }
}

/// Events and report of a turn run to completion.
#[derive(Debug, Clone)]
pub struct TurnTranscript {
    pub events: Vec<TurnEvent>,
    pub report: TurnReport,
}

/// Why the inner loop stopped early.
enum Halt {
    Cancelled,
    Failed(TurnFailure),
}

impl From<TurnFailure> for Halt {
    fn from(failure: TurnFailure) -> Self {
        Self::Failed(failure)
    }
}

/// How one streamed iteration ended.
enum IterationEnd {
    Continue,
    Limit,
    Final { content: String },
}

/// A tool request waiting for the sentence gate.
enum PendingTool {
    Call(ToolRequest),
    Duplicate(ToolRequest),
    LimitExceeded,
}

/// Drives turns against a completion source, a tool registry and a history
/// store. Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolRegistry>,
    history: Arc<dyn HistoryStore>,
    options: Option<Arc<dyn OptionGenerator>>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    character: Character,
    settings: TurnSettings,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolRegistry>,
        history: Arc<dyn HistoryStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            tools,
            history,
            options: None,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            character: Character::default(),
            settings: TurnSettings::default(),
        }
    }

    /// Attach a follow-up option generator.
    pub fn with_options(mut self, options: Arc<dyn OptionGenerator>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_character(mut self, character: Character) -> Self {
        self.character = character;
        self
    }

    pub fn with_settings(mut self, settings: TurnSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// A turn using the configured defaults, optionally overriding whether
    /// tools are enabled.
    pub fn turn(&self, user_message: impl Into<String>, tools_enabled: Option<bool>) -> Turn {
        Turn::new(user_message)
            .with_tools(tools_enabled.unwrap_or(self.settings.tools_enabled_by_default))
            .with_max_iterations(self.settings.max_iterations)
    }

    /// Run a turn on a background task and return its event stream.
    ///
    /// Dropping the receiver cancels the turn.
    pub fn run_stream(&self, turn: Turn) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(128);
        let this = self.clone();
        tokio::spawn(async move {
            this.run_turn(turn, &tx).await;
        });
        rx
    }

    /// Run a turn to completion and collect every event.
    pub async fn run_collect(&self, turn: Turn) -> TurnTranscript {
        let (tx, mut rx) = mpsc::channel(128);
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_turn(turn, &tx).await });

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                let mut report = TurnReport::new(String::new());
                report.outcome = TurnOutcome::Failed(format!("turn task failed: {e}"));
                report
            }
        };
        TurnTranscript { events, report }
    }

    /// Run a turn, pushing events into `tx`. Always ends with
    /// [`TurnEvent::Done`] unless the receiver was dropped.
    pub async fn run_turn(&self, turn: Turn, tx: &mpsc::Sender<TurnEvent>) -> TurnReport {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let mut report = TurnReport::new(turn_id.clone());

        info!(
            turn_id = %turn_id,
            tools = turn.tools_enabled,
            max_iterations = turn.max_iterations,
            "Turn started"
        );

        let outcome = match self.drive(&turn, &mut report, tx).await {
            Ok(outcome) => outcome,
            Err(Halt::Cancelled) => TurnOutcome::Cancelled,
            Err(Halt::Failed(failure)) => {
                warn!(turn_id = %turn_id, error = %failure, "Turn failed");
                report.enter(TurnPhase::Terminated);
                let message = failure.to_string();
                let _ = tx.send(TurnEvent::Error(message.clone())).await;
                TurnOutcome::Failed(message)
            }
        };

        if outcome == TurnOutcome::Cancelled {
            info!(turn_id = %turn_id, "Turn cancelled by caller");
        } else {
            let _ = tx.send(TurnEvent::Done).await;
        }

        info!(
            turn_id = %turn_id,
            outcome = ?outcome,
            completions = report.completions,
            tool_calls = report.tool_calls,
            "Turn finished"
        );
        report.outcome = outcome;
        report
    }

    async fn drive(
        &self,
        turn: &Turn,
        report: &mut TurnReport,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome, Halt> {
        // Prior history is read before the new message lands in it
        let prior = self.load_history().await;
        self.persist(Role::User, &turn.user_message).await;

        let guide = if turn.tools_enabled {
            tool_guide(&self.tools.descriptors())
        } else {
            None
        };
        let assembler = ContextAssembler::freeze(
            &self.character.system_prompt,
            guide,
            prior,
            &turn.user_message,
        );
        let mut state = IterationState::new(turn.max_iterations);

        loop {
            report.enter(TurnPhase::Streaming);
            let messages = assembler.assemble(&state);
            let end = self
                .stream_iteration(turn, messages, &mut state, report, tx)
                .await;
            report.tool_request_history = state
                .tool_request_history
                .iter()
                .map(|m| m.content.clone())
                .collect();

            match end? {
                IterationEnd::Continue => report.enter(TurnPhase::IterationBoundary),
                IterationEnd::Limit => {
                    report.enter(TurnPhase::Terminated);
                    return Ok(TurnOutcome::LimitReached);
                }
                IterationEnd::Final { content } => {
                    report.enter(TurnPhase::Finalizing);
                    self.finalize(turn, &content, tx).await?;
                    return Ok(TurnOutcome::Finalized { content });
                }
            }
        }
    }

    /// Consume one completion stream.
    async fn stream_iteration(
        &self,
        turn: &Turn,
        messages: Vec<Message>,
        state: &mut IterationState,
        report: &mut TurnReport,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<IterationEnd, Halt> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        report.completions += 1;
        debug!(
            turn_id = %report.turn_id,
            iteration = report.completions,
            messages = request.messages.len(),
            tool_context = state.has_tool_context,
            "Requesting completion"
        );

        let mut rx = self.provider.stream(request).await.map_err(TurnFailure::from)?;

        let mut full_text = String::new();
        let mut tracker = DeltaTracker::new();
        let mut last_envelope: Option<Envelope> = None;
        let mut pending: Option<PendingTool> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => return Err(Halt::Cancelled),
                next = tokio::time::timeout(self.settings.chunk_timeout, rx.recv()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    return Err(TurnFailure::ChunkTimeout(self.settings.chunk_timeout.as_secs()).into());
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(TurnFailure::Upstream(e).into()),
                Ok(Some(Ok(chunk))) => chunk,
            };

            if !chunk.content.is_empty() {
                full_text.push_str(&chunk.content);

                match extract_last_object(&full_text).map(|json| (json, Envelope::parse(json))) {
                    Some((json, Some(envelope))) => {
                        for delta in tracker.observe(&envelope) {
                            let event = match delta {
                                Delta::Mood(mood) => TurnEvent::Mood(mood),
                                Delta::Content(text) => TurnEvent::Content(text),
                            };
                            emit(tx, event).await?;
                        }

                        if pending.is_none()
                            && turn.tools_enabled
                            && let Some(request) = &envelope.tool_request
                        {
                            tracker.suspend();
                            state.record_tool_request(json);
                            let admission = state.governor.admit(&request.name, &request.args);
                            debug!(
                                turn_id = %report.turn_id,
                                tool = %request.name,
                                admission = ?admission,
                                round = state.governor.iteration_count(),
                                "Tool request detected"
                            );
                            pending = Some(match admission {
                                Admission::Call => PendingTool::Call(request.clone()),
                                Admission::Duplicate => PendingTool::Duplicate(request.clone()),
                                Admission::LimitExceeded => PendingTool::LimitExceeded,
                            });
                        }

                        last_envelope = Some(envelope);
                    }
                    _ => trace!(bytes = full_text.len(), "No complete envelope yet"),
                }
            }

            if pending.is_some() && is_sentence_boundary(tracker.emitted_content()) {
                break;
            }
            if chunk.done {
                break;
            }
        }

        // Nothing more is read from this stream
        drop(rx);

        if let Some(tool) = pending {
            return self.resolve(tool, turn, state, report, tx).await;
        }

        let content = match last_envelope {
            Some(envelope) => envelope.content.unwrap_or_default(),
            None => {
                if !full_text.trim().is_empty() {
                    warn!(turn_id = %report.turn_id, "Model output had no JSON envelope; passing it through as content");
                    emit(tx, TurnEvent::Content(full_text.clone())).await?;
                }
                full_text
            }
        };
        Ok(IterationEnd::Final { content })
    }

    /// Act on a pending tool once the gate has opened.
    async fn resolve(
        &self,
        tool: PendingTool,
        turn: &Turn,
        state: &mut IterationState,
        report: &mut TurnReport,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<IterationEnd, Halt> {
        match tool {
            PendingTool::LimitExceeded => {
                let text = notice::limit_reached(state.governor.max_iterations());
                warn!(turn_id = %report.turn_id, "Tool round limit reached");
                self.announce(text, state, tx).await?;
                Ok(IterationEnd::Limit)
            }
            PendingTool::Duplicate(request) => {
                info!(turn_id = %report.turn_id, tool = %request.name, "Skipping duplicate tool request");
                let text = notice::duplicate_skipped(&request.name, &request.args);
                self.announce(text, state, tx).await?;
                Ok(IterationEnd::Continue)
            }
            PendingTool::Call(request) => {
                report.enter(TurnPhase::ToolExecuting);
                report.tool_calls += 1;
                self.execute_tool(request, turn, state, report, tx).await?;
                Ok(IterationEnd::Continue)
            }
        }
    }

    async fn execute_tool(
        &self,
        request: ToolRequest,
        turn: &Turn,
        state: &mut IterationState,
        report: &TurnReport,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), Halt> {
        let ToolRequest { name, args, reason } = request;
        info!(turn_id = %report.turn_id, tool = %name, reason = %reason, "Calling tool");

        let result = tokio::select! {
            biased;
            _ = tx.closed() => return Err(Halt::Cancelled),
            result = tokio::time::timeout(self.settings.tool_timeout, self.call_tool(&name, &args)) => result,
        };

        let result = result.map_err(|_| TurnFailure::ToolTimeout {
            tool: name.clone(),
            secs: self.settings.tool_timeout.as_secs(),
        })?;

        let ok = result.is_ok();
        let (brief, detail) = match result {
            Ok(value) => {
                info!(turn_id = %report.turn_id, tool = %name, "Tool succeeded");
                (
                    notice::success_brief(&name),
                    notice::success_detail(&name, &value, self.settings.tool_result_max_chars),
                )
            }
            Err(e) => {
                warn!(turn_id = %report.turn_id, tool = %name, error = %e, "Tool failed");
                (notice::failure_brief(&name), notice::failure_detail(&name, &e.to_string()))
            }
        };

        emit(tx, TurnEvent::System(brief)).await?;

        let hint = notice::shape_hint(&name, ok);
        for text in [detail, hint] {
            self.persist(Role::System, &text).await;
            state.push_system(text);
        }
        if let Some(restated) = notice::restated_request(&turn.user_message) {
            state.push_system(restated);
        }
        Ok(())
    }

    /// Runs the registry call on its own task so a panicking tool becomes an
    /// ordinary tool failure. Dropping the returned future aborts the task.
    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let tools = Arc::clone(&self.tools);
        let (task_name, task_args) = (name.to_string(), args.clone());
        let handle = tokio::spawn(async move { tools.call(&task_name, &task_args).await });
        let _abort = AbortOnDrop(handle.abort_handle());

        handle.await.unwrap_or_else(|e| {
            let reason = if e.is_panic() {
                "tool panicked".to_string()
            } else {
                e.to_string()
            };
            Err(ToolError::Failed {
                tool: name.to_string(),
                reason,
            })
        })
    }

    /// A notice shown to the user, kept for the model and written to history.
    async fn announce(
        &self,
        text: String,
        state: &mut IterationState,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), Halt> {
        emit(tx, TurnEvent::System(text.clone())).await?;
        self.persist(Role::System, &text).await;
        state.push_system(text);
        Ok(())
    }

    async fn finalize(
        &self,
        turn: &Turn,
        content: &str,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), Halt> {
        if content.is_empty() {
            debug!("Empty final answer; nothing persisted");
            return Ok(());
        }
        self.persist(Role::Assistant, content).await;

        if !self.settings.suggest_options {
            return Ok(());
        }
        let Some(generator) = &self.options else {
            return Ok(());
        };

        let history = self.load_history().await;
        let suggestion = tokio::select! {
            biased;
            _ = tx.closed() => return Err(Halt::Cancelled),
            result = tokio::time::timeout(
                self.settings.option_timeout,
                generator.suggest(&history, &self.character, &turn.user_message),
            ) => result,
        };
        match suggestion {
            Ok(Ok(options)) if !options.is_empty() => emit(tx, TurnEvent::Options(options)).await?,
            Ok(Ok(_)) => debug!("Option generator returned nothing"),
            Ok(Err(e)) => warn!(error = %e, "Option generation failed"),
            Err(_) => warn!(
                secs = self.settings.option_timeout.as_secs(),
                "Option generation timed out"
            ),
        }
        Ok(())
    }

    async fn load_history(&self) -> Vec<Message> {
        match self.history.recent(self.settings.history_window).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(store = self.history.name(), error = %e, "Failed to read history");
                Vec::new()
            }
        }
    }

    /// History writes are best effort: a failing store never aborts a turn.
    async fn persist(&self, role: Role, content: &str) {
        if let Err(e) = self.history.append_text(role, content).await {
            warn!(store = self.history.name(), role = %role, error = %e, "Failed to write history");
        }
    }
}

struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn emit(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> Result<(), Halt> {
    trace!(event = event.event_type(), "Emitting");
    tx.send(event).await.map_err(|_| Halt::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use cabm_history::InMemoryHistory;
    use serde_json::json;

    const SEARCH_CALL: &str = r#"{"content":"让我查一下。","tool_request":{"name":"search","args":{"q":"weather"},"reason":"need data"}}"#;

    struct Harness {
        provider: Arc<ScriptedProvider>,
        tools: Arc<ScriptedTools>,
        history: InMemoryHistory,
        options: Arc<FixedOptions>,
        orchestrator: Orchestrator,
    }

    fn harness_with(scripts: Vec<Script>, tools: ScriptedTools, options: FixedOptions) -> Harness {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let tools = Arc::new(tools);
        let history = InMemoryHistory::new();
        let options = Arc::new(options);
        let orchestrator = Orchestrator::new(
            provider.clone(),
            tools.clone(),
            Arc::new(history.clone()),
            "mock-model",
        )
        .with_options(options.clone());
        Harness {
            provider,
            tools,
            history,
            options,
            orchestrator,
        }
    }

    fn harness(scripts: Vec<Script>) -> Harness {
        harness_with(
            scripts,
            ScriptedTools::new().with("search", ToolBehavior::Returns(json!({"forecast": "sunny"}))),
            FixedOptions::ok(&["Thanks!", "Tell me more"]),
        )
    }

    fn tool_turn(msg: &str) -> Turn {
        Turn::new(msg).with_tools(true)
    }

    fn content_text(events: &[TurnEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Content(c) => Some(c.as_str()),
                _ => None,
            })
            .collect()
    }

    fn system_events(events: &[TurnEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::System(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn tool_free_turn_finalizes_once() {
        let answer = r#"{"mood":"calm","content":"今天是晴天。"}"#;
        let h = harness(vec![Script::text(answer, 3)]);

        let t = h.orchestrator.run_collect(Turn::new("今天天气如何？")).await;

        assert_eq!(
            t.report.outcome,
            TurnOutcome::Finalized {
                content: "今天是晴天。".into()
            }
        );
        assert_eq!(t.report.phases, vec![TurnPhase::Streaming, TurnPhase::Finalizing]);
        assert_eq!(t.report.count(TurnPhase::Finalizing), 1);
        assert_eq!(content_text(&t.events), "今天是晴天。");
        assert_eq!(t.events[0], TurnEvent::Mood("calm".into()));
        assert_eq!(t.events.last(), Some(&TurnEvent::Done));
        assert!(t.events.contains(&TurnEvent::Options(vec![
            "Thanks!".into(),
            "Tell me more".into()
        ])));
        assert_eq!(h.options.calls(), vec!["今天天气如何？".to_string()]);

        let stored = h.history.all().await;
        assert_eq!(stored.len(), 2);
        assert_eq!((stored[0].role, stored[0].content.as_str()), (Role::User, "今天天气如何？"));
        assert_eq!((stored[1].role, stored[1].content.as_str()), (Role::Assistant, "今天是晴天。"));
    }

    #[tokio::test]
    async fn tool_call_runs_once_then_continues() {
        let h = harness(vec![
            Script::text(SEARCH_CALL, 7),
            Script::text(r#"{"content":"晴天，25度。"}"#, 4),
        ]);

        let t = h.orchestrator.run_collect(tool_turn("今天天气如何？")).await;

        assert_eq!(
            t.report.phases,
            vec![
                TurnPhase::Streaming,
                TurnPhase::ToolExecuting,
                TurnPhase::IterationBoundary,
                TurnPhase::Streaming,
                TurnPhase::Finalizing,
            ]
        );
        assert_eq!(t.report.tool_calls, 1);
        assert_eq!(t.report.tool_request_history, vec![SEARCH_CALL.to_string()]);

        let calls = h.tools.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "search");
        assert_eq!(Value::Object(calls[0].1.clone()), json!({"q": "weather"}));

        // Content streamed before the tool, then the notice, then the answer
        let first_system = t.events.iter().position(|e| matches!(e, TurnEvent::System(_))).unwrap();
        assert_eq!(content_text(&t.events[..first_system]), "让我查一下。");
        assert_eq!(system_events(&t.events), vec!["[tools] search completed (ok)"]);
        assert_eq!(content_text(&t.events[first_system..]), "晴天，25度。");
        assert_eq!(t.events.last(), Some(&TurnEvent::Done));
    }

    #[tokio::test]
    async fn post_tool_context_drops_conversation() {
        let h = harness(vec![
            Script::text(SEARCH_CALL, 5),
            Script::text(r#"{"content":"晴。"}"#, 5),
        ]);
        h.history.append(Message::user("earlier question")).await.unwrap();
        h.history.append(Message::assistant("earlier answer")).await.unwrap();

        h.orchestrator.run_collect(tool_turn("今天天气如何？")).await;

        let requests = h.provider.requests();
        assert_eq!(requests.len(), 2);

        let first: Vec<&str> = requests[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert!(first.contains(&"earlier answer"));
        assert!(first.contains(&"今天天气如何？"));

        let second = &requests[1].messages;
        assert!(second.iter().all(|m| m.role != Role::User));
        assert!(!second.iter().any(|m| m.content == "earlier answer"));
        let assistant: Vec<&Message> = second.iter().filter(|m| m.role == Role::Assistant).collect();
        assert_eq!(assistant.len(), 1);
        assert_eq!(assistant[0].content, SEARCH_CALL);
        assert!(second.iter().any(|m| m.content.contains(r#"result: {"forecast":"sunny"}"#)));
        assert!(second.iter().any(|m| m.content.contains("status: ok")));
        assert!(second.last().unwrap().content.ends_with("今天天气如何？"));
    }

    #[tokio::test]
    async fn tool_guide_injected_only_when_tools_enabled() {
        let h = harness(vec![
            Script::text(r#"{"content":"a."}"#, 50),
            Script::text(r#"{"content":"b."}"#, 50),
        ]);

        h.orchestrator.run_collect(tool_turn("x")).await;
        h.orchestrator.run_collect(Turn::new("y")).await;

        let requests = h.provider.requests();
        assert!(requests[0].messages[1].content.starts_with("[Tool usage guide]"));
        assert!(requests[0].messages[1].content.contains("- search: scripted search"));
        assert!(!requests[1].messages.iter().any(|m| m.content.contains("[Tool usage guide]")));
    }

    #[tokio::test]
    async fn tool_notes_persisted_but_restatement_is_not() {
        let h = harness(vec![
            Script::text(SEARCH_CALL, 9),
            Script::text(r#"{"content":"好的。"}"#, 9),
        ]);

        h.orchestrator.run_collect(tool_turn("天气？")).await;

        let stored = h.history.all().await;
        let roles: Vec<Role> = stored.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::System, Role::System, Role::Assistant]);
        assert!(stored[1].content.starts_with("[tools] search completed, result:"));
        assert!(stored[2].content.starts_with("[note]"));
        assert!(!stored.iter().any(|m| m.content.contains("original user request")));
        assert_eq!(stored[3].content, "好的。");
    }

    #[tokio::test]
    async fn tool_failure_hides_details_from_user() {
        let h = harness_with(
            vec![
                Script::text(SEARCH_CALL, 6),
                Script::text(r#"{"content":"换个办法。"}"#, 6),
            ],
            ScriptedTools::new().with("search", ToolBehavior::Fails("db password rejected".into())),
            FixedOptions::ok(&[]),
        );

        let t = h.orchestrator.run_collect(tool_turn("天气？")).await;

        assert_eq!(system_events(&t.events), vec!["[tools] search completed (failed)"]);
        assert!(!t.events.iter().any(|e| e.sse_data().contains("db password")));

        let second = &h.provider.requests()[1].messages;
        assert!(second.iter().any(|m| m.content.contains("search failed, error:") && m.content.contains("db password rejected")));
        assert!(second.iter().any(|m| m.content.contains("status: error")));
        assert!(matches!(t.report.outcome, TurnOutcome::Finalized { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_failure() {
        let call = r#"{"content":"试试。","tool_request":{"name":"teleport","args":{}}}"#;
        let h = harness(vec![Script::text(call, 8), Script::text(r#"{"content":"不行。"}"#, 8)]);

        let t = h.orchestrator.run_collect(tool_turn("go")).await;

        assert_eq!(system_events(&t.events), vec!["[tools] teleport completed (failed)"]);
        let second = &h.provider.requests()[1].messages;
        assert!(second.iter().any(|m| m.content.contains("Unknown tool: teleport")));
    }

    #[tokio::test]
    async fn duplicate_request_is_skipped_and_turn_continues() {
        let dup = r#"{"content":"再查一次。","tool_request":{"name":"search","args":{"q":"weather"}}}"#;
        let h = harness(vec![
            Script::text(SEARCH_CALL, 10),
            Script::text(dup, 10),
            Script::text(r#"{"content":"晴。"}"#, 10),
        ]);

        let t = h.orchestrator.run_collect(tool_turn("天气？")).await;

        assert_eq!(h.tools.calls().len(), 1);
        assert_eq!(t.report.count(TurnPhase::ToolExecuting), 1);
        assert_eq!(t.report.count(TurnPhase::IterationBoundary), 2);
        assert_eq!(t.report.tool_request_history.len(), 2);
        let notices = system_events(&t.events);
        assert_eq!(notices.len(), 2);
        assert_eq!(
            notices[1],
            r#"[tools] Skipped duplicate tool request: search args={"q":"weather"}"#
        );

        let stored = h.history.all().await;
        assert!(stored.iter().any(|m| m.is_system() && m.content.contains("Skipped duplicate")));
        assert!(matches!(t.report.outcome, TurnOutcome::Finalized { .. }));
    }

    #[tokio::test]
    async fn limit_terminates_without_persisting_partial_text() {
        let second = r#"{"content":"还要再查。","tool_request":{"name":"search","args":{"q":"rain"}}}"#;
        let h = harness(vec![Script::text(SEARCH_CALL, 4), Script::text(second, 4)]);

        let t = h
            .orchestrator
            .run_collect(tool_turn("天气？").with_max_iterations(1))
            .await;

        assert_eq!(t.report.outcome, TurnOutcome::LimitReached);
        assert_eq!(t.report.phases.last(), Some(&TurnPhase::Terminated));
        assert_eq!(h.provider.call_count(), 2);
        assert_eq!(h.tools.calls().len(), 1);
        assert!(system_events(&t.events)
            .last()
            .unwrap()
            .contains("limit of 1 tool rounds"));
        assert_eq!(t.events.last(), Some(&TurnEvent::Done));
        assert!(!t.events.iter().any(|e| matches!(e, TurnEvent::Options(_))));

        let stored = h.history.all().await;
        assert!(!stored.iter().any(|m| m.role == Role::Assistant));
        assert!(stored.last().unwrap().content.contains("limit of 1"));
    }

    #[tokio::test]
    async fn pending_tool_waits_for_sentence_end_then_resolves_at_stream_end() {
        // Content never reaches a terminator; end of stream opens the gate
        let call = r#"{"content":"Let me check","tool_request":{"name":"search","args":{"q":"x"}}}"#;
        let h = harness(vec![Script::text(call, 5), Script::text(r#"{"content":"Done."}"#, 5)]);

        let t = h.orchestrator.run_collect(tool_turn("hi")).await;

        assert_eq!(h.tools.calls().len(), 1);
        assert_eq!(content_text(&t.events), "Let me checkDone.");
    }

    #[tokio::test]
    async fn content_after_tool_request_is_suppressed() {
        // No terminator, so the gate stays shut while the model keeps talking
        let chunks = vec![
            r#"{"content":"让我查一下","tool_request":{"name":"search","args":{"q":"weather"}}}"#
                .to_string(),
            r#"{"content":"让我查一下，以后的内容","tool_request":{"name":"search","args":{"q":"weather"}}}"#
                .to_string(),
        ];
        let h = harness(vec![Script::Chunks(chunks), Script::text(r#"{"content":"好。"}"#, 3)]);

        let t = h.orchestrator.run_collect(tool_turn("hi")).await;

        assert!(!content_text(&t.events).contains("以后的内容"));
        assert_eq!(h.tools.calls().len(), 1);
    }

    #[tokio::test]
    async fn tool_request_ignored_when_tools_disabled() {
        let h = harness(vec![Script::text(SEARCH_CALL, 6)]);

        let t = h.orchestrator.run_collect(Turn::new("天气？")).await;

        assert!(h.tools.calls().is_empty());
        assert_eq!(
            t.report.outcome,
            TurnOutcome::Finalized {
                content: "让我查一下。".into()
            }
        );
        assert!(t.report.tool_request_history.is_empty());
    }

    #[tokio::test]
    async fn shorter_content_replaces() {
        let h = harness(vec![Script::Chunks(vec![
            r#"{"content":"abc"}"#.into(),
            r#"{"content":"a"}"#.into(),
        ])]);

        let t = h.orchestrator.run_collect(Turn::new("x")).await;

        let contents: Vec<&TurnEvent> = t
            .events
            .iter()
            .filter(|e| matches!(e, TurnEvent::Content(_)))
            .collect();
        assert_eq!(
            contents,
            vec![&TurnEvent::Content("abc".into()), &TurnEvent::Content("a".into())]
        );
        assert_eq!(t.report.outcome, TurnOutcome::Finalized { content: "a".into() });
    }

    #[tokio::test]
    async fn malformed_output_is_passed_through() {
        let h = harness(vec![Script::text("Sorry, plain text only.", 4)]);

        let t = h.orchestrator.run_collect(Turn::new("x")).await;

        assert_eq!(content_text(&t.events), "Sorry, plain text only.");
        let stored = h.history.all().await;
        assert_eq!(stored.last().unwrap().content, "Sorry, plain text only.");
    }

    #[tokio::test]
    async fn provider_refusal_is_terminal_error() {
        let h = harness(vec![Script::Fail(ProviderError::Unauthorized("bad key".into()))]);

        let t = h.orchestrator.run_collect(Turn::new("x")).await;

        assert_eq!(t.events.len(), 2);
        assert!(matches!(&t.events[0], TurnEvent::Error(msg) if msg.contains("bad key")));
        assert_eq!(t.events[1], TurnEvent::Done);
        assert!(matches!(t.report.outcome, TurnOutcome::Failed(_)));
        assert!(h.options.calls().is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_order() {
        let h = harness(vec![Script::ChunksThenError(
            vec![r#"{"content":"Part"#.into(), r#"ial."}"#.into()],
            ProviderError::StreamInterrupted("connection reset".into()),
        )]);

        let t = h.orchestrator.run_collect(Turn::new("x")).await;

        assert_eq!(
            t.events,
            vec![
                TurnEvent::Content("Partial.".into()),
                TurnEvent::Error("Provider error: Stream interrupted: connection reset".into()),
                TurnEvent::Done,
            ]
        );
        let stored = h.history.all().await;
        assert!(!stored.iter().any(|m| m.role == Role::Assistant));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_times_out() {
        let h = harness(vec![Script::Hang]);
        let orchestrator = h.orchestrator.clone().with_settings(TurnSettings {
            chunk_timeout: Duration::from_secs(3),
            ..TurnSettings::default()
        });

        let t = orchestrator.run_collect(Turn::new("x")).await;

        assert_eq!(
            t.report.outcome,
            TurnOutcome::Failed("No response from the model within 3s".into())
        );
        assert_eq!(t.events.last(), Some(&TurnEvent::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let h = harness_with(
            vec![Script::text(SEARCH_CALL, 20)],
            ScriptedTools::new().with("search", ToolBehavior::Sleeps(Duration::from_secs(600))),
            FixedOptions::ok(&[]),
        );
        let orchestrator = h.orchestrator.clone().with_settings(TurnSettings {
            tool_timeout: Duration::from_secs(2),
            ..TurnSettings::default()
        });

        let t = orchestrator.run_collect(tool_turn("x")).await;

        assert!(matches!(&t.report.outcome, TurnOutcome::Failed(msg) if msg.contains("'search'")));
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(t.events.last(), Some(&TurnEvent::Done));
    }

    #[tokio::test]
    async fn panicking_tool_is_a_tool_failure() {
        let h = harness_with(
            vec![
                Script::text(SEARCH_CALL, 20),
                Script::text(r#"{"content":"查不到。"}"#, 4),
            ],
            ScriptedTools::new().with("search", ToolBehavior::Panics),
            FixedOptions::ok(&[]),
        );

        let mut rx = h.orchestrator.run_stream(tool_turn("天气"));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(events.contains(&TurnEvent::System(notice::failure_brief("search"))));
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::Error(_))));
        assert_eq!(events.last(), Some(&TurnEvent::Done));
        assert_eq!(h.provider.call_count(), 2);
        let second = &h.provider.requests()[1].messages;
        assert!(second.iter().any(|m| m.content.contains("tool panicked")));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_options_still_end_with_done() {
        let h = harness_with(
            vec![Script::text(r#"{"content":"ok."}"#, 3)],
            ScriptedTools::new(),
            FixedOptions::stalled(),
        );
        let orchestrator = h.orchestrator.clone().with_settings(TurnSettings {
            option_timeout: Duration::from_secs(5),
            ..TurnSettings::default()
        });

        let mut rx = orchestrator.run_stream(Turn::new("x"));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(h.options.calls().len(), 1);
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::Options(_))));
        assert_eq!(events.last(), Some(&TurnEvent::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_up_during_options_cancels_turn() {
        let h = harness_with(
            vec![Script::text(r#"{"content":"ok."}"#, 3)],
            ScriptedTools::new(),
            FixedOptions::stalled(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.run_turn(Turn::new("x"), &tx).await });

        while let Some(event) = rx.recv().await {
            if matches!(event, TurnEvent::Content(_)) {
                break;
            }
        }
        drop(rx);

        let report = task.await.unwrap();
        assert_eq!(report.outcome, TurnOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_turn() {
        let h = harness(vec![Script::text(r#"{"content":"hello."}"#, 2)]);
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        let report = h.orchestrator.run_turn(Turn::new("x"), &tx).await;

        assert_eq!(report.outcome, TurnOutcome::Cancelled);
        assert!(!h.history.all().await.iter().any(|m| m.role == Role::Assistant));
    }

    #[tokio::test]
    async fn option_failure_is_swallowed() {
        let h = harness_with(
            vec![Script::text(r#"{"content":"ok."}"#, 3)],
            ScriptedTools::new(),
            FixedOptions::failing(),
        );

        let t = h.orchestrator.run_collect(Turn::new("x")).await;

        assert_eq!(h.options.calls().len(), 1);
        assert!(!t.events.iter().any(|e| matches!(e, TurnEvent::Options(_) | TurnEvent::Error(_))));
        assert_eq!(t.events.last(), Some(&TurnEvent::Done));
    }

    #[tokio::test]
    async fn options_skipped_when_disabled() {
        let h = harness(vec![Script::text(r#"{"content":"ok."}"#, 3)]);
        let orchestrator = h.orchestrator.clone().with_settings(TurnSettings {
            suggest_options: false,
            ..TurnSettings::default()
        });

        orchestrator.run_collect(Turn::new("x")).await;

        assert!(h.options.calls().is_empty());
    }

    #[tokio::test]
    async fn run_stream_delivers_events_in_order() {
        let h = harness(vec![Script::text(r#"{"content":"one two three."}"#, 2)]);

        let mut rx = h.orchestrator.run_stream(Turn::new("x"));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(content_text(&events), "one two three.");
        assert_eq!(events.last(), Some(&TurnEvent::Done));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[test]
    fn turn_defaults_follow_settings() {
        let h = harness(vec![]);
        let orchestrator = h.orchestrator.clone().with_settings(TurnSettings {
            max_iterations: 4,
            tools_enabled_by_default: true,
            ..TurnSettings::default()
        });

        let turn = orchestrator.turn("hi", None);
        assert!(turn.tools_enabled);
        assert_eq!(turn.max_iterations, 4);
        assert!(!orchestrator.turn("hi", Some(false)).tools_enabled);
    }

    #[test]
    fn settings_from_agent_config() {
        let config = AgentConfig::default();
        let settings = TurnSettings::from(&config);
        assert_eq!(settings.max_iterations, 10);
        assert_eq!(settings.tool_result_max_chars, 800);
        assert_eq!(settings.chunk_timeout, Duration::from_secs(120));
        assert_eq!(settings.option_timeout, Duration::from_secs(20));
    }
}
