//! The run state machine.
//!
//! One [`Orchestrator`] owns all mutable state of a run and is driven by a
//! single spawned task. Consumers only observe it through the shared
//! broadcasters and deferred values in [`RunShared`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::error::RociError;
use crate::provider::{CallOptions, ModelProvider};
use crate::stop::is_stop_condition_met;
use crate::types::{
    CallWarning, FinishReason, ModelMessage, ProviderMetadata, ProviderStreamPart,
    ProviderToolCall, ProviderToolResult, RequestMetadata, ResponseMetadata, StepContent,
    StepResponse, StepResult, TextStreamPart, ToolCall, ToolError, ToolResult, Usage,
};
use crate::util::Deferred;

use super::request::{FinishEvent, StreamTextRequest};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RunPhase {
    NotStarted,
    Running,
    Stopped,
    Aborted,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Aborted | Self::Failed)
    }
}

/// State shared between the orchestrator task and the result handle.
pub(crate) struct RunShared {
    pub(crate) text: Broadcaster<String>,
    pub(crate) full: Broadcaster<TextStreamPart>,
    pub(crate) steps: Deferred<Vec<StepResult>>,
    pub(crate) total_usage: Deferred<Usage>,
    pub(crate) finish_reason: Deferred<FinishReason>,
    /// `None` for stopped and aborted runs, the failure otherwise.
    pub(crate) failure: Deferred<Option<RociError>>,
    pub(crate) phase: watch::Sender<RunPhase>,
    /// Run-level cancellation; child of the request's abort signal if any.
    pub(crate) cancel: CancellationToken,
}

impl RunShared {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        let (phase, _) = watch::channel(RunPhase::NotStarted);
        Self {
            text: Broadcaster::new(),
            full: Broadcaster::new(),
            steps: Deferred::new(),
            total_usage: Deferred::new(),
            finish_reason: Deferred::new(),
            failure: Deferred::new(),
            phase,
            cancel,
        }
    }

    pub(crate) fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }
}

/// How the step loop ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Stopped,
    Aborted,
    Failed(RociError),
}

/// Ids of text or reasoning parts that are open in the current step.
#[derive(Default)]
struct OpenParts {
    ids: Vec<String>,
    /// Index into the step content that deltas for an id append to.
    slots: HashMap<String, usize>,
}

impl OpenParts {
    /// Returns `true` when `id` was not open yet.
    fn open(&mut self, id: &str) -> bool {
        if self.ids.iter().any(|open| open == id) {
            return false;
        }
        self.ids.push(id.to_string());
        true
    }

    /// Returns `true` when `id` was open.
    fn close(&mut self, id: &str) -> bool {
        self.slots.remove(id);
        let before = self.ids.len();
        self.ids.retain(|open| open != id);
        before != self.ids.len()
    }

    fn drain(&mut self) -> Vec<String> {
        self.slots.clear();
        std::mem::take(&mut self.ids)
    }
}

/// Accumulated state of the step in progress.
#[derive(Default)]
struct StepState {
    framed: bool,
    warnings: Vec<CallWarning>,
    request: RequestMetadata,
    content: Vec<StepContent>,
    text: OpenParts,
    reasoning: OpenParts,
    /// Parsed tool call inputs by call id, used to fill in results.
    tool_inputs: HashMap<String, serde_json::Value>,
    response_id: Option<String>,
    model_id: Option<String>,
    timestamp: Option<chrono::DateTime<Utc>>,
    finish: Option<(FinishReason, Usage, Option<ProviderMetadata>)>,
}

/// Single owner of a run's mutable state.
pub(crate) struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    request: StreamTextRequest,
    shared: Arc<RunShared>,
    steps: Vec<StepResult>,
    total_usage: Usage,
    /// Response messages of every completed step, in step order.
    response_messages: Vec<ModelMessage>,
    /// Abort signal handed to the provider call of the current step.
    step_token: Option<CancellationToken>,
    terminated: bool,
}

impl Orchestrator {
    pub(crate) fn new(
        provider: Arc<dyn ModelProvider>,
        request: StreamTextRequest,
        shared: Arc<RunShared>,
    ) -> Self {
        Self {
            provider,
            request,
            shared,
            steps: Vec::new(),
            total_usage: Usage::default(),
            response_messages: Vec::new(),
            step_token: None,
            terminated: false,
        }
    }

    /// Finalize a run that could not be started.
    pub(crate) fn abandon(mut self, error: RociError) {
        self.finalize(Outcome::Failed(error), true);
    }

    fn debug_enabled(&self) -> bool {
        self.request.config.debug
    }

    /// Drive the run to completion.
    pub(crate) async fn run(mut self) {
        self.shared.phase.send_replace(RunPhase::Running);
        if self.debug_enabled() {
            tracing::debug!(
                run_id = %self.request.run_id,
                provider = self.provider.provider_name(),
                model = self.provider.model_id(),
                "roci stream start"
            );
        }
        let outcome = self.drive().await;
        self.finalize(outcome, true);
    }

    async fn drive(&mut self) -> Outcome {
        self.emit(TextStreamPart::Start);
        let cancel = self.shared.cancel.clone();

        // Conditions may be reused across runs.
        for condition in &self.request.stop_conditions {
            condition.reset().await;
        }

        loop {
            if cancel.is_cancelled() {
                return Outcome::Aborted;
            }

            match self.run_step().await {
                Ok(()) => {}
                Err(err) if err.is_cancellation() || cancel.is_cancelled() => {
                    return Outcome::Aborted;
                }
                Err(err) => return Outcome::Failed(err),
            }

            let should_stop = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Aborted,
                stop = is_stop_condition_met(&self.request.stop_conditions, &self.steps) => stop,
            };
            if should_stop {
                return Outcome::Stopped;
            }

            if let Some(max_steps) = self.request.config.max_steps {
                if self.steps.len() >= max_steps {
                    tracing::warn!(
                        run_id = %self.request.run_id,
                        max_steps,
                        "roci stream reached max steps"
                    );
                    return Outcome::Stopped;
                }
            }
        }
    }

    fn prompt(&self) -> Vec<ModelMessage> {
        let mut prompt = self.request.initial_prompt();
        prompt.extend(self.response_messages.iter().cloned());
        prompt
    }

    async fn run_step(&mut self) -> Result<(), RociError> {
        let cancel = self.shared.cancel.clone();
        let step_token = cancel.child_token();
        self.step_token = Some(step_token.clone());

        let options = CallOptions {
            prompt: self.prompt(),
            settings: self.request.settings.clone(),
            abort_signal: step_token,
        };
        if self.debug_enabled() {
            tracing::debug!(
                run_id = %self.request.run_id,
                step = self.steps.len() + 1,
                messages = options.prompt.len(),
                "roci stream step request"
            );
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RociError::Cancelled),
            response = self.provider.do_stream(options) => response?,
        };

        let mut step = StepState {
            request: response.request.unwrap_or_default(),
            ..Default::default()
        };
        let mut stream = response.stream;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RociError::Cancelled),
                next = stream.next() => next,
            };
            let Some(part) = next else {
                break;
            };
            if self.apply(&mut step, part?)? {
                break;
            }
        }

        self.complete_step(step)
    }

    /// Canonicalize one provider part. Returns `true` on the step's finish.
    fn apply(&self, step: &mut StepState, part: ProviderStreamPart) -> Result<bool, RociError> {
        if !matches!(part, ProviderStreamPart::StreamStart { .. }) {
            self.frame_step(step);
        }

        match part {
            ProviderStreamPart::StreamStart { warnings } => {
                step.warnings.extend(warnings);
                self.frame_step(step);
            }
            ProviderStreamPart::ResponseMetadata {
                id,
                model_id,
                timestamp,
            } => {
                step.response_id = id.or(step.response_id.take());
                step.model_id = model_id.or(step.model_id.take());
                step.timestamp = timestamp.or(step.timestamp);
            }
            ProviderStreamPart::TextStart {
                id,
                provider_metadata,
            } => {
                if step.text.open(&id) {
                    self.emit(TextStreamPart::TextStart {
                        id,
                        provider_metadata,
                    });
                }
            }
            ProviderStreamPart::TextDelta {
                id,
                delta,
                provider_metadata,
            } => {
                self.heal_text(step, &id);
                match step.text.slots.get(&id).copied() {
                    Some(index) => {
                        if let Some(StepContent::Text { text, .. }) = step.content.get_mut(index) {
                            text.push_str(&delta);
                        }
                    }
                    None => {
                        step.content.push(StepContent::Text {
                            text: delta.clone(),
                            provider_metadata: provider_metadata.clone(),
                        });
                        step.text.slots.insert(id.clone(), step.content.len() - 1);
                    }
                }
                self.emit(TextStreamPart::TextDelta {
                    id,
                    text: delta,
                    provider_metadata,
                });
            }
            ProviderStreamPart::TextEnd {
                id,
                provider_metadata,
            } => {
                self.heal_text(step, &id);
                step.text.close(&id);
                self.emit(TextStreamPart::TextEnd {
                    id,
                    provider_metadata,
                });
            }
            ProviderStreamPart::ReasoningStart {
                id,
                provider_metadata,
            } => {
                if step.reasoning.open(&id) {
                    self.emit(TextStreamPart::ReasoningStart {
                        id,
                        provider_metadata,
                    });
                }
            }
            ProviderStreamPart::ReasoningDelta {
                id,
                delta,
                provider_metadata,
            } => {
                self.heal_reasoning(step, &id);
                match step.reasoning.slots.get(&id).copied() {
                    Some(index) => {
                        if let Some(StepContent::Reasoning { text, .. }) =
                            step.content.get_mut(index)
                        {
                            text.push_str(&delta);
                        }
                    }
                    None => {
                        step.content.push(StepContent::Reasoning {
                            text: delta.clone(),
                            provider_metadata: provider_metadata.clone(),
                        });
                        step.reasoning
                            .slots
                            .insert(id.clone(), step.content.len() - 1);
                    }
                }
                self.emit(TextStreamPart::ReasoningDelta {
                    id,
                    text: delta,
                    provider_metadata,
                });
            }
            ProviderStreamPart::ReasoningEnd {
                id,
                provider_metadata,
            } => {
                self.heal_reasoning(step, &id);
                step.reasoning.close(&id);
                self.emit(TextStreamPart::ReasoningEnd {
                    id,
                    provider_metadata,
                });
            }
            ProviderStreamPart::ToolInputStart {
                id,
                tool_name,
                provider_executed,
                provider_metadata,
            } => self.emit(TextStreamPart::ToolInputStart {
                id,
                tool_name,
                provider_executed,
                provider_metadata,
            }),
            ProviderStreamPart::ToolInputDelta {
                id,
                delta,
                provider_metadata,
            } => self.emit(TextStreamPart::ToolInputDelta {
                id,
                delta,
                provider_metadata,
            }),
            ProviderStreamPart::ToolInputEnd {
                id,
                provider_metadata,
            } => self.emit(TextStreamPart::ToolInputEnd {
                id,
                provider_metadata,
            }),
            ProviderStreamPart::ToolCall(call) => {
                let call = parse_tool_call(call);
                step.tool_inputs
                    .insert(call.tool_call_id.clone(), call.input.clone());
                step.content.push(StepContent::ToolCall(call.clone()));
                self.emit(TextStreamPart::ToolCall(call));
            }
            ProviderStreamPart::ToolResult(result) => {
                let input = step
                    .tool_inputs
                    .get(&result.tool_call_id)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                match tool_outcome(result, input) {
                    Ok(result) => {
                        step.content.push(StepContent::ToolResult(result.clone()));
                        self.emit(TextStreamPart::ToolResult(result));
                    }
                    Err(error) => {
                        step.content.push(StepContent::ToolError(error.clone()));
                        self.emit(TextStreamPart::ToolError(error));
                    }
                }
            }
            ProviderStreamPart::Source(source) => {
                step.content.push(StepContent::Source(source.clone()));
                self.emit(TextStreamPart::Source(source));
            }
            ProviderStreamPart::File(file) => {
                step.content.push(StepContent::File(file.clone()));
                self.emit(TextStreamPart::File(file));
            }
            ProviderStreamPart::Finish {
                finish_reason,
                usage,
                provider_metadata,
            } => {
                step.finish = Some((finish_reason, usage, provider_metadata));
                return Ok(true);
            }
            ProviderStreamPart::Raw { raw_value } => {
                if self.request.config.include_raw_chunks {
                    self.emit(TextStreamPart::Raw { raw_value });
                }
            }
            ProviderStreamPart::Error { error } => return Err(RociError::Provider(error)),
        }
        Ok(false)
    }

    /// Emit `StartStep` once, before the step's first content part.
    fn frame_step(&self, step: &mut StepState) {
        if step.framed {
            return;
        }
        step.framed = true;
        self.emit(TextStreamPart::StartStep {
            request: step.request.clone(),
            warnings: step.warnings.clone(),
        });
    }

    fn heal_text(&self, step: &mut StepState, id: &str) {
        if step.text.open(id) {
            self.emit(TextStreamPart::TextStart {
                id: id.to_string(),
                provider_metadata: None,
            });
        }
    }

    fn heal_reasoning(&self, step: &mut StepState, id: &str) {
        if step.reasoning.open(id) {
            self.emit(TextStreamPart::ReasoningStart {
                id: id.to_string(),
                provider_metadata: None,
            });
        }
    }

    fn complete_step(&mut self, mut step: StepState) -> Result<(), RociError> {
        self.frame_step(&mut step);
        for id in step.text.drain() {
            self.emit(TextStreamPart::TextEnd {
                id,
                provider_metadata: None,
            });
        }
        for id in step.reasoning.drain() {
            self.emit(TextStreamPart::ReasoningEnd {
                id,
                provider_metadata: None,
            });
        }

        let (finish_reason, usage, provider_metadata) = match step.finish.take() {
            Some(finish) => finish,
            None => {
                tracing::warn!(
                    run_id = %self.request.run_id,
                    step = self.steps.len() + 1,
                    "provider stream ended without finish"
                );
                (FinishReason::Unknown, Usage::default(), None)
            }
        };

        let metadata = ResponseMetadata {
            id: step
                .response_id
                .take()
                .unwrap_or_else(|| format!("resp-{}", Uuid::new_v4())),
            model_id: step
                .model_id
                .take()
                .unwrap_or_else(|| self.provider.model_id().to_string()),
            timestamp: step.timestamp.unwrap_or_else(Utc::now),
            headers: None,
        };

        let messages = (self.request.converter)(&step.content)?;

        self.emit(TextStreamPart::FinishStep {
            response: metadata.clone(),
            usage,
            finish_reason,
            provider_metadata: provider_metadata.clone(),
        });

        let result = StepResult {
            content: step.content,
            finish_reason,
            usage,
            warnings: step.warnings,
            request: step.request,
            response: StepResponse {
                metadata,
                messages: messages.clone(),
            },
            provider_metadata,
        };

        self.total_usage += usage;
        self.response_messages.extend(messages);
        if let Some(callback) = &self.request.callbacks.on_step_finish {
            callback(&result);
        }
        self.steps.push(result);

        if self.debug_enabled() {
            tracing::debug!(
                run_id = %self.request.run_id,
                step = self.steps.len(),
                finish_reason = %finish_reason,
                usage = %usage.log_description(),
                "roci stream step finished"
            );
        }
        Ok(())
    }

    fn emit(&self, part: TextStreamPart) {
        if self.debug_enabled() {
            tracing::debug!(run_id = %self.request.run_id, part = ?part, "roci stream part");
        }
        if part.is_chunk() {
            if let Some(callback) = &self.request.callbacks.on_chunk {
                callback(&part);
            }
        }
        if let Some(delta) = part.text_delta() {
            self.shared.text.send(delta.to_string());
        }
        self.shared.full.send(part);
    }

    /// Resolve every deferred value, publish the terminal part and close both
    /// broadcasters. Runs at most once.
    fn finalize(&mut self, outcome: Outcome, notify: bool) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        if let Some(token) = self.step_token.take() {
            token.cancel();
        }

        let phase = match &outcome {
            Outcome::Stopped => RunPhase::Stopped,
            Outcome::Aborted => RunPhase::Aborted,
            Outcome::Failed(_) => RunPhase::Failed,
        };
        self.shared.phase.send_replace(phase);

        let finish_reason = self
            .steps
            .last()
            .map(|step| step.finish_reason)
            .unwrap_or(FinishReason::Unknown);
        self.shared.steps.resolve(self.steps.clone());
        self.shared.total_usage.resolve(self.total_usage);
        self.shared.finish_reason.resolve(finish_reason);
        self.shared.failure.resolve(match &outcome {
            Outcome::Failed(err) => Some(err.clone()),
            _ => None,
        });

        // Callbacks run before the terminal part so that a consumer seeing
        // the end of a stream also sees their effects.
        let callbacks = self.request.callbacks.clone();
        match outcome {
            Outcome::Stopped => {
                if notify {
                    if let (Some(callback), Some(final_step)) =
                        (&callbacks.on_finish, self.steps.last())
                    {
                        callback(&FinishEvent {
                            final_step: final_step.clone(),
                            steps: self.steps.clone(),
                            total_usage: self.total_usage,
                            finish_reason,
                        });
                    }
                }
                self.emit(TextStreamPart::Finish {
                    finish_reason,
                    total_usage: self.total_usage,
                });
                self.shared.text.finish();
                self.shared.full.finish();
            }
            Outcome::Aborted => {
                if notify {
                    if let Some(callback) = &callbacks.on_abort {
                        callback(self.steps.as_slice());
                    }
                }
                self.emit(TextStreamPart::Abort);
                self.shared.text.finish();
                self.shared.full.finish();
            }
            Outcome::Failed(err) => {
                tracing::warn!(run_id = %self.request.run_id, error = %err, "roci stream failed");
                if notify {
                    if let Some(callback) = &callbacks.on_error {
                        callback(&err);
                    }
                }
                self.emit(TextStreamPart::Error {
                    message: err.to_string(),
                });
                self.shared.text.fail(err.clone());
                self.shared.full.fail(err);
            }
        }

        if self.debug_enabled() {
            tracing::debug!(
                run_id = %self.request.run_id,
                phase = %phase,
                steps = self.steps.len(),
                usage = %self.total_usage.log_description(),
                "roci stream finalized"
            );
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // A run whose every handle was dropped before any consumer started it
        // never ran; it ends as aborted rather than failed.
        let outcome = if self.shared.phase() == RunPhase::NotStarted {
            Outcome::Aborted
        } else {
            Outcome::Failed(RociError::InvalidState(
                "run task ended before finalizing".into(),
            ))
        };
        self.finalize(outcome, false);
    }
}

fn parse_tool_call(call: ProviderToolCall) -> ToolCall {
    let input = if call.input.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.input).unwrap_or(serde_json::Value::String(call.input))
    };
    ToolCall {
        tool_call_id: call.tool_call_id,
        tool_name: call.tool_name,
        input,
        provider_executed: call.provider_executed,
        provider_metadata: call.provider_metadata,
    }
}

fn tool_outcome(
    result: ProviderToolResult,
    input: serde_json::Value,
) -> Result<ToolResult, ToolError> {
    if result.is_error {
        return Err(ToolError {
            tool_call_id: result.tool_call_id,
            tool_name: result.tool_name,
            input,
            error: result.result,
            provider_executed: result.provider_executed,
        });
    }
    Ok(ToolResult {
        tool_call_id: result.tool_call_id,
        tool_name: result.tool_name,
        input,
        output: result.result,
        provider_executed: result.provider_executed,
        preliminary: result.preliminary,
        provider_metadata: result.provider_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RociStreamConfig;
    use crate::provider::StreamResponse;
    use serde_json::json;

    struct Idle;

    #[async_trait::async_trait]
    impl ModelProvider for Idle {
        fn provider_name(&self) -> &str {
            "idle"
        }

        fn model_id(&self) -> &str {
            "idle-model"
        }

        async fn do_stream(&self, _options: CallOptions) -> Result<StreamResponse, RociError> {
            Err(RociError::model("idle", "never called"))
        }
    }

    #[tokio::test]
    async fn dropping_an_unstarted_run_aborts_it() {
        let shared = Arc::new(RunShared::new(CancellationToken::new()));
        let request = StreamTextRequest::prompt("Hi").with_config(RociStreamConfig::default());
        drop(Orchestrator::new(Arc::new(Idle), request, Arc::clone(&shared)));

        assert_eq!(shared.phase(), RunPhase::Aborted);
        assert_eq!(shared.failure.value().await, None);
        assert!(shared.steps.value().await.is_empty());
        assert_eq!(shared.finish_reason.value().await, FinishReason::Unknown);
        assert!(shared.full.is_finished());
    }

    #[test]
    fn open_parts_track_each_id_once() {
        let mut parts = OpenParts::default();
        assert!(parts.open("1"));
        assert!(!parts.open("1"));
        assert!(parts.open("2"));
        assert!(parts.close("1"));
        assert!(!parts.close("1"));
        assert_eq!(parts.drain(), vec!["2".to_string()]);
    }

    #[test]
    fn tool_call_input_falls_back_to_string() {
        let call = parse_tool_call(ProviderToolCall {
            tool_call_id: "c1".into(),
            tool_name: "search".into(),
            input: "not json".into(),
            provider_executed: None,
            provider_metadata: None,
        });
        assert_eq!(call.input, json!("not json"));

        let call = parse_tool_call(ProviderToolCall {
            tool_call_id: "c2".into(),
            tool_name: "search".into(),
            input: r#"{"q":"rust"}"#.into(),
            provider_executed: None,
            provider_metadata: None,
        });
        assert_eq!(call.input, json!({"q": "rust"}));
    }

    #[test]
    fn flagged_tool_result_becomes_error() {
        let outcome = tool_outcome(
            ProviderToolResult {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                result: json!("boom"),
                is_error: true,
                provider_executed: Some(true),
                preliminary: None,
                provider_metadata: None,
            },
            json!({"q": "rust"}),
        );
        let error = outcome.unwrap_err();
        assert_eq!(error.error, json!("boom"));
        assert_eq!(error.input, json!({"q": "rust"}));
    }

    #[test]
    fn phase_terminality() {
        assert!(!RunPhase::Running.is_terminal());
        assert!(RunPhase::Aborted.is_terminal());
        assert_eq!(RunPhase::NotStarted.to_string(), "not-started");
    }
}
