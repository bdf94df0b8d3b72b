//! Streaming text generation across multiple steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::RociError;
use crate::provider::ModelProvider;
use crate::stream_transform::{apply_transforms, PartStream, StreamTransform};
use crate::types::{
    CallWarning, FinishReason, GeneratedFile, ProviderMetadata, RequestMetadata, Source,
    StepContent, StepResponse, StepResult, TextStreamPart, ToolCall, ToolResult, Usage,
};

use super::orchestrator::{Orchestrator, RunPhase, RunShared};
use super::request::{FinishEvent, RunId, StreamTextRequest};

/// Start a streaming run against `provider`.
///
/// Nothing is sent to the provider until the returned handle is first
/// consumed: subscribing to either live stream or awaiting any accessor
/// starts the run, once.
pub fn stream_text(
    provider: Arc<dyn ModelProvider>,
    request: StreamTextRequest,
) -> StreamTextResult {
    let cancel = request
        .abort_signal
        .as_ref()
        .map(CancellationToken::child_token)
        .unwrap_or_default();
    let shared = Arc::new(RunShared::new(cancel));
    let run_id = request.run_id;
    let transforms = request.transforms.clone();
    let orchestrator = Orchestrator::new(provider, request, Arc::clone(&shared));

    StreamTextResult {
        run_id,
        shared,
        pending: Arc::new(Mutex::new(Some(orchestrator))),
        started: Arc::new(AtomicBool::new(false)),
        transforms,
    }
}

/// Handle to a streaming run.
///
/// Live streams and aggregate accessors are views over the same run. Clones
/// share the run.
#[derive(Clone)]
pub struct StreamTextResult {
    run_id: RunId,
    shared: Arc<RunShared>,
    pending: Arc<Mutex<Option<Orchestrator>>>,
    started: Arc<AtomicBool>,
    transforms: Vec<Arc<dyn StreamTransform>>,
}

impl StreamTextResult {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        self.shared.phase()
    }

    /// Abort the run. Consumers see `Abort` as the terminal part.
    pub fn abort(&self) {
        self.shared.cancel.cancel();
    }

    fn ensure_started(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(orchestrator) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(orchestrator.run());
            }
            Err(err) => orchestrator.abandon(RociError::Configuration(format!(
                "stream_text requires a tokio runtime: {err}"
            ))),
        }
    }

    /// Text deltas, in order. Ends with the run; a failed run ends with its error.
    pub fn text_stream(&self) -> BoxStream<'static, Result<String, RociError>> {
        let subscription = self.shared.text.register();
        self.ensure_started();
        subscription.boxed()
    }

    /// Every canonical part, in emission order, with the request's transforms applied.
    pub fn full_stream(&self) -> PartStream {
        let subscription = self.shared.full.register();
        self.ensure_started();
        apply_transforms(subscription.boxed(), &self.transforms)
    }

    /// Every completed step, in order.
    pub async fn steps(&self) -> Vec<StepResult> {
        self.ensure_started();
        self.shared.steps.value().await
    }

    /// Pointwise sum of every step's usage.
    pub async fn total_usage(&self) -> Usage {
        self.ensure_started();
        self.shared.total_usage.value().await
    }

    /// Finish reason of the last completed step, `Unknown` when there is none.
    pub async fn finish_reason(&self) -> FinishReason {
        self.ensure_started();
        self.shared.finish_reason.value().await
    }

    /// The last completed step.
    pub async fn final_step(&self) -> Result<StepResult, RociError> {
        self.steps()
            .await
            .pop()
            .ok_or(RociError::NoOutputGenerated)
    }

    pub async fn text(&self) -> Result<String, RociError> {
        Ok(self.final_step().await?.text())
    }

    pub async fn content(&self) -> Result<Vec<StepContent>, RociError> {
        Ok(self.final_step().await?.content)
    }

    pub async fn reasoning_text(&self) -> Result<Option<String>, RociError> {
        Ok(self.final_step().await?.reasoning_text())
    }

    /// Usage of the last step only; see [`total_usage`](Self::total_usage).
    pub async fn usage(&self) -> Result<Usage, RociError> {
        Ok(self.final_step().await?.usage)
    }

    pub async fn tool_calls(&self) -> Result<Vec<ToolCall>, RociError> {
        Ok(self.final_step().await?.tool_calls())
    }

    pub async fn tool_results(&self) -> Result<Vec<ToolResult>, RociError> {
        Ok(self.final_step().await?.tool_results())
    }

    pub async fn sources(&self) -> Result<Vec<Source>, RociError> {
        Ok(self.final_step().await?.sources())
    }

    pub async fn files(&self) -> Result<Vec<GeneratedFile>, RociError> {
        Ok(self.final_step().await?.files())
    }

    pub async fn warnings(&self) -> Result<Vec<CallWarning>, RociError> {
        Ok(self.final_step().await?.warnings)
    }

    pub async fn request(&self) -> Result<RequestMetadata, RociError> {
        Ok(self.final_step().await?.request)
    }

    pub async fn response(&self) -> Result<StepResponse, RociError> {
        Ok(self.final_step().await?.response)
    }

    pub async fn provider_metadata(&self) -> Result<Option<ProviderMetadata>, RociError> {
        Ok(self.final_step().await?.provider_metadata)
    }

    /// Wait for the run to end.
    ///
    /// Fails with the run's error if it failed, with `Cancelled` if it was
    /// aborted, and with `NoOutputGenerated` if it finished without a step.
    pub async fn wait_for_finish(&self) -> Result<FinishEvent, RociError> {
        self.ensure_started();
        if let Some(err) = self.shared.failure.value().await {
            return Err(err);
        }
        if self.phase() == RunPhase::Aborted {
            return Err(RociError::Cancelled);
        }
        let steps = self.shared.steps.value().await;
        let final_step = steps.last().cloned().ok_or(RociError::NoOutputGenerated)?;
        Ok(FinishEvent {
            final_step,
            steps,
            total_usage: self.shared.total_usage.value().await,
            finish_reason: self.shared.finish_reason.value().await,
        })
    }

    /// Concatenate every text delta of a fresh text subscription.
    pub async fn read_all_text(&self) -> Result<String, RociError> {
        let mut stream = self.text_stream();
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }

    /// Collect every part of a fresh full subscription.
    pub async fn collect_full_stream(&self) -> Result<Vec<TextStreamPart>, RociError> {
        let mut stream = self.full_stream();
        let mut parts = Vec::new();
        while let Some(part) = stream.next().await {
            parts.push(part?);
        }
        Ok(parts)
    }

    /// Drive the run to its end without observing it. Errors are not surfaced
    /// here; read them from [`wait_for_finish`](Self::wait_for_finish).
    pub async fn consume_stream(&self) {
        let mut stream = self.full_stream();
        while let Some(part) = stream.next().await {
            if part.is_err() {
                break;
            }
        }
    }
}
