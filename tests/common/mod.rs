//! Shared test helpers and scripted provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use roci_stream::error::RociError;
use roci_stream::provider::{CallOptions, ModelProvider, StreamResponse};
use roci_stream::types::*;

/// What the provider does for one step.
pub enum StepScript {
    /// Yield these items, then end.
    Parts(Vec<Result<ProviderStreamPart, RociError>>),
    /// Yield these parts, then wait until the call's abort signal fires.
    Hang(Vec<ProviderStreamPart>),
    /// Fail the `do_stream` call itself.
    FailCall(RociError),
}

/// A provider that replays one queued script per step.
pub struct ScriptedProvider {
    model_id: String,
    scripts: Mutex<VecDeque<StepScript>>,
    calls: Mutex<Vec<CallOptions>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            model_id: "scripted-model".to_string(),
            scripts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_steps(steps: Vec<Vec<ProviderStreamPart>>) -> Arc<Self> {
        let provider = Self::new();
        for parts in steps {
            provider.queue_parts(parts);
        }
        Arc::new(provider)
    }

    pub fn queue(&self, script: StepScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn queue_parts(&self, parts: Vec<ProviderStreamPart>) {
        self.queue(StepScript::Parts(parts.into_iter().map(Ok).collect()));
    }

    /// Options of every call so far.
    pub fn calls(&self) -> Vec<CallOptions> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse, RociError> {
        self.calls.lock().unwrap().push(options.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RociError::model("scripted", "no script queued"))?;

        match script {
            StepScript::Parts(items) => {
                Ok(StreamResponse::new(futures::stream::iter(items).boxed()))
            }
            StepScript::Hang(parts) => {
                let signal = options.abort_signal.clone();
                let stream = async_stream::stream! {
                    for part in parts {
                        yield Ok::<_, RociError>(part);
                    }
                    signal.cancelled().await;
                };
                Ok(StreamResponse::new(Box::pin(stream)))
            }
            StepScript::FailCall(err) => Err(err),
        }
    }
}

/// A complete text-only step.
pub fn text_step(
    id: &str,
    chunks: &[&str],
    reason: FinishReason,
    usage: Usage,
) -> Vec<ProviderStreamPart> {
    let mut parts = vec![
        ProviderStreamPart::StreamStart { warnings: Vec::new() },
        ProviderStreamPart::text_start(id),
    ];
    parts.extend(chunks.iter().map(|chunk| ProviderStreamPart::text_delta(id, *chunk)));
    parts.push(ProviderStreamPart::text_end(id));
    parts.push(ProviderStreamPart::finish(reason, usage));
    parts
}

/// A step that calls one tool and finishes with `tool-calls`.
pub fn tool_call_step(call_id: &str, tool_name: &str, input: &str) -> Vec<ProviderStreamPart> {
    vec![
        ProviderStreamPart::StreamStart { warnings: Vec::new() },
        ProviderStreamPart::ToolInputStart {
            id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            provider_executed: None,
            provider_metadata: None,
        },
        ProviderStreamPart::ToolInputDelta {
            id: call_id.to_string(),
            delta: input.to_string(),
            provider_metadata: None,
        },
        ProviderStreamPart::ToolInputEnd {
            id: call_id.to_string(),
            provider_metadata: None,
        },
        ProviderStreamPart::ToolCall(ProviderToolCall {
            tool_call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            input: input.to_string(),
            provider_executed: None,
            provider_metadata: None,
        }),
        ProviderStreamPart::finish(FinishReason::ToolCalls, Usage::new(10, 5)),
    ]
}

/// Default config, independent of the environment.
pub fn test_config() -> roci_stream::config::RociStreamConfig {
    roci_stream::config::RociStreamConfig::default()
}
