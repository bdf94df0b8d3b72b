//! Model provider interface consumed by the orchestrator.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::RociError;
use crate::types::{GenerationSettings, ModelMessage, ProviderStreamPart, RequestMetadata};

/// Ordered provider event sequence for a single step.
pub type ProviderStream = BoxStream<'static, Result<ProviderStreamPart, RociError>>;

/// Options for one streaming model call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Role-tagged prompt: the initial messages plus prior steps' response messages.
    pub prompt: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    /// Cancelled when the run aborts or finishes while this call is pending.
    pub abort_signal: CancellationToken,
}

/// Response from [`ModelProvider::do_stream`].
pub struct StreamResponse {
    pub request: Option<RequestMetadata>,
    pub stream: ProviderStream,
}

impl StreamResponse {
    pub fn new(stream: ProviderStream) -> Self {
        Self {
            request: None,
            stream,
        }
    }

    pub fn with_request(mut self, request: RequestMetadata) -> Self {
        self.request = Some(request);
        self
    }
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "anthropic").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Start one streaming call. Invoked once per step.
    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse, RociError>;
}
