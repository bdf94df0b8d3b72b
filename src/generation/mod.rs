//! Multi-step streaming text generation.

pub mod orchestrator;
pub mod request;
pub mod stream;

pub use orchestrator::RunPhase;
pub use request::{FinishEvent, RunId, StreamCallbacks, StreamTextRequest};
pub use stream::{stream_text, StreamTextResult};
