//! Roci Stream: multi-step streaming generation.
//!
//! A run turns a provider's single-step event stream into a multi-step,
//! multi-consumer result. Any number of consumers can subscribe to the live
//! text and full streams, while aggregate accessors (`text`, `steps`,
//! `total_usage`, ...) resolve once the run ends.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use roci_stream::prelude::*;
//!
//! # async fn example(provider: Arc<dyn ModelProvider>) -> roci_stream::error::Result<()> {
//! let result = stream_text(provider, StreamTextRequest::prompt("Hello!"));
//! let mut deltas = result.text_stream();
//! while let Some(delta) = deltas.next().await {
//!     print!("{}", delta?);
//! }
//! println!("\nusage: {}", result.total_usage().await.log_description());
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod convert;
pub mod error;
pub mod events;
pub mod generation;
pub mod prelude;
pub mod provider;
pub mod stop;
pub mod stream_transform;
pub mod types;
pub mod util;
