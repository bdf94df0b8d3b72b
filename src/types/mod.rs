//! Core types for Roci streaming.

pub mod content;
pub mod generation;
pub mod message;
pub mod step;
pub mod stream;
pub mod usage;

pub use content::*;
pub use generation::*;
pub use message::*;
pub use step::*;
pub use stream::*;
pub use usage::*;
