//! Utility modules: deferred values, timeout.

pub mod deferred;
pub mod timeout;

pub use deferred::Deferred;
pub use timeout::{with_timeout, within};
