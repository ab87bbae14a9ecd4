//! Forwarding policies
//!
//! - [`RetryPolicy`]: how long a failed resource set waits before its next attempt
//! - [`ForwardingPipeline`]: the filter → process → forward → delete state machine

pub mod pipeline;
pub mod retry;

pub use pipeline::{ForwardingPipeline, HandleOutcome};
pub use retry::RetryPolicy;
