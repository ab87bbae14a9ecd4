//! Forwarding of resource sets from a source repository to destinations
//!
//! This crate provides:
//! - Per resource set status tracking ([`StatusStore`])
//! - The filter → process → forward → delete state machine ([`ForwardingPipeline`])
//! - Retry scheduling with a saturating backoff table ([`RetryPolicy`])
//! - Delivery modes dispatched onto pluggable [`Transport`]s
//! - A [`Forwarder`] that drives the pipeline from a [`ChangeFeed`]

pub mod config;
mod error;
pub mod policy;
pub mod processor;
pub mod resource;
mod service;
pub mod source;
pub mod status;
pub mod transport;
mod types;

pub use config::ForwarderConfig;
// Re-export error types
pub use error::{ConfigError, ForwardError, SourceError, StateError, TransportError};
pub use policy::{ForwardingPipeline, HandleOutcome, RetryPolicy};
pub use processor::{CycleReport, Forwarder};
pub use resource::{Filtered, Group, Item, ItemId, ResourceSet, ResourceSetId};
pub use service::ForwardQueryService;
pub use source::{
    ChangeFeed, Hooks, ItemFilter, ItemProcessor, Source, SourceCapabilities,
    memory::MemorySource,
};
pub use status::{
    StatusGuard, StatusStore,
    record::{ForwardStage, ResourceSetStatus},
};
pub use transport::{Transport, TransportRegistry};
pub use types::{Destination, DispatchStrategy, ForwardMode, Protocol, Trigger};
