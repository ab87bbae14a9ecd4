//! Typed error handling for forwarding operations.
//!
//! The taxonomy separates failures by how the forwarder reacts to them:
//! - Configuration and connectivity errors are fatal and never retried
//! - Filter and delete errors are surfaced to the caller of a single invocation
//! - Transport errors are isolated per destination and retried with backoff

use std::io;

use thiserror::Error;

use crate::{resource::ResourceSetId, types::ForwardMode};

/// Top-level forwarding error type.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Invalid configuration, raised immediately and never retried.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The source could not be reached while starting up.
    #[error("Could not connect to the source after {attempts} attempts")]
    Connectivity { attempts: u32 },

    /// Filtering failed; nothing is scheduled for retry.
    #[error("Filtering {set} failed: {source}")]
    Filter {
        set: ResourceSetId,
        #[source]
        source: SourceError,
    },

    /// Every destination received the set but it could not be deleted from the source.
    #[error("Deleting {set} failed after delivery to every destination: {source}")]
    Delete {
        set: ResourceSetId,
        #[source]
        source: SourceError,
    },

    /// The event source could not list pending resource sets.
    #[error("Event source failed: {0}")]
    Feed(#[source] SourceError),

    /// A single delivery to a destination failed.
    #[error("Delivery failed: {0}")]
    Transport(#[from] TransportError),

    /// Status snapshot could not be read or written.
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Forwarder is already running")]
    AlreadyRunning,

    #[error("Forwarder is not running")]
    NotRunning,

    /// The forwarder task panicked or was aborted.
    #[error("Forwarder task failed: {0}")]
    Task(String),
}

impl ForwardError {
    /// Returns `true` for errors that must stop the forwarder rather than a single set.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Connectivity { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No destinations configured")]
    NoDestinations,

    #[error("Destination configured more than once: {0}")]
    DuplicateDestination(String),

    /// No transport is registered for the protocol this mode needs.
    #[error("Destination {destination} uses mode {mode} but no transport is registered for it")]
    UnsupportedMode {
        destination: String,
        mode: ForwardMode,
    },

    #[error("Unknown forwarding mode: {0}")]
    UnknownMode(String),

    #[error("Retry interval table is empty")]
    EmptyRetryTable,

    #[error("Retry intervals must be ascending: {0:?}")]
    UnorderedRetryTable(Vec<u64>),

    #[error("Retry interval of {0}s exceeds the maximum of {max}s", max = crate::policy::retry::MAX_RETRY_INTERVAL_SECS)]
    RetryIntervalTooLong(u64),

    #[error("Retry jitter factor must be within [0.0, 1.0], got {0}")]
    InvalidJitter(f64),

    #[error("Worker count must be at least 1")]
    NoWorkers,

    /// The source cannot support the requested processing.
    #[error("Incompatible source configuration: {0}")]
    IncompatibleSource(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the source repository or by user callbacks running against it.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source unreachable: {0}")]
    Unreachable(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Source request failed: {0}")]
    Request(String),

    /// A filter or processor callback failed.
    #[error("Callback failed: {0}")]
    Callback(String),
}

impl SourceError {
    /// Wrap a callback error, keeping its whole context chain.
    pub fn callback(error: &anyhow::Error) -> Self {
        Self::Callback(format!("{error:#}"))
    }
}

/// Errors raised by a transport while sending to a destination.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Destination {destination} unreachable: {reason}")]
    Unreachable { destination: String, reason: String },

    #[error("Destination {destination} rejected the transfer: {reason}")]
    Rejected { destination: String, reason: String },

    #[error("Transfer to {destination} timed out")]
    Timeout { destination: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Returns `true` if the same transfer may succeed later.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Errors persisting or restoring the status snapshot.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Unsupported snapshot version {0}")]
    Version(u32),
}
