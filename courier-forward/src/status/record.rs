//! Per-resource-set forwarding status

use std::{collections::BTreeSet, time::SystemTime};

use serde::{Deserialize, Serialize};

use crate::types::Destination;

/// Where a resource set is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardStage {
    /// Still being delivered to at least one destination
    #[default]
    Forwarding,
    /// Delivered everywhere, but deleting it from the source failed
    AwaitingDeletion,
    /// Delivered and deleted; the record is no longer tracked
    Completed,
}

/// Forwarding progress of one resource set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSetStatus {
    /// Set once processing succeeded; never reset
    pub processed: bool,
    /// Destinations confirmed delivered; only ever grows
    pub sent_to: BTreeSet<String>,
    /// Number of failed cycles so far
    pub retry_count: u32,
    /// No attempt may start before this time
    pub next_retry_at: Option<SystemTime>,
    pub stage: ForwardStage,
}

impl ResourceSetStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The scheduled retry time, if it is still in the future relative to `now`
    #[must_use]
    pub fn waiting_until(&self, now: SystemTime) -> Option<SystemTime> {
        self.next_retry_at.filter(|at| *at > now)
    }

    pub const fn mark_processed(&mut self) {
        self.processed = true;
    }

    /// Union `destinations` into `sent_to`
    pub fn record_sent<I, S>(&mut self, destinations: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sent_to.extend(destinations.into_iter().map(Into::into));
    }

    pub fn schedule_retry(&mut self, retry_count: u32, next_retry_at: SystemTime) {
        self.retry_count = retry_count;
        self.next_retry_at = Some(next_retry_at);
    }

    #[must_use]
    pub fn has_sent_to(&self, destination: &str) -> bool {
        self.sent_to.contains(destination)
    }

    /// Whether every configured destination has been delivered
    #[must_use]
    pub fn covers(&self, destinations: &[Destination]) -> bool {
        destinations.iter().all(|d| self.has_sent_to(&d.name))
    }

    /// Configured destinations still waiting for delivery
    #[must_use]
    pub fn pending<'a>(&self, destinations: &'a [Destination]) -> Vec<&'a Destination> {
        destinations
            .iter()
            .filter(|d| !self.has_sent_to(&d.name))
            .collect()
    }
}
