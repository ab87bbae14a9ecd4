//! Query and control surface over forwarding status
//!
//! Decouples control interfaces (an admin endpoint, a CLI) from the concrete
//! [`Forwarder`].

use async_trait::async_trait;

use crate::{
    processor::Forwarder,
    resource::ResourceSetId,
    status::record::ResourceSetStatus,
};

/// Inspect and steer the status of tracked resource sets
///
/// # Example
///
/// ```rust,ignore
/// async fn stuck(service: &dyn ForwardQueryService) -> usize {
///     service
///         .list_statuses()
///         .await
///         .iter()
///         .filter(|(_, status)| status.retry_count > 3)
///         .count()
/// }
/// ```
#[async_trait]
pub trait ForwardQueryService: Send + Sync {
    /// Number of resource sets currently tracked
    fn tracked_len(&self) -> usize;

    /// Status of a resource set, `None` if it is not tracked
    async fn status(&self, id: &ResourceSetId) -> Option<ResourceSetStatus>;

    /// Every tracked resource set and its status, ordered by identity
    async fn list_statuses(&self) -> Vec<(ResourceSetId, ResourceSetStatus)>;

    /// Let the next invocation for `id` proceed regardless of its retry time.
    ///
    /// Returns `false` if `id` is not tracked.
    async fn retry_now(&self, id: &ResourceSetId) -> bool;

    /// Drop the record of `id`; its next invocation starts from scratch.
    ///
    /// Returns the last known status, `None` if `id` is not tracked.
    async fn forget(&self, id: &ResourceSetId) -> Option<ResourceSetStatus>;
}

#[async_trait]
impl ForwardQueryService for Forwarder {
    fn tracked_len(&self) -> usize {
        self.status_store().len()
    }

    async fn status(&self, id: &ResourceSetId) -> Option<ResourceSetStatus> {
        self.status_store().peek(id).await
    }

    async fn list_statuses(&self) -> Vec<(ResourceSetId, ResourceSetStatus)> {
        self.status_store().snapshot().await
    }

    async fn retry_now(&self, id: &ResourceSetId) -> bool {
        self.status_store().retry_now(id).await
    }

    async fn forget(&self, id: &ResourceSetId) -> Option<ResourceSetStatus> {
        self.status_store().clear(id).await
    }
}
