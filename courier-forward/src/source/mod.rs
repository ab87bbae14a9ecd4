//! Collaborators on the source side: the repository resource sets are read
//! from, the feed that reports them, and the optional filter/process hooks.

pub mod memory;

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::SourceError,
    resource::{ItemId, ResourceSet},
    types::Trigger,
};

/// What the source reports about its own configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCapabilities {
    /// Whether re-storing a modified item replaces the original in place.
    ///
    /// `None` when the source does not say.
    pub overwrites_instances: Option<bool>,
}

/// The repository resource sets are forwarded from
#[async_trait]
pub trait Source: Send + Sync + fmt::Debug {
    /// Liveness probe used by the startup handshake
    async fn is_alive(&self) -> bool;

    /// Report the capabilities relevant to processing
    async fn capabilities(&self) -> Result<SourceCapabilities, SourceError>;

    /// Delete items. Items that no longer exist are ignored.
    async fn delete_items(&self, items: &[ItemId]) -> Result<(), SourceError>;
}

/// The event source: reports the resource sets waiting to be forwarded.
///
/// Every set still present in the source is reported again on each call, which
/// is how failed sets get re-delivered; the pipeline's retry gate decides when
/// they are actually retried.
#[async_trait]
pub trait ChangeFeed: Send + Sync + fmt::Debug {
    async fn pending(&self, trigger: Trigger) -> Result<Vec<ResourceSet>, SourceError>;
}

/// Decides which items are forwarded; rejected items are deleted.
#[async_trait]
pub trait ItemFilter: Send + Sync {
    async fn keep(&self, source: &dyn Source, item: &ItemId) -> anyhow::Result<bool>;
}

#[async_trait]
impl<F> ItemFilter for F
where
    F: Fn(&ItemId) -> bool + Send + Sync,
{
    async fn keep(&self, _source: &dyn Source, item: &ItemId) -> anyhow::Result<bool> {
        Ok(self(item))
    }
}

/// Modifies an item in place before it is forwarded.
///
/// Runs at most once per resource set to completion. It must give the same
/// result when repeated against unmodified data, since a partially processed
/// set is processed again from the start.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, source: &dyn Source, item: &ItemId) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> ItemProcessor for F
where
    F: Fn(&ItemId) -> anyhow::Result<()> + Send + Sync,
{
    async fn process(&self, _source: &dyn Source, item: &ItemId) -> anyhow::Result<()> {
        self(item)
    }
}

/// Optional pipeline steps. A missing hook passes the set through unchanged.
#[derive(Clone, Default)]
pub struct Hooks {
    pub filter: Option<Arc<dyn ItemFilter>>,
    pub processor: Option<Arc<dyn ItemProcessor>>,
}

impl Hooks {
    #[must_use]
    pub fn with_filter(mut self, filter: impl ItemFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn with_processor(mut self, processor: impl ItemProcessor + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("filter", &self.filter.is_some())
            .field("processor", &self.processor.is_some())
            .finish()
    }
}
