//! The forwarding state machine
//!
//! A single invocation of [`ForwardingPipeline::handle`] walks a resource set
//! through its stages, picking up from wherever the last invocation for the
//! same identity left off:
//!
//! 1. **Retry gate**: skip sets whose retry time has not come yet
//! 2. **Filter**: delete rejected items, continue with the rest
//! 3. **Process**: run the processor once per set
//! 4. **Forward**: deliver to every destination not yet delivered
//! 5. **Completion**: delete once every destination has it, or schedule a retry

use std::{borrow::Cow, sync::Arc, time::SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    config::ForwarderConfig,
    error::{ConfigError, ForwardError},
    policy::RetryPolicy,
    resource::ResourceSet,
    source::{Hooks, Source},
    status::{StatusGuard, StatusStore, record::ForwardStage},
    transport::TransportRegistry,
    types::Destination,
};

/// What a single invocation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The retry gate is closed; nothing was done
    Deferred { until: SystemTime },
    /// Delivered everywhere and deleted from the source
    Completed,
    /// At least one step failed and the set will be retried
    RetryScheduled {
        retry_count: u32,
        next_retry_at: SystemTime,
        /// Destinations still waiting for delivery
        pending: Vec<String>,
    },
    /// Another invocation completed the set while this one waited for it
    AlreadyCompleted,
}

#[derive(Debug)]
pub struct ForwardingPipeline {
    destinations: Vec<Destination>,
    transports: TransportRegistry,
    source: Arc<dyn Source>,
    hooks: Hooks,
    status: StatusStore,
    retry: RetryPolicy,
    split_threshold_bytes: u64,
}

impl ForwardingPipeline {
    /// Build a pipeline for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a destination's
    /// mode has no registered transport.
    pub fn new(
        config: &ForwarderConfig,
        source: Arc<dyn Source>,
        transports: TransportRegistry,
        hooks: Hooks,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        transports.validate(&config.destinations)?;

        Ok(Self {
            destinations: config.destinations.clone(),
            transports,
            source,
            hooks,
            status: StatusStore::new(),
            retry: config.retry.clone(),
            split_threshold_bytes: config.split_threshold_bytes,
        })
    }

    /// Use `status` instead of a fresh store, e.g. one shared with another component
    #[must_use]
    pub fn with_status(mut self, status: StatusStore) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub const fn status(&self) -> &StatusStore {
        &self.status
    }

    #[must_use]
    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub const fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    #[must_use]
    pub fn source(&self) -> &dyn Source {
        self.source.as_ref()
    }

    /// Advance `set` as far as it can go right now.
    ///
    /// # Errors
    ///
    /// Returns an error if filtering fails, if the set was delivered
    /// everywhere but could not be deleted, or if a destination turns out to
    /// have no transport. Process and delivery failures are not errors: they
    /// schedule a retry, reported as [`HandleOutcome::RetryScheduled`].
    pub async fn handle(&self, set: &ResourceSet) -> Result<HandleOutcome, ForwardError> {
        self.handle_at(set, SystemTime::now()).await
    }

    /// [`Self::handle`] with an explicit clock
    ///
    /// # Errors
    ///
    /// See [`Self::handle`].
    #[tracing::instrument(level = "debug", skip_all, fields(set = %set.id()))]
    pub async fn handle_at(
        &self,
        set: &ResourceSet,
        now: SystemTime,
    ) -> Result<HandleOutcome, ForwardError> {
        // Held until the invocation returns
        let mut status = self.status.lock(set.id()).await;

        if status.status().stage == ForwardStage::Completed {
            debug!("Completed by a concurrent invocation");
            return Ok(HandleOutcome::AlreadyCompleted);
        }

        if let Some(until) = status.status().waiting_until(now) {
            debug!(retry_count = status.status().retry_count, "Retry gate closed");
            return Ok(HandleOutcome::Deferred { until });
        }

        if status.status().stage == ForwardStage::AwaitingDeletion {
            debug!("Delivered everywhere already, retrying deletion");
            return self.complete(status, set, now).await;
        }

        let set = match self.filter(set).await {
            Ok(set) => set,
            Err(e) => {
                status.discard_if_untouched(&self.status);
                return Err(e);
            }
        };

        if set.is_empty() {
            info!("Every item was filtered out, nothing left to forward");
            status.clear_from(&self.status);
            return Ok(HandleOutcome::Completed);
        }

        if !status.status().processed {
            if let Some(processor) = &self.hooks.processor
                && let Err(e) = set.for_each_item(self.source(), processor.as_ref()).await
            {
                warn!(error = %e, "Processing failed");
                return Ok(self.schedule_retry(&mut status, now));
            }

            status.mark_processed();
        }

        self.forward(&mut status, &set).await?;

        if status.status().covers(&self.destinations) {
            self.complete(status, &set, now).await
        } else {
            Ok(self.schedule_retry(&mut status, now))
        }
    }

    async fn filter<'a>(&self, set: &'a ResourceSet) -> Result<Cow<'a, ResourceSet>, ForwardError> {
        let Some(filter) = &self.hooks.filter else {
            return Ok(Cow::Borrowed(set));
        };

        let filtered = set
            .filter(self.source(), filter.as_ref())
            .await
            .map_err(|source| ForwardError::Filter {
                set: set.id().clone(),
                source,
            })?;

        if !filtered.rejected.is_empty() {
            info!(
                rejected = filtered.rejected.len(),
                kept = filtered.kept.len(),
                "Deleted items rejected by the filter"
            );
        }

        Ok(Cow::Owned(filtered.kept))
    }

    /// Deliver to every destination still missing the set, recording each
    /// success as soon as it happens.
    async fn forward(&self, status: &mut StatusGuard, set: &ResourceSet) -> Result<(), ForwardError> {
        let pending: Vec<Destination> = status
            .status()
            .pending(&self.destinations)
            .into_iter()
            .cloned()
            .collect();

        for destination in pending {
            match self
                .transports
                .dispatch(&destination, set, self.split_threshold_bytes)
                .await
            {
                Ok(()) => {
                    info!(destination = %destination.name, mode = %destination.mode, "Forwarded");
                    status.record_sent([destination.name]);
                }
                Err(ForwardError::Transport(e)) => {
                    warn!(
                        destination = %destination.name,
                        mode = %destination.mode,
                        temporary = e.is_temporary(),
                        error = %e,
                        "Forwarding failed"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Delete the fully delivered set and drop its status.
    async fn complete(
        &self,
        mut status: StatusGuard,
        set: &ResourceSet,
        now: SystemTime,
    ) -> Result<HandleOutcome, ForwardError> {
        match set.delete(self.source()).await {
            Ok(()) => {
                status.clear_from(&self.status);
                info!(items = set.len(), "Forwarded to every destination and deleted");
                Ok(HandleOutcome::Completed)
            }
            Err(source) => {
                status.await_deletion();
                self.schedule_retry(&mut status, now);

                Err(ForwardError::Delete {
                    set: set.id().clone(),
                    source,
                })
            }
        }
    }

    fn schedule_retry(&self, status: &mut StatusGuard, now: SystemTime) -> HandleOutcome {
        let failed_cycles = status.status().retry_count;
        let next_retry_at = self.retry.next_retry_at(failed_cycles, now);
        let retry_count = failed_cycles.saturating_add(1);

        status.schedule_retry(retry_count, next_retry_at);

        let pending: Vec<String> = status
            .status()
            .pending(&self.destinations)
            .into_iter()
            .map(|destination| destination.name.clone())
            .collect();

        info!(
            retry_count,
            next_retry_at = %DateTime::<Utc>::from(next_retry_at).to_rfc3339(),
            delay_secs = self.retry.delay_for(failed_cycles).as_secs(),
            pending = ?pending,
            stage = ?status.status().stage,
            "Retry scheduled"
        );

        HandleOutcome::RetryScheduled {
            retry_count,
            next_retry_at,
            pending,
        }
    }
}
