//! Forwarding status store

pub mod record;

use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    resource::ResourceSetId,
    status::record::{ForwardStage, ResourceSetStatus},
};

type Entry = Arc<Mutex<ResourceSetStatus>>;

/// Tracks the forwarding status of every resource set seen so far.
///
/// Entries live in a sharded concurrent map, so unrelated sets never contend
/// on a shared lock. Each entry carries its own async mutex: holding it through
/// a [`StatusGuard`] serializes everything done for one identity, including
/// the awaits in between.
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    entries: Arc<DashMap<ResourceSetId, Entry>>,
}

impl StatusStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create the entry; the map reference is dropped before returning.
    fn entry(&self, id: &ResourceSetId) -> Entry {
        self.entries
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ResourceSetStatus::new())))
            .value()
            .clone()
    }

    fn existing(&self, id: &ResourceSetId) -> Option<Entry> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    fn is_current(&self, id: &ResourceSetId, entry: &Entry) -> bool {
        self.entries
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }

    /// Take exclusive ownership of the status of `id`, creating it if needed.
    ///
    /// Waits for any other holder of the same identity to finish. A record
    /// completed in the meantime is returned as is; one forgotten through
    /// [`Self::clear`] is replaced by a fresh record.
    pub async fn lock(&self, id: &ResourceSetId) -> StatusGuard {
        loop {
            let entry = self.entry(id);
            let guard = Arc::clone(&entry).lock_owned().await;

            if guard.stage == ForwardStage::Completed || self.is_current(id, &entry) {
                return StatusGuard {
                    id: id.clone(),
                    entry,
                    guard,
                };
            }
        }
    }

    /// Snapshot of the status of `id`, creating a fresh record if needed
    pub async fn get(&self, id: &ResourceSetId) -> ResourceSetStatus {
        self.lock(id).await.status().clone()
    }

    /// Snapshot of the status of `id` without creating it
    pub async fn peek(&self, id: &ResourceSetId) -> Option<ResourceSetStatus> {
        let entry = self.existing(id)?;
        let status = entry.lock().await.clone();
        Some(status)
    }

    pub async fn mark_processed(&self, id: &ResourceSetId) {
        self.lock(id).await.mark_processed();
    }

    pub async fn record_sent<I, S>(&self, id: &ResourceSetId, destinations: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock(id).await.record_sent(destinations);
    }

    pub async fn schedule_retry(
        &self,
        id: &ResourceSetId,
        retry_count: u32,
        next_retry_at: SystemTime,
    ) {
        self.lock(id).await.schedule_retry(retry_count, next_retry_at);
    }

    /// Clear the retry gate of an existing record so its next invocation proceeds.
    ///
    /// Returns `false` if `id` is not tracked.
    pub async fn retry_now(&self, id: &ResourceSetId) -> bool {
        let Some(entry) = self.existing(id) else {
            return false;
        };

        entry.lock().await.next_retry_at = None;
        true
    }

    /// Forget the record of `id`, returning it as it was before removal.
    ///
    /// Waits for the current holder to finish. Invocations queued behind it
    /// start over from a fresh record.
    pub async fn clear(&self, id: &ResourceSetId) -> Option<ResourceSetStatus> {
        let entry = self.existing(id)?;
        let status = entry.lock().await;

        self.entries
            .remove_if(id, |_, current| Arc::ptr_eq(current, &entry))
            .map(|_| status.clone())
    }

    /// Number of tracked resource sets
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every record, waiting for in-flight invocations to release theirs
    pub async fn snapshot(&self) -> Vec<(ResourceSetId, ResourceSetStatus)> {
        let entries: Vec<(ResourceSetId, Entry)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut snapshot = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let status = entry.lock().await.clone();
            if status.stage != ForwardStage::Completed {
                snapshot.push((id, status));
            }
        }

        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// Insert records, e.g. from a snapshot taken before a restart.
    ///
    /// Identities that are already tracked keep their current record.
    pub fn restore(&self, records: impl IntoIterator<Item = (ResourceSetId, ResourceSetStatus)>) {
        for (id, status) in records {
            self.entries
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(status)));
        }
    }
}

/// Exclusive access to the status of one resource set
#[derive(Debug)]
pub struct StatusGuard {
    id: ResourceSetId,
    entry: Entry,
    guard: OwnedMutexGuard<ResourceSetStatus>,
}

impl StatusGuard {
    #[must_use]
    pub const fn id(&self) -> &ResourceSetId {
        &self.id
    }

    #[must_use]
    pub fn status(&self) -> &ResourceSetStatus {
        &self.guard
    }

    pub fn mark_processed(&mut self) {
        self.guard.mark_processed();
    }

    pub fn record_sent<I, S>(&mut self, destinations: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guard.record_sent(destinations);
    }

    pub fn schedule_retry(&mut self, retry_count: u32, next_retry_at: SystemTime) {
        self.guard.schedule_retry(retry_count, next_retry_at);
    }

    /// Record that every destination was delivered but the source still holds the set
    pub fn await_deletion(&mut self) {
        self.guard.stage = ForwardStage::AwaitingDeletion;
    }

    /// Mark the record completed and remove it from `store`.
    ///
    /// Invocations already queued on this entry see `Completed` once the guard
    /// is released; later ones start from a fresh record.
    pub fn clear_from(mut self, store: &StatusStore) -> ResourceSetStatus {
        store
            .entries
            .remove_if(&self.id, |_, entry| Arc::ptr_eq(entry, &self.entry));
        self.complete()
    }

    /// Drop the record from `store` if this invocation was the first to see
    /// the set and left no progress behind.
    pub fn discard_if_untouched(self, store: &StatusStore) {
        if *self.guard == ResourceSetStatus::new() {
            store
                .entries
                .remove_if(&self.id, |_, entry| Arc::ptr_eq(entry, &self.entry));
        }
    }

    fn complete(&mut self) -> ResourceSetStatus {
        self.guard.stage = ForwardStage::Completed;
        self.guard.clone()
    }
}
