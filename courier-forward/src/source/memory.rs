use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::SourceError,
    resource::{Group, Item, ItemId, ResourceSet, ResourceSetId},
    source::{ChangeFeed, Source, SourceCapabilities},
    types::Trigger,
};

#[derive(Debug, Clone)]
struct StoredInstance {
    study: String,
    series: String,
    size_bytes: u64,
}

#[derive(Debug, Default)]
struct Inner {
    instances: BTreeMap<ItemId, StoredInstance>,
    /// Every id actually removed by `delete_items`, in order
    deleted: Vec<ItemId>,
    /// Liveness checks left to fail before the source reports itself alive
    unavailable_checks: u32,
    /// Upcoming `delete_items` calls that fail
    failing_deletes: u32,
    overwrites_instances: Option<bool>,
}

/// In-memory source repository
///
/// Holds studies, series and instances in a `BTreeMap` behind an `RwLock`, so
/// resource sets come out in a stable order. It is primarily intended for
/// testing, with a few knobs to inject failures, but it is a complete
/// [`Source`] and [`ChangeFeed`] and can back transient setups.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<RwLock<Inner>>,
}

impl MemorySource {
    /// Create a new empty source that overwrites instances in place
    #[must_use]
    pub fn new() -> Self {
        let source = Self::default();
        source.set_overwrites_instances(Some(true));
        source
    }

    /// Store an instance, replacing any instance with the same id
    pub fn add_instance(&self, study: &str, series: &str, instance: &str, size_bytes: u64) {
        self.inner.write().instances.insert(
            ItemId::new(instance),
            StoredInstance {
                study: study.to_string(),
                series: series.to_string(),
                size_bytes,
            },
        );
    }

    /// Report the source as down for the next `checks` liveness probes
    pub fn set_unavailable_for(&self, checks: u32) {
        self.inner.write().unavailable_checks = checks;
    }

    /// Make the next `count` deletions fail
    pub fn fail_next_deletes(&self, count: u32) {
        self.inner.write().failing_deletes = count;
    }

    pub fn set_overwrites_instances(&self, overwrites: Option<bool>) {
        self.inner.write().overwrites_instances = overwrites;
    }

    #[must_use]
    pub fn contains(&self, item: &ItemId) -> bool {
        self.inner.read().instances.contains_key(item)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids removed so far, in deletion order
    #[must_use]
    pub fn deleted(&self) -> Vec<ItemId> {
        self.inner.read().deleted.clone()
    }

    /// Build the resource set for a stored study
    #[must_use]
    pub fn study(&self, study: &str) -> Option<ResourceSet> {
        self.collect(ResourceSetId::study(study), |i| i.study == study)
    }

    /// Build the resource set for a stored series
    #[must_use]
    pub fn series(&self, series: &str) -> Option<ResourceSet> {
        self.collect(ResourceSetId::series(series), |i| i.series == series)
    }

    /// Build the resource set for a single stored instance
    #[must_use]
    pub fn instance(&self, instance: &str) -> Option<ResourceSet> {
        let inner = self.inner.read();
        let stored = inner.instances.get(&ItemId::new(instance))?;

        Some(ResourceSet::new(
            ResourceSetId::instance(instance),
            vec![Group::new(
                stored.series.clone(),
                vec![Item::new(instance, stored.size_bytes)],
            )],
        ))
    }

    fn collect(
        &self,
        id: ResourceSetId,
        matches: impl Fn(&StoredInstance) -> bool,
    ) -> Option<ResourceSet> {
        let inner = self.inner.read();
        let mut groups: BTreeMap<&str, Vec<Item>> = BTreeMap::new();

        for (item, stored) in inner.instances.iter().filter(|(_, s)| matches(s)) {
            groups.entry(stored.series.as_str()).or_default().push(Item {
                id: item.clone(),
                size_bytes: stored.size_bytes,
            });
        }

        if groups.is_empty() {
            return None;
        }

        Some(ResourceSet::new(
            id,
            groups
                .into_iter()
                .map(|(series, items)| Group::new(series, items))
                .collect(),
        ))
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn is_alive(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.unavailable_checks > 0 {
            inner.unavailable_checks -= 1;
            return false;
        }

        true
    }

    async fn capabilities(&self) -> Result<SourceCapabilities, SourceError> {
        Ok(SourceCapabilities {
            overwrites_instances: self.inner.read().overwrites_instances,
        })
    }

    async fn delete_items(&self, items: &[ItemId]) -> Result<(), SourceError> {
        let mut inner = self.inner.write();

        if inner.failing_deletes > 0 {
            inner.failing_deletes -= 1;
            return Err(SourceError::Request(format!(
                "delete of {} items refused",
                items.len()
            )));
        }

        for item in items {
            if inner.instances.remove(item).is_some() {
                inner.deleted.push(item.clone());
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemorySource {
    async fn pending(&self, trigger: Trigger) -> Result<Vec<ResourceSet>, SourceError> {
        let keys: BTreeSet<String> = {
            let inner = self.inner.read();
            inner
                .instances
                .iter()
                .map(|(item, stored)| match trigger {
                    Trigger::Study => stored.study.clone(),
                    Trigger::Series => stored.series.clone(),
                    Trigger::Instance => item.to_string(),
                })
                .collect()
        };

        Ok(keys
            .iter()
            .filter_map(|key| match trigger {
                Trigger::Study => self.study(key),
                Trigger::Series => self.series(key),
                Trigger::Instance => self.instance(key),
            })
            .collect())
    }
}
