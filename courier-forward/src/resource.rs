//! Resource sets: the unit of forwarding
//!
//! A resource set is a study, a series or a single instance, already expanded
//! by the event source into its series ("groups") and instances ("items").
//! The set itself is plain data; every side effect goes through a [`Source`].

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    error::SourceError,
    source::{ItemFilter, ItemProcessor, Source},
};

/// Identifier of a single item (instance) in the source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Stable identity of a resource set.
///
/// Derived from the id of the resource the set was built from, so every
/// invocation for the same study, series or instance maps to the same status
/// record no matter how many times it is retried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceSetId(String);

impl ResourceSetId {
    #[must_use]
    pub fn study(id: &str) -> Self {
        Self(format!("study:{id}"))
    }

    #[must_use]
    pub fn series(id: &str) -> Self {
        Self(format!("series:{id}"))
    }

    #[must_use]
    pub fn instance(id: &str) -> Self {
        Self(format!("instance:{id}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Uncompressed size, used to decide whether a group must be split
    pub size_bytes: u64,
}

impl Item {
    #[must_use]
    pub fn new(id: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: ItemId::new(id),
            size_bytes,
        }
    }
}

/// A subgroup of a resource set (a series within a study)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub items: Vec<Item>,
}

impl Group {
    #[must_use]
    pub fn new(id: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            id: id.into(),
            items,
        }
    }

    #[must_use]
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    /// Cumulative size of every item in this group
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.items
            .iter()
            .fold(0u64, |total, item| total.saturating_add(item.size_bytes))
    }
}

/// The outcome of filtering a resource set
#[derive(Debug)]
pub struct Filtered {
    /// The retained subset, still carrying the original identity
    pub kept: ResourceSet,
    /// Items that were rejected and deleted from the source
    pub rejected: Vec<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    id: ResourceSetId,
    groups: Vec<Group>,
}

impl ResourceSet {
    #[must_use]
    pub const fn new(id: ResourceSetId, groups: Vec<Group>) -> Self {
        Self { id, groups }
    }

    #[must_use]
    pub const fn id(&self) -> &ResourceSetId {
        &self.id
    }

    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.groups.iter().flat_map(|group| group.items.iter())
    }

    #[must_use]
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items().map(|item| item.id.clone()).collect()
    }

    /// Item ids of a single group, empty if the group is not part of this set
    #[must_use]
    pub fn group_item_ids(&self, group_id: &str) -> Vec<ItemId> {
        self.groups
            .iter()
            .find(|group| group.id == group_id)
            .map(Group::item_ids)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().map(|group| group.items.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of this set without the given items. Groups left empty are dropped.
    #[must_use]
    pub fn without(&self, removed: &BTreeSet<ItemId>) -> Self {
        let groups = self
            .groups
            .iter()
            .filter_map(|group| {
                let items: Vec<Item> = group
                    .items
                    .iter()
                    .filter(|item| !removed.contains(&item.id))
                    .cloned()
                    .collect();

                (!items.is_empty()).then(|| Group::new(group.id.clone(), items))
            })
            .collect();

        Self::new(self.id.clone(), groups)
    }

    /// Split the set with `filter` and delete the rejected items from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter callback fails or the rejected items
    /// cannot be deleted.
    pub async fn filter(
        &self,
        source: &dyn Source,
        filter: &dyn ItemFilter,
    ) -> Result<Filtered, SourceError> {
        let mut rejected = BTreeSet::new();

        for item in self.items() {
            let keep = filter
                .keep(source, &item.id)
                .await
                .map_err(|e| SourceError::callback(&e))?;

            if !keep {
                rejected.insert(item.id.clone());
            }
        }

        let kept = self.without(&rejected);
        let rejected: Vec<ItemId> = rejected.into_iter().collect();

        if !rejected.is_empty() {
            source.delete_items(&rejected).await?;
        }

        Ok(Filtered { kept, rejected })
    }

    /// Run `processor` over every item, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first callback error.
    pub async fn for_each_item(
        &self,
        source: &dyn Source,
        processor: &dyn ItemProcessor,
    ) -> Result<(), SourceError> {
        for item in self.items() {
            processor
                .process(source, &item.id)
                .await
                .map_err(|e| SourceError::callback(&e))?;
        }

        Ok(())
    }

    /// Delete every item of this set from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source refuses the deletion.
    pub async fn delete(&self, source: &dyn Source) -> Result<(), SourceError> {
        if self.is_empty() {
            return Ok(());
        }

        source.delete_items(&self.item_ids()).await
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} items in {} groups)",
            self.id,
            self.len(),
            self.groups.len()
        )
    }
}
