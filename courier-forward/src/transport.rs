//! Transports and delivery-mode dispatch
//!
//! A [`Transport`] moves items to a named destination over one protocol. The
//! [`TransportRegistry`] picks the transport for a destination's mode and cuts
//! the resource set into calls according to the mode's strategy.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use async_trait::async_trait;
use courier_common::outgoing;
use tracing::info;

use crate::{
    error::{ConfigError, ForwardError, TransportError},
    resource::{ItemId, ResourceSet},
    types::{Destination, DispatchStrategy, Protocol},
};

/// Uncompressed size above which a group is sent one item per call
pub const DEFAULT_SPLIT_THRESHOLD_BYTES: u64 = 1024 * 1024 * 1024;

/// Sends items to a destination.
///
/// Must be safe to call again for items that were already delivered: a set
/// whose delivery failed half-way is sent again in full.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, destination: &str, items: &[ItemId]) -> Result<(), TransportError>;
}

/// Transports keyed by the protocol they implement
#[derive(Debug, Clone, Default)]
pub struct TransportRegistry {
    transports: AHashMap<Protocol, Arc<dyn Transport>>,
}

impl TransportRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` for `protocol`, replacing any previous one
    #[must_use]
    pub fn with(mut self, protocol: Protocol, transport: Arc<dyn Transport>) -> Self {
        self.register(protocol, transport);
        self
    }

    pub fn register(&mut self, protocol: Protocol, transport: Arc<dyn Transport>) {
        self.transports.insert(protocol, transport);
    }

    #[must_use]
    pub fn supports(&self, protocol: Protocol) -> bool {
        self.transports.contains_key(&protocol)
    }

    /// Check that every destination's mode has a transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedMode`] for the first destination
    /// that cannot be served.
    pub fn validate(&self, destinations: &[Destination]) -> Result<(), ConfigError> {
        destinations
            .iter()
            .try_for_each(|destination| self.transport_for(destination).map(|_| ()))
    }

    fn transport_for(&self, destination: &Destination) -> Result<&Arc<dyn Transport>, ConfigError> {
        self.transports
            .get(&destination.mode.protocol())
            .ok_or_else(|| ConfigError::UnsupportedMode {
                destination: destination.name.clone(),
                mode: destination.mode,
            })
    }

    /// Deliver `set` to `destination` using the destination's mode.
    ///
    /// Calls are made one after the other; the first failing call aborts the
    /// delivery to this destination.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Config`] if no transport serves the mode, or
    /// [`ForwardError::Transport`] if a call fails.
    pub async fn dispatch(
        &self,
        destination: &Destination,
        set: &ResourceSet,
        split_threshold_bytes: u64,
    ) -> Result<(), ForwardError> {
        let transport = self.transport_for(destination)?;
        let name = destination.name.as_str();

        match destination.mode.strategy() {
            DispatchStrategy::WholeSet => {
                outgoing!(level = DEBUG, "{set} -> {name}: {} items", set.len());
                transport.send(name, &set.item_ids()).await?;
            }
            DispatchStrategy::PerGroup => {
                for group in set.groups() {
                    outgoing!(level = DEBUG, "{set} -> {name}: group {}", group.id);
                    transport.send(name, &group.item_ids()).await?;
                }
            }
            DispatchStrategy::PerGroupSplit => {
                for group in set.groups() {
                    if group.size_bytes() > split_threshold_bytes {
                        info!(
                            set = %set.id(),
                            group = %group.id,
                            size_bytes = group.size_bytes(),
                            "Group exceeds the split threshold, sending item by item"
                        );

                        for item in &group.items {
                            outgoing!(level = DEBUG, "{set} -> {name}: item {}", item.id);
                            transport.send(name, std::slice::from_ref(&item.id)).await?;
                        }
                    } else {
                        outgoing!(level = DEBUG, "{set} -> {name}: group {}", group.id);
                        transport.send(name, &group.item_ids()).await?;
                    }
                }
            }
        }

        Ok(())
    }
}
