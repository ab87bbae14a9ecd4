//! Test doubles for forwarding scenarios
//!
//! - [`RecordingTransport`]: records every delivery, with scripted failures per destination
//! - [`GatedTransport`]: holds every delivery to one destination until released
//! - [`CountingProcessor`]: counts processed items, optionally failing the first runs
#![allow(dead_code, clippy::unwrap_used)] // Not every helper is used by every test binary

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_forward::{
    Destination, ForwardMode, ForwarderConfig, ForwardingPipeline, Hooks, ItemId, ItemProcessor,
    MemorySource, Protocol, Source, Transport, TransportError, TransportRegistry,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// A successful transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub destination: String,
    pub items: Vec<ItemId>,
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    /// Remaining failures per destination; `u32::MAX` never runs out
    failures: Mutex<HashMap<String, u32>>,
    attempts: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `times` calls to `destination`
    pub fn fail(&self, destination: &str, times: u32) {
        self.failures.lock().insert(destination.to_string(), times);
    }

    pub fn fail_always(&self, destination: &str) {
        self.fail(destination, u32::MAX);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, destination: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.destination == destination)
            .count()
    }

    /// Every item delivered anywhere, in delivery order
    pub fn items_sent(&self) -> Vec<ItemId> {
        self.calls
            .lock()
            .iter()
            .flat_map(|call| call.items.clone())
            .collect()
    }

    /// Calls made, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, destination: &str, items: &[ItemId]) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(destination)
                && *remaining > 0
            {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }

                return Err(TransportError::Unreachable {
                    destination: destination.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
        }

        self.calls.lock().push(Call {
            destination: destination.to_string(),
            items: items.to_vec(),
        });

        Ok(())
    }
}

/// Wraps a [`RecordingTransport`], parking each send to `gated` until
/// [`GatedTransport::release`] is called
#[derive(Debug)]
pub struct GatedTransport {
    inner: Arc<RecordingTransport>,
    gated: String,
    entered: Notify,
    release: Notify,
    entries: AtomicUsize,
}

impl GatedTransport {
    pub fn new(inner: &Arc<RecordingTransport>, gated: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::clone(inner),
            gated: gated.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
            entries: AtomicUsize::new(0),
        })
    }

    /// Wait until a send to the gated destination is parked
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one parked send through
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Sends to the gated destination that started, released or not
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, destination: &str, items: &[ItemId]) -> Result<(), TransportError> {
        if destination == self.gated {
            self.entries.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
        }

        self.inner.send(destination, items).await
    }
}

#[derive(Debug, Default)]
pub struct CountingProcessor {
    runs: AtomicUsize,
    failing_runs: AtomicU32,
}

impl CountingProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `times` items
    pub fn fail(&self, times: u32) {
        self.failing_runs.store(times, Ordering::SeqCst);
    }

    /// Items processed successfully
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemProcessor for CountingProcessor {
    async fn process(&self, _source: &dyn Source, item: &ItemId) -> anyhow::Result<()> {
        if self
            .failing_runs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("anonymisation of {item} failed");
        }

        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One study `st` with two series: `se1` (`i1`, `i2`) and `se2` (`i3`)
pub fn study_source() -> MemorySource {
    let source = MemorySource::new();
    source.add_instance("st", "se1", "i1", 100);
    source.add_instance("st", "se1", "i2", 100);
    source.add_instance("st", "se2", "i3", 100);
    source
}

/// Destinations `a` and `b`, both over the peer protocol
pub fn peer_config() -> ForwarderConfig {
    ForwarderConfig::new(vec![
        Destination::new("a", ForwardMode::Peering),
        Destination::new("b", ForwardMode::Peering),
    ])
}

/// Every protocol served by `transport`
pub fn registry(transport: &Arc<RecordingTransport>) -> TransportRegistry {
    registry_with(Arc::clone(transport) as Arc<dyn Transport>)
}

pub fn registry_with(transport: Arc<dyn Transport>) -> TransportRegistry {
    [
        Protocol::Dicom,
        Protocol::DicomWeb,
        Protocol::Peer,
        Protocol::Transfer,
    ]
    .into_iter()
    .fold(TransportRegistry::new(), |registry, protocol| {
        registry.with(protocol, Arc::clone(&transport))
    })
}

pub fn pipeline(
    config: &ForwarderConfig,
    source: &MemorySource,
    transport: &Arc<RecordingTransport>,
    hooks: Hooks,
) -> ForwardingPipeline {
    ForwardingPipeline::new(config, Arc::new(source.clone()), registry(transport), hooks).unwrap()
}

pub fn with_processor(processor: &Arc<CountingProcessor>) -> Hooks {
    Hooks {
        processor: Some(Arc::clone(processor) as Arc<dyn ItemProcessor>),
        ..Hooks::default()
    }
}

/// Poll `condition` until it holds, panicking after a few seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(waited.is_ok(), "condition not met in time");
}
