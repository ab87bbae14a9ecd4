//! Forwarder lifecycle: startup handshake, background cycles, shutdown and
//! status snapshots across restarts
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::{path::Path, sync::Arc, time::Duration};

use courier_common::Signal;
use courier_forward::{
    ConfigError, ForwardError, ForwardQueryService, ForwarderConfig, Forwarder, Hooks,
    MemorySource, ResourceSetId, Trigger,
};
use support::{
    CountingProcessor, GatedTransport, RecordingTransport, registry, registry_with, study_source,
    wait_until, with_processor,
};

fn fast_config() -> ForwarderConfig {
    let mut config = support::peer_config();
    config.polling_interval_ms = 10;
    config.max_startup_attempts = 3;
    config
}

fn forwarder(
    config: ForwarderConfig,
    source: &MemorySource,
    transport: &Arc<RecordingTransport>,
    hooks: Hooks,
) -> Forwarder {
    Forwarder::new(
        config,
        Arc::new(source.clone()),
        Arc::new(source.clone()),
        registry(transport),
        hooks,
    )
    .unwrap()
}

/// Study `st` parked on its delivery to `a` (with `b` always failing), and a
/// second study `st2` queued behind it
async fn parked_forwarder(
    source: &MemorySource,
    recorder: &Arc<RecordingTransport>,
) -> (Forwarder, Arc<GatedTransport>) {
    source.add_instance("st2", "se", "late", 1);
    recorder.fail_always("b");
    let gated = GatedTransport::new(recorder, "a");

    let forwarder = Forwarder::new(
        fast_config(),
        Arc::new(source.clone()),
        Arc::new(source.clone()),
        registry_with(Arc::clone(&gated) as Arc<dyn courier_forward::Transport>),
        Hooks::default(),
    )
    .unwrap();

    forwarder.start().await.unwrap();
    gated.wait_entered().await;

    (forwarder, gated)
}

fn with_state(path: &Path) -> ForwarderConfig {
    let mut config = fast_config();
    config.state_path = Some(path.to_path_buf());
    config
}

#[tokio::test]
async fn test_run_once_follows_trigger() {
    let source = study_source();
    let transport = RecordingTransport::new();
    let mut config = fast_config();
    config.trigger = Trigger::Series;
    let forwarder = forwarder(config, &source, &transport, Hooks::default());

    let report = forwarder.run_once().await.unwrap();

    assert_eq!(report.seen, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(transport.calls_to("a"), 2);
    assert!(source.is_empty());
}

#[tokio::test]
async fn test_background_loop_forwards_new_sets() {
    let source = study_source();
    let transport = RecordingTransport::new();
    let forwarder = forwarder(fast_config(), &source, &transport, Hooks::default());

    forwarder.start().await.unwrap();
    assert!(forwarder.is_running());
    wait_until(|| source.is_empty()).await;

    source.add_instance("st2", "se", "late", 1);
    wait_until(|| source.is_empty()).await;

    forwarder.stop().await.unwrap();
    assert!(!forwarder.is_running());
    assert_eq!(transport.calls_to("b"), 2);
}

#[tokio::test]
async fn test_start_and_stop_are_checked() {
    let source = study_source();
    let transport = RecordingTransport::new();
    let forwarder = forwarder(fast_config(), &source, &transport, Hooks::default());

    assert!(matches!(
        forwarder.stop().await,
        Err(ForwardError::NotRunning)
    ));

    forwarder.start().await.unwrap();
    assert!(matches!(
        forwarder.start().await,
        Err(ForwardError::AlreadyRunning)
    ));

    forwarder.stop().await.unwrap();
    assert!(matches!(
        forwarder.stop().await,
        Err(ForwardError::NotRunning)
    ));

    // A stopped forwarder can be started again
    forwarder.start().await.unwrap();
    forwarder.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_source_prevents_start() {
    let source = study_source();
    source.set_unavailable_for(10);
    let transport = RecordingTransport::new();
    let forwarder = forwarder(fast_config(), &source, &transport, Hooks::default());

    let err = forwarder.start().await.unwrap_err();

    assert!(matches!(err, ForwardError::Connectivity { attempts: 3 }));
    assert!(!forwarder.is_running());
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_processor_needs_overwriting_source() {
    let source = study_source();
    source.set_overwrites_instances(Some(false));
    let transport = RecordingTransport::new();
    let processor = CountingProcessor::new();
    let forwarder = forwarder(fast_config(), &source, &transport, with_processor(&processor));

    let err = forwarder.start().await.unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(
        err,
        ForwardError::Config(ConfigError::IncompatibleSource(_))
    ));
    assert_eq!(processor.runs(), 0);
}

#[tokio::test]
async fn test_external_signal_stops_loop() {
    let source = MemorySource::new();
    let transport = RecordingTransport::new();
    let forwarder = forwarder(fast_config(), &source, &transport, Hooks::default());

    forwarder.start().await.unwrap();
    forwarder.signal().send(Signal::Finalised).unwrap();

    forwarder.stop().await.unwrap();
    assert!(!forwarder.is_running());
}

#[tokio::test]
async fn test_stop_waits_for_invocation_in_flight() {
    let source = study_source();
    let recorder = RecordingTransport::new();
    let (forwarder, gated) = parked_forwarder(&source, &recorder).await;

    let release = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        // stop() is still waiting on the parked delivery
        assert!(forwarder.is_running());
        gated.release();
    };
    let (stopped, ()) = tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(forwarder.stop(), release) },
    )
    .await
    .unwrap();
    stopped.unwrap();

    let status = forwarder
        .status(&ResourceSetId::study("st"))
        .await
        .unwrap();
    assert!(status.has_sent_to("a"));
    assert!(!status.has_sent_to("b"));
    assert_eq!(status.retry_count, 1);
    assert!(status.next_retry_at.is_some());

    // The queued set never started
    assert_eq!(gated.entries(), 1);
    assert!(forwarder.status(&ResourceSetId::study("st2")).await.is_none());
    assert_eq!(recorder.calls_to("a"), 1);
    assert_eq!(source.len(), 4);
}

#[tokio::test]
async fn test_signal_during_cycle_skips_remaining_sets() {
    let source = study_source();
    let recorder = RecordingTransport::new();
    let (forwarder, gated) = parked_forwarder(&source, &recorder).await;

    forwarder.signal().send(Signal::Finalised).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    gated.release();

    wait_until(|| recorder.calls_to("a") == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(gated.entries(), 1);
    assert!(forwarder.status(&ResourceSetId::study("st2")).await.is_none());

    forwarder.stop().await.unwrap();
    assert_eq!(
        forwarder
            .status(&ResourceSetId::study("st"))
            .await
            .unwrap()
            .retry_count,
        1
    );
}

#[tokio::test]
async fn test_run_scoped_always_stops() {
    let source = study_source();
    let transport = RecordingTransport::new();
    let forwarder = forwarder(fast_config(), &source, &transport, Hooks::default());

    let (source_ref, transport_ref) = (&source, &transport);
    let delivered = forwarder
        .run_scoped(move || async move {
            wait_until(|| source_ref.is_empty()).await;
            transport_ref.calls().len()
        })
        .await
        .unwrap();

    assert_eq!(delivered, 2);
    assert!(!forwarder.is_running());
    assert!(matches!(
        forwarder.stop().await,
        Err(ForwardError::NotRunning)
    ));
}

#[tokio::test]
async fn test_status_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.bin");
    let id = ResourceSetId::study("st");

    let source = study_source();
    let transport = RecordingTransport::new();
    transport.fail_always("b");

    let first = forwarder(with_state(&path), &source, &transport, Hooks::default());
    let report = first.run_once().await.unwrap();
    assert_eq!(report.retry_scheduled, 1);
    assert!(path.exists());

    // A new process picks up where the last one left off
    let transport = RecordingTransport::new();
    let second = forwarder(with_state(&path), &source, &transport, Hooks::default());
    second.start().await.unwrap();

    let status = second.status(&id).await.unwrap();
    assert!(status.has_sent_to("a"));
    assert_eq!(status.retry_count, 1);
    assert_eq!(second.tracked_len(), 1);

    // Opening the gate sends only to the destination still missing
    assert!(second.retry_now(&id).await);
    wait_until(|| source.is_empty()).await;
    second.stop().await.unwrap();

    assert_eq!(transport.calls_to("a"), 0);
    assert_eq!(transport.calls_to("b"), 1);
    assert!(second.list_statuses().await.is_empty());
}

#[tokio::test]
async fn test_query_service_forget() {
    let source = study_source();
    let transport = RecordingTransport::new();
    transport.fail_always("b");
    let forwarder = forwarder(fast_config(), &source, &transport, Hooks::default());
    let id = ResourceSetId::study("st");

    forwarder.run_once().await.unwrap();
    assert_eq!(forwarder.list_statuses().await.len(), 1);

    let last = forwarder.forget(&id).await.unwrap();
    assert!(last.has_sent_to("a"));
    assert_eq!(forwarder.tracked_len(), 0);
    assert!(ForwardQueryService::status(&forwarder, &id).await.is_none());

    // Forgotten sets start over, so `a` receives the set again
    forwarder.run_once().await.unwrap();
    assert_eq!(transport.calls_to("a"), 2);
}
