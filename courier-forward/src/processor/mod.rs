//! Forwarder lifecycle
//!
//! The [`Forwarder`] owns the pipeline and drives it from the event source:
//! after a startup handshake with the source it runs forwarding cycles in a
//! background task until it is told to stop.

pub mod persist;
pub mod process;
pub mod startup;

use std::{
    path::Path,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use courier_common::{Signal, internal};
use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    config::ForwarderConfig,
    error::{ConfigError, ForwardError},
    policy::ForwardingPipeline,
    source::{ChangeFeed, Hooks, Source},
    status::StatusStore,
    transport::TransportRegistry,
};

pub use process::CycleReport;

/// Runs forwarding cycles against an event source
#[derive(Debug)]
pub struct Forwarder {
    config: Arc<ForwarderConfig>,
    source: Arc<dyn Source>,
    feed: Arc<dyn ChangeFeed>,
    pipeline: Arc<ForwardingPipeline>,
    shutdown: broadcast::Sender<Signal>,
    stopping: Arc<AtomicBool>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Forwarder {
    /// Build a forwarder. Nothing runs until [`Self::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a destination's
    /// mode has no registered transport.
    pub fn new(
        config: ForwarderConfig,
        source: Arc<dyn Source>,
        feed: Arc<dyn ChangeFeed>,
        transports: TransportRegistry,
        hooks: Hooks,
    ) -> Result<Self, ConfigError> {
        let pipeline = ForwardingPipeline::new(&config, Arc::clone(&source), transports, hooks)?;
        let (shutdown, _) = broadcast::channel(16);

        Ok(Self {
            config: Arc::new(config),
            source,
            feed,
            pipeline: Arc::new(pipeline),
            shutdown,
            stopping: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &ForwardingPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn status_store(&self) -> &StatusStore {
        self.pipeline.status()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A sender that stops the forwarding loop when it broadcasts a [`Signal`].
    ///
    /// Like [`Self::stop`], a signal sent during a cycle keeps the remaining
    /// sets of that cycle from starting. It does not wait for the loop;
    /// [`Self::stop`] still has to be called to join it.
    #[must_use]
    pub fn signal(&self) -> broadcast::Sender<Signal> {
        self.shutdown.clone()
    }

    /// Wait for the source, restore the status snapshot and start forwarding
    /// in the background.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::AlreadyRunning`] if the forwarder was already
    /// started, or the handshake error if the source is unusable.
    pub async fn start(&self) -> Result<(), ForwardError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ForwardError::AlreadyRunning);
        }

        if let Err(e) = self.prepare().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.stopping.store(false, Ordering::SeqCst);

        let serve = serve(
            Arc::clone(&self.config),
            Arc::clone(&self.feed),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.stopping),
            self.shutdown.subscribe(),
        );
        *self.task.lock() = Some(tokio::spawn(serve));

        internal!(
            level = INFO,
            "Forwarder started with {} destination(s), trigger {}",
            self.config.destinations.len(),
            self.config.trigger
        );

        Ok(())
    }

    async fn prepare(&self) -> Result<(), ForwardError> {
        startup::wait_source_started(
            self.source.as_ref(),
            self.config.max_startup_attempts,
            self.config.polling_interval(),
            self.pipeline.hooks().processor.is_some(),
        )
        .await?;

        if let Some(path) = &self.config.state_path {
            let records = persist::load(path).await?;
            info!(path = %path.display(), records = records.len(), "Restored status snapshot");
            self.status_store().restore(records);
        }

        Ok(())
    }

    /// Stop taking new work, wait for in-flight invocations and the loop to
    /// finish, then save the status snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::NotRunning`] if the forwarder was not started,
    /// or [`ForwardError::Task`] if the loop task panicked.
    pub async fn stop(&self) -> Result<(), ForwardError> {
        let Some(task) = self.task.lock().take() else {
            return Err(ForwardError::NotRunning);
        };

        internal!(level = INFO, "Stopping forwarder");
        self.stopping.store(true, Ordering::SeqCst);

        if self.shutdown.send(Signal::Shutdown).is_err() {
            debug!("Forwarding loop already exited");
        }

        let joined = task.await;
        self.running.store(false, Ordering::SeqCst);
        joined.map_err(|e| ForwardError::Task(e.to_string()))?;

        internal!(level = INFO, "Forwarder stopped");
        Ok(())
    }

    /// Run a single forwarding cycle in the calling task.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Feed`] if the event source cannot list
    /// pending resource sets.
    pub async fn run_once(&self) -> Result<CycleReport, ForwardError> {
        let report = process::process_pending(
            self.feed.as_ref(),
            &self.pipeline,
            self.config.trigger,
            self.config.worker_count,
            &AtomicBool::new(false),
        )
        .await
        .map_err(ForwardError::Feed)?;

        save_state(self.config.state_path.as_deref(), self.status_store()).await;
        Ok(report)
    }

    /// Start the forwarder, run `scope`, then stop it.
    ///
    /// The forwarder is told to stop even if `scope` panics or the returned
    /// future is dropped early; only the normal path waits for it.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::start`] or [`Self::stop`].
    pub async fn run_scoped<F, Fut, T>(&self, scope: F) -> Result<T, ForwardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.start().await?;

        let mut guard = StopOnDrop {
            forwarder: self,
            armed: true,
        };
        let result = scope().await;
        guard.armed = false;

        self.stop().await?;
        Ok(result)
    }
}

/// Signals the loop to stop when a scoped run is abandoned
struct StopOnDrop<'a> {
    forwarder: &'a Forwarder,
    armed: bool,
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Scoped run ended abnormally, signalling the forwarder to stop");
            self.forwarder.stopping.store(true, Ordering::SeqCst);
            let _ = self.forwarder.shutdown.send(Signal::Shutdown);
        }
    }
}

/// The forwarding loop: one cycle, then a pause, until a shutdown signal.
///
/// A signal received during a cycle stops further sets from starting; the
/// ones already in flight finish before the loop exits.
async fn serve(
    config: Arc<ForwarderConfig>,
    feed: Arc<dyn ChangeFeed>,
    pipeline: Arc<ForwardingPipeline>,
    stopping: Arc<AtomicBool>,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    internal!("Forwarding loop starting");
    let mut signalled = false;

    loop {
        let mut cycle = pin!(process::process_pending(
            feed.as_ref(),
            &pipeline,
            config.trigger,
            config.worker_count,
            &stopping,
        ));

        let result = loop {
            tokio::select! {
                result = &mut cycle => break result,
                sig = shutdown.recv(), if !signalled => {
                    log_signal(&sig);
                    signalled = true;
                    stopping.store(true, Ordering::SeqCst);
                }
            }
        };

        match result {
            Ok(report) if report.seen > 0 => {
                info!(
                    seen = report.seen,
                    completed = report.completed,
                    deferred = report.deferred,
                    retry_scheduled = report.retry_scheduled,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Forwarding cycle finished"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Could not list pending resource sets"),
        }

        save_state(config.state_path.as_deref(), pipeline.status()).await;

        if signalled {
            break;
        }

        tokio::select! {
            () = tokio::time::sleep(config.polling_interval()) => {}
            sig = shutdown.recv() => {
                log_signal(&sig);
                break;
            }
        }
    }

    stopping.store(true, Ordering::SeqCst);
    save_state(config.state_path.as_deref(), pipeline.status()).await;
    internal!("Forwarding loop finished");
}

fn log_signal(sig: &Result<Signal, broadcast::error::RecvError>) {
    match sig {
        Ok(Signal::Shutdown | Signal::Finalised) => {
            internal!("Forwarding loop received shutdown signal");
        }
        Err(e) => error!("Forwarding loop shutdown channel error: {e}"),
    }
}

async fn save_state(path: Option<&Path>, status: &StatusStore) {
    if let Some(path) = path
        && let Err(e) = persist::save(path, status).await
    {
        warn!(path = %path.display(), error = %e, "Could not save status snapshot");
    }
}
