//! A single forwarding cycle

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ForwardError, SourceError},
    policy::{ForwardingPipeline, HandleOutcome},
    resource::{ResourceSet, ResourceSetId},
    source::ChangeFeed,
    types::Trigger,
};

type Joined = (ResourceSetId, Result<HandleOutcome, ForwardError>);

/// What happened to the resource sets of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Resource sets reported by the event source
    pub seen: usize,
    pub completed: usize,
    pub deferred: usize,
    pub retry_scheduled: usize,
    pub already_completed: usize,
    /// Invocations that returned an error or panicked
    pub failed: usize,
    /// Resource sets left unhandled because a stop was requested
    pub skipped: usize,
}

impl CycleReport {
    fn record(&mut self, id: &ResourceSetId, result: Result<HandleOutcome, ForwardError>) {
        match result {
            Ok(HandleOutcome::Completed) => self.completed += 1,
            Ok(HandleOutcome::Deferred { .. }) => self.deferred += 1,
            Ok(HandleOutcome::RetryScheduled { .. }) => self.retry_scheduled += 1,
            Ok(HandleOutcome::AlreadyCompleted) => self.already_completed += 1,
            Err(e) if e.is_fatal() => {
                error!(set = %id, error = %e, "Fatal error while forwarding");
                self.failed += 1;
            }
            Err(e) => {
                warn!(set = %id, error = %e, "Forwarding failed");
                self.failed += 1;
            }
        }
    }
}

/// Fetch the pending resource sets from `feed` and run each of them through
/// `pipeline`, at most `worker_count` at a time.
///
/// Once `stopping` is set no new invocation is started; those already
/// running are awaited.
///
/// # Errors
///
/// Returns an error if the event source cannot list pending sets.
pub async fn process_pending(
    feed: &dyn ChangeFeed,
    pipeline: &Arc<ForwardingPipeline>,
    trigger: Trigger,
    worker_count: usize,
    stopping: &AtomicBool,
) -> Result<CycleReport, SourceError> {
    let pending = feed.pending(trigger).await?;

    Ok(process_sets(pipeline, pending, worker_count, stopping).await)
}

async fn process_sets(
    pipeline: &Arc<ForwardingPipeline>,
    sets: Vec<ResourceSet>,
    worker_count: usize,
    stopping: &AtomicBool,
) -> CycleReport {
    let mut report = CycleReport {
        seen: sets.len(),
        ..CycleReport::default()
    };

    if sets.is_empty() {
        debug!("No pending resource sets");
        return report;
    }

    info!(
        pending = sets.len(),
        workers = worker_count,
        "Forwarding pending resource sets"
    );

    let mut join_set = JoinSet::new();
    let mut pending = sets.into_iter();

    for _ in 0..worker_count.max(1) {
        if !spawn_next(&mut join_set, &mut pending, pipeline, stopping) {
            break;
        }
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((id, result)) => report.record(&id, result),
            Err(e) => {
                error!(error = %e, "Forwarding task panicked");
                report.failed += 1;
            }
        }

        spawn_next(&mut join_set, &mut pending, pipeline, stopping);
    }

    report.skipped = pending.len();
    if report.skipped > 0 {
        info!(skipped = report.skipped, "Stop requested, leaving remaining sets for later");
    }

    report
}

/// Start handling the next pending set, unless a stop was requested.
///
/// Returns `false` when nothing was spawned.
fn spawn_next(
    join_set: &mut JoinSet<Joined>,
    pending: &mut impl Iterator<Item = ResourceSet>,
    pipeline: &Arc<ForwardingPipeline>,
    stopping: &AtomicBool,
) -> bool {
    if stopping.load(Ordering::SeqCst) {
        return false;
    }

    let Some(set) = pending.next() else {
        return false;
    };

    let pipeline = Arc::clone(pipeline);
    join_set.spawn(async move {
        let result = pipeline.handle(&set).await;
        (set.id().clone(), result)
    });

    true
}
