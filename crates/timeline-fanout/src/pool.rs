//! Pool of fan-out workers sharded by author.
//!
//! The bus is broadcast, so every worker task sees every post. Each task
//! owns one shard and processes only posts whose author hashes to it:
//!
//! ```text
//!                 +--> shard 0: author % N == 0 --> FanoutWorker --+
//! EventBus -------+--> shard 1: author % N == 1 --> FanoutWorker --+--> reports
//!                 +--> ...                                          |
//!                 +--> shard N-1                --> FanoutWorker --+
//! ```
//!
//! One author's posts therefore always land on one task and are processed
//! in publish order, which keeps per-author ordering intact all the way to
//! each follower's timeline. Posts by different authors interleave freely.
//!
//! Backpressure comes from three bounds: the bus queue depth, the number
//! of shards, and the per-post write concurrency.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use timeline_bus::{EventBus, StopHandle, Subscription};
use timeline_store::{FollowerGraph, TimelineStore};
use timeline_types::PostEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FanoutError;
use crate::report::{DeliveryOutcome, DeliveryReport};
use crate::worker::{FanoutWorker, WorkerSettings};

/// Default number of worker shards.
pub const DEFAULT_WORKER_COUNT: u32 = 4;

/// Default capacity of the delivery report channel.
pub const DEFAULT_REPORT_CAPACITY: usize = 1024;

/// Sizing for a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker tasks (shards). Values below 1 act as 1.
    pub worker_count: u32,
    /// Settings shared by every worker.
    pub worker: WorkerSettings,
    /// Reports buffered for [`PoolHandle::take_reports`] before new ones
    /// are only logged.
    pub report_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            worker: WorkerSettings::default(),
            report_capacity: DEFAULT_REPORT_CAPACITY,
        }
    }
}

/// Running counters across all workers in a pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    posts_processed: AtomicU64,
    entries_written: AtomicU64,
    partial_deliveries: AtomicU64,
    undelivered_posts: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Posts this pool has finished processing.
    pub posts_processed: u64,
    /// Timeline entries successfully appended.
    pub entries_written: u64,
    /// Posts that reached some but not all followers.
    pub partial_deliveries: u64,
    /// Posts whose follower set could not be resolved.
    pub undelivered_posts: u64,
}

impl PoolStats {
    fn record(&self, report: &DeliveryReport) {
        self.posts_processed.fetch_add(1, Ordering::Relaxed);
        self.entries_written.fetch_add(
            u64::try_from(report.delivered).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        match report.outcome {
            DeliveryOutcome::Delivered => {}
            DeliveryOutcome::PartiallyDelivered => {
                self.partial_deliveries.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryOutcome::Undelivered => {
                self.undelivered_posts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            posts_processed: self.posts_processed.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            partial_deliveries: self.partial_deliveries.load(Ordering::Relaxed),
            undelivered_posts: self.undelivered_posts.load(Ordering::Relaxed),
        }
    }
}

/// Starts sharded fan-out workers.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool;

impl WorkerPool {
    /// Subscribe `worker_count` shards to `bus` and spawn their tasks.
    ///
    /// Every subscription is open before this returns, so any post
    /// published afterwards reaches the shard that owns its author.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::Subscribe`] if a subscription fails. Shards
    /// already started are stopped before returning.
    pub async fn start<B, G, T>(
        bus: &B,
        graph: Arc<G>,
        timelines: Arc<T>,
        config: &PoolConfig,
    ) -> Result<PoolHandle, FanoutError>
    where
        B: EventBus,
        G: FollowerGraph + 'static,
        T: TimelineStore + 'static,
    {
        let total = config.worker_count.max(1);

        let mut subscriptions = Vec::new();
        for _ in 0..total {
            match bus.subscribe().await {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => {
                    for sub in &subscriptions {
                        sub.stop_handle().stop();
                    }
                    return Err(e.into());
                }
            }
        }

        let (reports_tx, reports_rx) = mpsc::channel(config.report_capacity.max(1));
        let stats = Arc::new(PoolStats::default());
        let mut stops = Vec::new();
        let mut tasks = Vec::new();

        for (shard, subscription) in (0..total).zip(subscriptions) {
            stops.push(subscription.stop_handle());
            let worker =
                FanoutWorker::new(Arc::clone(&graph), Arc::clone(&timelines), config.worker);
            tasks.push(tokio::spawn(run_shard(
                worker,
                subscription,
                shard,
                total,
                reports_tx.clone(),
                Arc::clone(&stats),
            )));
        }

        info!(
            workers = total,
            write_concurrency = config.worker.write_concurrency,
            max_attempts = config.worker.retry.max_attempts,
            "fan-out worker pool started"
        );

        Ok(PoolHandle {
            stops,
            tasks,
            reports: Some(reports_rx),
            stats,
        })
    }
}

/// Error recorded for posts still queued when the pool stopped.
const STOPPED_BEFORE_FANOUT: &str = "worker pool stopped before the post was fanned out";

/// Process every post owned by `shard` until the subscription ends, then
/// record whatever the bus had already queued for it as undelivered.
async fn run_shard<G, T>(
    worker: FanoutWorker<G, T>,
    mut subscription: Subscription,
    shard: u32,
    total: u32,
    reports: mpsc::Sender<DeliveryReport>,
    stats: Arc<PoolStats>,
) where
    G: FollowerGraph,
    T: TimelineStore,
{
    debug!(shard, total, "fan-out worker started");

    while let Some(event) = subscription.next().await {
        if event.post.user_id.shard(total) != shard {
            continue;
        }
        let report = worker.process(&event).await;
        emit(shard, report, &reports, &stats);
    }

    let abandoned: Vec<PostEvent> = subscription
        .drain_ready()
        .into_iter()
        .filter(|event| event.post.user_id.shard(total) == shard)
        .collect();
    if !abandoned.is_empty() {
        let sequences: Vec<u64> = abandoned.iter().map(|event| event.sequence).collect();
        warn!(
            shard,
            count = abandoned.len(),
            sequences = ?sequences,
            "worker stopped with posts still queued, recording them undelivered"
        );
        for event in &abandoned {
            let report = DeliveryReport::undelivered(event, 0, STOPPED_BEFORE_FANOUT.to_owned());
            emit(shard, report, &reports, &stats);
        }
    }

    debug!(shard, "fan-out worker stopped");
}

/// Count `report` and hand it to the report channel if there is room.
fn emit(
    shard: u32,
    report: DeliveryReport,
    reports: &mpsc::Sender<DeliveryReport>,
    stats: &PoolStats,
) {
    stats.record(&report);
    match reports.try_send(report) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(report)) => {
            warn!(
                shard,
                sequence = report.sequence,
                outcome = ?report.outcome,
                "report channel full, report only logged"
            );
        }
    }
}

/// Handle to a running pool.
#[derive(Debug)]
pub struct PoolHandle {
    stops: Vec<StopHandle>,
    tasks: Vec<JoinHandle<()>>,
    reports: Option<mpsc::Receiver<DeliveryReport>>,
    stats: Arc<PoolStats>,
}

impl PoolHandle {
    /// Take the receiver of per-post [`DeliveryReport`]s.
    ///
    /// Returns `None` after the first call.
    pub const fn take_reports(&mut self) -> Option<mpsc::Receiver<DeliveryReport>> {
        self.reports.take()
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of worker tasks.
    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every worker and wait for them to exit.
    ///
    /// A post already being fanned out finishes first. Posts the bus had
    /// already queued for a worker are not fanned out; each one is logged
    /// and reported as [`DeliveryOutcome::Undelivered`] instead.
    pub async fn shutdown(self) {
        for stop in &self.stops {
            stop.stop();
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "fan-out worker task ended abnormally");
            }
        }
        info!(stats = ?self.stats.snapshot(), "fan-out worker pool stopped");
    }
}
