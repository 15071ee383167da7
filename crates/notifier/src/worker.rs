//! Queue consumption loop.
//!
//! Jobs are independent: each one runs on its own task, at most
//! `concurrency` at a time. A permit is taken *before* popping from the queue
//! so the worker never holds more messages than it can run. Every job is
//! acknowledged once it finishes, whatever its outcome, so only a crash of the
//! process itself leaves jobs in flight. Shutdown is observed between polls;
//! in-flight jobs are drained before returning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use herald_engine::error::DispatchError;
use herald_engine::handler::{DispatchJobHandler, JobOutcome};
use herald_engine::queue::RedisJobConsumer;

/// Pause after a failed queue read before polling again.
const QUEUE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Where raw jobs come from.
#[async_trait]
pub trait JobSource: Send {
    /// Next raw message, or `None` if nothing arrived within the poll window.
    async fn next_job(&mut self) -> Result<Option<String>, DispatchError>;

    /// Mark a message taken by `next_job` as finished.
    async fn ack(&mut self, raw: &str) -> Result<(), DispatchError>;
}

#[async_trait]
impl JobSource for RedisJobConsumer {
    async fn next_job(&mut self) -> Result<Option<String>, DispatchError> {
        RedisJobConsumer::next_job(self).await
    }

    async fn ack(&mut self, raw: &str) -> Result<(), DispatchError> {
        RedisJobConsumer::ack(self, raw).await
    }
}

/// A finished task: the message it ran and how the job ended.
type Finished = (String, Result<JobOutcome, JoinError>);

/// What runs a single job.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, raw: &str) -> JobOutcome;
}

#[async_trait]
impl JobRunner for DispatchJobHandler {
    async fn run(&self, raw: &str) -> JobOutcome {
        self.handle(raw).await
    }
}

/// Tally of finished jobs, reported on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: u64,
    pub throttled: u64,
    pub broadcasts: u64,
    pub failed: u64,
    /// Tasks that panicked
    pub crashed: u64,
}

impl WorkerStats {
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Delivered { .. } => self.delivered += 1,
            JobOutcome::Throttled { .. } => self.throttled += 1,
            JobOutcome::Broadcast(_) => self.broadcasts += 1,
            JobOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.delivered + self.throttled + self.broadcasts + self.failed + self.crashed
    }
}

pub struct NotifierWorker<S, R> {
    source: S,
    runner: Arc<R>,
    concurrency: usize,
    shutdown: Arc<AtomicBool>,
}

impl<S: JobSource, R: JobRunner> NotifierWorker<S, R> {
    pub fn new(source: S, runner: Arc<R>, concurrency: usize, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            source,
            runner,
            concurrency: concurrency.max(1),
            shutdown,
        }
    }

    /// Consume until the shutdown flag is set, then wait for in-flight jobs.
    pub async fn run(mut self) -> WorkerStats {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut stats = WorkerStats::default();

        tracing::info!(concurrency = self.concurrency, "Notifier worker started");

        while !self.shutdown.load(Ordering::SeqCst) {
            while let Some(done) = tasks.try_join_next() {
                self.collect(&mut stats, done).await;
            }

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };

            match self.source.next_job().await {
                Ok(Some(raw)) => {
                    let runner = self.runner.clone();
                    tasks.spawn(async move {
                        // Inner task so a panicking job still reports its message.
                        let job = {
                            let raw = raw.clone();
                            tokio::spawn(async move { runner.run(&raw).await }).await
                        };
                        drop(permit);
                        (raw, job)
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read from work queue");
                    tokio::time::sleep(QUEUE_ERROR_PAUSE).await;
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Shutdown requested, draining in-flight jobs");
        while let Some(done) = tasks.join_next().await {
            self.collect(&mut stats, done).await;
        }

        tracing::info!(
            delivered = stats.delivered,
            throttled = stats.throttled,
            broadcasts = stats.broadcasts,
            failed = stats.failed,
            crashed = stats.crashed,
            "Notifier worker stopped"
        );
        stats
    }

    async fn collect(&mut self, stats: &mut WorkerStats, done: Result<Finished, JoinError>) {
        let (raw, job) = match done {
            Ok(finished) => finished,
            Err(e) => {
                stats.crashed += 1;
                tracing::error!(error = %e, "Dispatch task failed before reporting its job");
                return;
            }
        };

        match job {
            Ok(outcome) => stats.record(&outcome),
            Err(e) => {
                stats.crashed += 1;
                tracing::error!(error = %e, "Dispatch task panicked");
            }
        }

        if let Err(e) = self.source.ack(&raw).await {
            tracing::error!(error = %e, "Failed to acknowledge finished job");
        }
    }
}
