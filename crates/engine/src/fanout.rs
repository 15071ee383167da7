//! Broadcast fan-out.
//!
//! A broadcast job never delivers anything itself. It enumerates the
//! directory, collapses duplicate records, and republishes one single-user job
//! per addressable user onto the work queue in batches.

use std::collections::HashMap;
use std::sync::Arc;

use herald_common::types::{DispatchJob, UserRecord};

use crate::directory::UserDirectory;
use crate::error::DispatchError;
use crate::queue::JobQueue;

/// Jobs per published batch.
pub const BROADCAST_BATCH_SIZE: usize = 100;

/// Summary of one fan-out run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Distinct users after de-duplication
    pub users: usize,
    /// Jobs built (users with an address)
    pub jobs: usize,
    pub batches_attempted: usize,
    pub batches_failed: usize,
}

/// Collapse records sharing an `aad_id`. The last record seen wins but keeps
/// the position of the first.
pub fn dedupe_by_id(records: Vec<UserRecord>) -> Vec<UserRecord> {
    let mut position: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<UserRecord> = Vec::with_capacity(records.len());

    for record in records {
        match position.get(&record.aad_id) {
            Some(&index) => unique[index] = record,
            None => {
                position.insert(record.aad_id.clone(), unique.len());
                unique.push(record);
            }
        }
    }

    unique
}

/// One single-user job per record that has an address. Broadcast is never set
/// on the produced jobs.
pub fn build_jobs(records: &[UserRecord], activity: &serde_json::Value) -> Vec<DispatchJob> {
    records
        .iter()
        .filter_map(|record| record.address())
        .map(|address| DispatchJob::for_user(address, activity.clone()))
        .collect()
}

/// Split `items` into consecutive batches of `size`, the last possibly shorter.
pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();

    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }

    batches
}

pub struct BroadcastFanout {
    directory: Arc<dyn UserDirectory>,
    queue: Arc<dyn JobQueue>,
    batch_size: usize,
}

impl BroadcastFanout {
    pub fn new(directory: Arc<dyn UserDirectory>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            directory,
            queue,
            batch_size: BROADCAST_BATCH_SIZE,
        }
    }

    /// Expand `activity` into one queued job per addressable user.
    ///
    /// A failed batch is logged and counted; later batches are still attempted.
    pub async fn fan_out(&self, activity: &serde_json::Value) -> Result<FanoutReport, DispatchError> {
        let users = dedupe_by_id(self.directory.list_all().await?);
        let jobs = build_jobs(&users, activity);

        let messages = jobs
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = FanoutReport {
            users: users.len(),
            jobs: messages.len(),
            ..FanoutReport::default()
        };

        for (index, batch) in partition(messages, self.batch_size).into_iter().enumerate() {
            report.batches_attempted += 1;
            if let Err(e) = self.queue.publish_batch(&batch).await {
                report.batches_failed += 1;
                tracing::error!(
                    batch = index,
                    size = batch.len(),
                    error = %e,
                    "Failed to publish broadcast batch"
                );
            }
        }

        if report.batches_failed > 0 {
            tracing::warn!(
                users = report.users,
                jobs = report.jobs,
                batches_attempted = report.batches_attempted,
                batches_failed = report.batches_failed,
                "Broadcast fan-out finished with failures"
            );
        } else {
            tracing::info!(
                users = report.users,
                jobs = report.jobs,
                batches = report.batches_attempted,
                "Broadcast fanned out"
            );
        }

        Ok(report)
    }
}
