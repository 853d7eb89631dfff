use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::exchange_queue::ExchangeQueue;
use crate::data_capture::recorder::{ExchangeRecorder, RecordOutcome};
use crate::endpoint_discovery::{Dedupe, EndpointNormalizer, SeenSet, SyncState};
use crate::http_reconstruction::types::ExchangeRecord;
use crate::sync_client::Synchronizer;

/// What happens to sync tasks still running when the queue closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingSyncs {
    Abort,
    Wait,
}

/// Totals reported when the consumer stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    pub records: u64,
    pub written: u64,
    pub write_failures: u64,
    pub endpoints: u64,
    pub syncs_finished: u64,
    pub syncs_aborted: u64,
}

/// The single task draining the [`ExchangeQueue`].
///
/// Each record is written to the capture log first. Request records are then
/// normalized; a key seen for the first time starts a sync task, with at
/// most `max_concurrent_syncs` of them talking to the platform at once.
pub struct Consumer {
    queue: Arc<ExchangeQueue>,
    recorder: ExchangeRecorder,
    normalizer: EndpointNormalizer,
    seen: Arc<SeenSet>,
    synchronizer: Arc<Synchronizer>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<SyncState>,
    on_close: PendingSyncs,
    report: ConsumerReport,
}

impl Consumer {
    pub fn new(
        queue: Arc<ExchangeQueue>,
        recorder: ExchangeRecorder,
        normalizer: EndpointNormalizer,
        synchronizer: Arc<Synchronizer>,
        max_concurrent_syncs: usize,
    ) -> Self {
        Self {
            queue,
            recorder,
            normalizer,
            seen: synchronizer.seen().clone(),
            synchronizer,
            permits: Arc::new(Semaphore::new(max_concurrent_syncs.max(1))),
            tasks: JoinSet::new(),
            on_close: PendingSyncs::Abort,
            report: ConsumerReport::default(),
        }
    }

    pub fn on_close(mut self, pending: PendingSyncs) -> Self {
        self.on_close = pending;
        self
    }

    /// Runs until the queue is closed and drained.
    pub async fn run(mut self) -> ConsumerReport {
        while let Some(record) = self.queue.pop().await {
            self.handle(record);
            self.reap();
        }

        match self.on_close {
            PendingSyncs::Abort => {
                let running = self.tasks.len();
                if running > 0 {
                    info!("Aborting {} in-flight sync tasks", running);
                }
                self.tasks.abort_all();
            }
            PendingSyncs::Wait => {
                if !self.tasks.is_empty() {
                    info!("Waiting for {} sync tasks", self.tasks.len());
                }
            }
        }
        while let Some(result) = self.tasks.join_next().await {
            self.tally(result);
        }

        self.report.write_failures = self.recorder.failures();
        info!(
            "Consumer stopped: {} records, {} written, {} endpoints",
            self.report.records, self.report.written, self.report.endpoints
        );
        self.report
    }

    fn handle(&mut self, record: ExchangeRecord) {
        self.report.records += 1;
        if self.recorder.record(&record) == RecordOutcome::Written {
            self.report.written += 1;
        }

        let Some(endpoint) = self.normalizer.normalize(&record) else {
            return;
        };
        if self.seen.dedupe(&endpoint.key) == Dedupe::AlreadySeen {
            return;
        }

        self.report.endpoints += 1;
        info!("Discovered endpoint {}", endpoint.key);
        let synchronizer = self.synchronizer.clone();
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return SyncState::Discovered,
            };
            synchronizer.sync(endpoint).await
        });
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.tally(result);
        }
    }

    fn tally(&mut self, result: Result<SyncState, tokio::task::JoinError>) {
        match result {
            Ok(state) => {
                debug!("Sync task finished in {:?}", state);
                self.report.syncs_finished += 1;
            }
            Err(e) if e.is_cancelled() => self.report.syncs_aborted += 1,
            Err(e) => warn!("Sync task failed: {}", e),
        }
    }
}
