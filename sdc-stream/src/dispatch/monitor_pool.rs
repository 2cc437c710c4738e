//! Bounded background pool for monitoring jobs
//!
//! Submission never blocks: a job either gets a permit immediately or is
//! dropped and counted. Each job runs under a timeout with panics captured,
//! so nothing that happens here can reach the request path.

use futures::FutureExt;
use sdc_common::{Features, PredictionResult};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::artifacts::ArtifactBundle;
use crate::error::MonitoringError;
use crate::monitoring::Reporter;

/// Everything a reporter needs for one observation
pub struct MonitorJob {
    pub bundle: Arc<ArtifactBundle>,
    pub features: Features,
    pub result: PredictionResult,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub timed_out: u64,
    pub dropped: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    timed_out: AtomicU64,
    dropped: AtomicU64,
}

struct PoolInner {
    reporter: Arc<dyn Reporter>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    job_timeout: Duration,
    tracker: TaskTracker,
    counters: Counters,
}

#[derive(Clone)]
pub struct MonitorPool {
    inner: Arc<PoolInner>,
}

impl MonitorPool {
    pub fn new(reporter: Arc<dyn Reporter>, max_in_flight: usize, job_timeout: Duration) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            inner: Arc::new(PoolInner {
                reporter,
                permits: Arc::new(Semaphore::new(max_in_flight)),
                max_in_flight,
                job_timeout,
                tracker: TaskTracker::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Queue a job; returns false when the pool is saturated and the job was dropped
    pub fn submit(&self, job: MonitorJob) -> bool {
        let counters = &self.inner.counters;
        counters.submitted.fetch_add(1, Ordering::Relaxed);

        let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    student_id = %job.result.prediction.student_id,
                    max_in_flight = self.inner.max_in_flight,
                    "Monitor pool saturated; dropping monitoring job"
                );
                return false;
            }
        };

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            inner.run(job).await;
            drop(permit);
        });
        true
    }

    pub fn stats(&self) -> MonitorStats {
        let c = &self.inner.counters;
        MonitorStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            in_flight: self.inner.max_in_flight - self.inner.permits.available_permits(),
        }
    }

    /// Wait up to `limit` for in-flight jobs; true if the pool drained
    ///
    /// The pool keeps accepting jobs afterwards.
    pub async fn flush(&self, limit: Duration) -> bool {
        let tracker = &self.inner.tracker;
        tracker.close();
        let drained = tokio::time::timeout(limit, tracker.wait()).await.is_ok();
        tracker.reopen();
        drained
    }
}

impl PoolInner {
    async fn run(&self, job: MonitorJob) {
        let student_id = &job.result.prediction.student_id;
        let report = self
            .reporter
            .report(job.bundle.reference(), &job.features, &job.result);

        match tokio::time::timeout(self.job_timeout, AssertUnwindSafe(report).catch_unwind()).await {
            Ok(Ok(Ok(()))) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(student_id = %student_id, "Monitoring job completed");
            }
            Ok(Ok(Err(e))) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                match e {
                    MonitoringError::NoReference => {
                        debug!(student_id = %student_id, error = %e, "Monitoring job skipped drift")
                    }
                    _ => warn!(student_id = %student_id, error = %e, "Monitoring job failed"),
                }
            }
            Ok(Err(panic)) => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(
                    student_id = %student_id,
                    panic = %panic_message(panic.as_ref()),
                    "Monitoring job panicked"
                );
            }
            Err(_) => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    student_id = %student_id,
                    timeout_ms = self.job_timeout.as_millis() as u64,
                    "Monitoring job timed out"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
