//! # Scheduler
//!
//! Owns the task queue, the analysis worker pool, the shared analysis
//! parameters and the result store. Uploads are handed over with
//! [`Scheduler::submit`], which never blocks.

pub mod workers;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisPipeline;
use crate::config::{AnalysisParameters, WorkerPoolConfig};
use crate::extractor::MetadataExtractor;
use crate::queue::{EnqueueError, TaskQueue};
use crate::store::ResultStore;
use crate::task::{AnalysisTask, SourceFile};

use workers::WorkerContext;

/// Queue and pool sizing, fixed for the scheduler's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub worker_timeout: Duration,
}

impl SchedulerConfig {
    pub fn from_pool(pool: &WorkerPoolConfig) -> Self {
        Self {
            queue_capacity: pool.analysis_queue_size,
            workers: pool.max_concurrent_analysis,
            worker_timeout: pool.worker_timeout(),
        }
    }
}

/// Counters collected while the scheduler runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub persist_errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) persist_errors: AtomicU64,
}

impl SchedulerCounters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct Scheduler {
    queue: TaskQueue,
    params: Arc<AnalysisParameters>,
    counters: Arc<SchedulerCounters>,
    handles: Vec<JoinHandle<()>>,
    next_task_id: AtomicU64,
}

impl Scheduler {
    /// Create the queue and start `cfg.workers` analysis workers.
    ///
    /// Zero workers is accepted: tasks are queued but never processed.
    pub fn start(
        cfg: SchedulerConfig,
        params: AnalysisParameters,
        store: Arc<dyn ResultStore>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Self {
        let queue = TaskQueue::new(cfg.queue_capacity);
        let counters = Arc::new(SchedulerCounters::default());
        let ctx = Arc::new(WorkerContext {
            pipeline: AnalysisPipeline::new(extractor),
            store,
            counters: counters.clone(),
            timeout: cfg.worker_timeout,
        });

        if cfg.workers == 0 {
            warn!("no analysis workers configured; queued files will not be analyzed");
        }
        let handles = workers::spawn_analysis_workers(cfg.workers, queue.receiver(), ctx);
        info!(
            "analysis scheduler started workers={} queue_capacity={} worker_timeout={:?}",
            handles.len(),
            cfg.queue_capacity,
            cfg.worker_timeout
        );

        Self {
            queue,
            params: Arc::new(params),
            counters,
            handles,
            next_task_id: AtomicU64::new(0),
        }
    }

    /// Queue `file` for analysis without blocking.
    ///
    /// Returns `false` when the queue is full or closed; the file is then not
    /// analyzed unless submitted again.
    pub fn submit(&self, file: &SourceFile) -> bool {
        let task = AnalysisTask {
            id: self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1,
            file: file.clone(),
            submitted_at: Utc::now(),
            params: Arc::clone(&self.params),
        };
        let task_id = task.id;

        match self.queue.try_enqueue(task) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!("queued task={} file_id={} name={}", task_id, file.id, file.file_name);
                true
            }
            Err(EnqueueError::Full) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "analysis queue is full; file {} (id {}) will not be analyzed",
                    file.file_name, file.id
                );
                false
            }
            Err(EnqueueError::Closed) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "analysis queue is closed; file {} (id {}) will not be analyzed",
                    file.file_name, file.id
                );
                false
            }
        }
    }

    pub fn params(&self) -> &AnalysisParameters {
        &self.params
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    /// Close the queue, let the workers drain what is already queued, and join them.
    pub fn shutdown(self) -> SchedulerStats {
        self.queue.close();
        let remaining = self.queue.len();
        if remaining > 0 {
            info!("draining {remaining} queued analysis tasks before shutdown");
        }
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("analysis worker panicked");
            }
        }
        let stats = self.counters.snapshot();
        info!(
            "analysis scheduler stopped submitted={} dropped={} completed={} failed={} timed_out={} persist_errors={}",
            stats.submitted,
            stats.dropped,
            stats.completed,
            stats.failed,
            stats.timed_out,
            stats.persist_errors
        );
        stats
    }
}
