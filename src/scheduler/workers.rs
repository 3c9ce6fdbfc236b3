//! # Analysis Workers
//!
//! Each worker takes one task at a time off the queue, opens a pending record,
//! runs the pipeline under the configured timeout and commits exactly one
//! terminal outcome.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisError, AnalysisPipeline, AnalysisSections, CancelToken};
use crate::store::{FailureKind, RecordId, RecordUpdate, ResultStore};
use crate::task::{AnalysisTask, FileId};

use super::SchedulerCounters;

/// State shared by every worker of one scheduler.
pub(crate) struct WorkerContext {
    pub(crate) pipeline: AnalysisPipeline,
    pub(crate) store: Arc<dyn ResultStore>,
    pub(crate) counters: Arc<SchedulerCounters>,
    pub(crate) timeout: Duration,
}

/// Spawn `count` analysis workers draining `rx` until it is closed and empty.
pub(crate) fn spawn_analysis_workers(
    count: usize,
    rx: Receiver<AnalysisTask>,
    ctx: Arc<WorkerContext>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::with_capacity(count);
    for idx in 0..count {
        let rx = rx.clone();
        let ctx = Arc::clone(&ctx);
        let spawned = thread::Builder::new()
            .name(format!("analysis-worker-{idx}"))
            .spawn(move || {
                for task in rx {
                    run_task(&ctx, task);
                }
                debug!("analysis worker {idx} exiting");
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(err) => warn!("failed to spawn analysis worker {idx}: {err}"),
        }
    }
    handles
}

enum Outcome {
    Completed(AnalysisSections),
    Failed(String),
    TimedOut,
}

fn run_task(ctx: &Arc<WorkerContext>, task: AnalysisTask) {
    let pipeline_ctx = Arc::clone(ctx);
    execute(ctx, task, move |task, cancel| {
        pipeline_ctx
            .pipeline
            .analyze(&task.file, &task.params, cancel)
    });
}

/// Open the record, run `job` under the worker deadline and commit its outcome.
fn execute<F>(ctx: &WorkerContext, task: AnalysisTask, job: F)
where
    F: FnOnce(&AnalysisTask, &CancelToken) -> Result<AnalysisSections, AnalysisError>
        + Send
        + 'static,
{
    let file_id = task.file.id;
    let record_id = match ctx.store.create_record(&task) {
        Ok(id) => id,
        Err(err) => {
            ctx.counters.persist_errors.fetch_add(1, Ordering::Relaxed);
            warn!("could not open analysis record for file_id={file_id}: {err}");
            return;
        }
    };
    debug!(
        "analysing task={} file_id={} record={} path={}",
        task.id,
        file_id,
        record_id,
        task.file.file_path.display()
    );

    let started = Instant::now();
    let outcome = run_with_deadline(task, started + ctx.timeout, job);
    commit(ctx, file_id, record_id, outcome, started.elapsed());
}

/// Run `job` on its own thread and wait for it until `deadline`.
///
/// A job still running at the deadline is cancelled and left to finish on its
/// own; its result is discarded.
fn run_with_deadline<F>(task: AnalysisTask, deadline: Instant, job: F) -> Outcome
where
    F: FnOnce(&AnalysisTask, &CancelToken) -> Result<AnalysisSections, AnalysisError>
        + Send
        + 'static,
{
    let (done_tx, done_rx) = bounded::<Result<AnalysisSections, AnalysisError>>(1);
    let cancel = CancelToken::new();

    let job_cancel = cancel.clone();
    let spawned = thread::Builder::new()
        .name(format!("analysis-task-{}", task.id))
        .spawn(move || {
            let result = job(&task, &job_cancel);
            // The worker may have given up already.
            let _ = done_tx.send(result);
        });
    if let Err(err) = spawned {
        return Outcome::Failed(format!("failed to start analysis: {err}"));
    }

    match done_rx.recv_deadline(deadline) {
        Ok(Ok(sections)) => Outcome::Completed(sections),
        Ok(Err(err)) => Outcome::Failed(err.to_string()),
        Err(RecvTimeoutError::Timeout) => {
            cancel.cancel();
            Outcome::TimedOut
        }
        Err(RecvTimeoutError::Disconnected) => {
            Outcome::Failed("analysis aborted unexpectedly".to_string())
        }
    }
}

fn commit(
    ctx: &WorkerContext,
    file_id: FileId,
    record_id: RecordId,
    outcome: Outcome,
    elapsed: Duration,
) {
    let (update, mark_analyzed) = match outcome {
        Outcome::Completed(sections) => (RecordUpdate::completed(sections), true),
        Outcome::Failed(message) => (RecordUpdate::failed(FailureKind::Pipeline, message), false),
        Outcome::TimedOut => (
            RecordUpdate::failed(
                FailureKind::Timeout,
                format!("analysis timed out after {:?}", ctx.timeout),
            ),
            true,
        ),
    };
    let status = update.status;
    let failure = update.failure;
    let error = update.error.clone();

    match ctx.store.update_record(record_id, update) {
        Ok(true) => {}
        Ok(false) => {
            debug!("record {record_id} already terminal; outcome discarded");
            return;
        }
        Err(err) => {
            ctx.counters.persist_errors.fetch_add(1, Ordering::Relaxed);
            warn!("could not store analysis result for file_id={file_id} record={record_id}: {err}");
            return;
        }
    }

    match failure {
        None => {
            ctx.counters.completed.fetch_add(1, Ordering::Relaxed);
            info!(
                "analysis completed file_id={file_id} record={record_id} elapsed={elapsed:?}"
            );
        }
        Some(FailureKind::Timeout) => {
            ctx.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            warn!("analysis timed out file_id={file_id} record={record_id} after {:?}", ctx.timeout);
        }
        Some(FailureKind::Pipeline) => {
            ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                "analysis failed file_id={file_id} record={record_id} status={}: {}",
                status.as_str(),
                error.as_deref().unwrap_or_default()
            );
        }
    }

    if mark_analyzed {
        if let Err(err) = ctx.store.mark_analyzed(file_id) {
            ctx.counters.persist_errors.fetch_add(1, Ordering::Relaxed);
            warn!("could not mark file_id={file_id} analyzed: {err}");
        }
    }
}
