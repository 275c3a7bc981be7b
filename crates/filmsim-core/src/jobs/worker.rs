//! Worker pool draining the job queue.
//!
//! Each worker loops dequeue → execute → report → cleanup until it receives a
//! shutdown sentinel. A job runs in its own task so a panic is reported to the
//! user instead of taking the worker down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{Job, JobOutcome, JobQueue, ToolError, TransformTool};
use crate::catalog::{display_name, PresetCatalog};
use crate::quota::QuotaStore;
use crate::transport::ChatTransport;
use crate::workdir::{remove_quietly_blocking, WorkDirs};
use crate::UserId;

/// Shared dependencies of every worker
pub struct WorkerContext {
    /// Queue the workers drain
    pub queue: Arc<JobQueue>,
    /// Catalog used to re-resolve the preset of each job
    pub catalog: Arc<PresetCatalog>,
    /// Transform implementation
    pub tool: Arc<dyn TransformTool>,
    /// Usage counters
    pub quota: Arc<dyn QuotaStore>,
    /// Outbound chat operations
    pub transport: Arc<dyn ChatTransport>,
    /// Per-user working directories
    pub work: WorkDirs,
    /// Delete the uploaded photo once its job finishes
    pub delete_input: bool,
}

/// Fixed-size set of workers
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `count` workers (minimum one)
    #[must_use]
    pub fn spawn(count: usize, ctx: Arc<WorkerContext>) -> Self {
        let count = count.max(1);
        let handles = (0..count)
            .map(|n| tokio::spawn(worker_loop(n, Arc::clone(&ctx))))
            .collect();
        info!(workers = count, "Worker pool started");
        Self {
            queue: Arc::clone(&ctx.queue),
            handles,
        }
    }

    /// Let queued jobs finish, then stop every worker
    pub async fn shutdown(self) {
        self.queue.shutdown(self.handles.len()).await;
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(n: usize, ctx: Arc<WorkerContext>) {
    info!(worker = n, "Worker started");
    while let Some(job) = ctx.queue.dequeue().await {
        let (user_id, chat_id, status_message_id) =
            (job.user_id, job.chat_id, job.status_message_id);
        // On panic the job's guard has already released the user.
        let job_ctx = Arc::clone(&ctx);
        let task = tokio::spawn(async move { process_job(&job_ctx, job).await });

        if let Err(e) = task.await {
            error!(worker = n, user_id, error = %e, "Job task panicked");
            let text = JobOutcome::Failed("internal error.".to_string()).status_text();
            if let Err(e) = ctx
                .transport
                .edit_message_text(chat_id, status_message_id, &text)
                .await
            {
                warn!(user_id, error = %e, "Failed to report job failure");
            }
        }
    }
    info!(worker = n, "Worker stopped");
}

/// Removes the job's files and releases its user, however the job ends
struct JobGuard<'a> {
    queue: &'a JobQueue,
    user_id: UserId,
    job_id: Uuid,
    output: PathBuf,
    input: Option<PathBuf>,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        remove_quietly_blocking(&self.output);
        if let Some(input) = &self.input {
            remove_quietly_blocking(input);
        }
        self.queue.release_job(self.user_id, self.job_id);
    }
}

/// Execute one job and report its outcome on the status message.
///
/// Usage is incremented only after the output was delivered. The output file
/// is always removed and the user leaves the busy-set before the status
/// message is edited.
#[instrument(skip_all, fields(job_id = %job.id, user_id = job.user_id, preset = %job.preset_id))]
pub async fn process_job(ctx: &WorkerContext, job: Job) -> JobOutcome {
    let guard = JobGuard {
        queue: &ctx.queue,
        user_id: job.user_id,
        job_id: job.id,
        output: job.output_path.clone(),
        input: ctx.delete_input.then(|| job.input_path.clone()),
    };

    let started = Instant::now();
    let outcome = execute(ctx, &job).await;
    let elapsed_ms = started.elapsed().as_millis();
    drop(guard);

    match &outcome {
        JobOutcome::Delivered { usage } => info!(usage, elapsed_ms, "Job delivered"),
        other => warn!(outcome = ?other, elapsed_ms, "Job failed"),
    }

    if let Err(e) = ctx
        .transport
        .edit_message_text(job.chat_id, job.status_message_id, &outcome.status_text())
        .await
    {
        warn!(error = %e, "Failed to update status message");
    }
    outcome
}

async fn execute(ctx: &WorkerContext, job: &Job) -> JobOutcome {
    ctx.work.remove_outputs(job.user_id).await;

    let preset = match ctx.catalog.resolve(&job.preset_id).await {
        Ok(path) => path,
        Err(e) if e.is_not_found() => {
            warn!(error = %e, "Preset rejected");
            return JobOutcome::NotFound;
        }
        Err(e) => return JobOutcome::Failed(e.to_string()),
    };

    match ctx
        .tool
        .apply(&job.input_path, &preset, &job.output_path, job.intensity)
        .await
    {
        Ok(()) => {}
        Err(ToolError::Timeout(_)) => return JobOutcome::Timeout,
        Err(ToolError::NonZeroExit { code }) => return JobOutcome::ToolFailed { code },
        Err(e) => return JobOutcome::Failed(e.to_string()),
    }

    let caption = format!("{} recipe @ {}", display_name(&job.preset_id), job.intensity);
    if let Err(e) = ctx
        .transport
        .send_photo(job.chat_id, &job.output_path, &caption)
        .await
    {
        return JobOutcome::Failed(e.to_string());
    }

    match ctx.quota.increment_usage(job.user_id, 1).await {
        Ok(usage) => JobOutcome::Delivered { usage },
        Err(e) => {
            error!(error = %e, "Failed to record usage");
            JobOutcome::Failed(e.to_string())
        }
    }
}
