mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::JobSettings;
pub use context::StageArtifacts;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::workspace::JobWorkspace,
    utils::config::{AppConfig, BusyPolicy},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{enhance, fetch_source, finish, publish, vectorize},
    state::accepted,
};
use crate::types::{Job, JobFailure, JobOutput, JobReport, JobRequest, JobStatus};

/// Runs jobs through fetch, enhance, vectorize and publish, each inside its own
/// workspace, with at most `max_concurrent_jobs` in flight.
#[allow(clippy::module_name_repetitions)]
pub struct VectorizePipeline {
    settings: JobSettings,
    services: Arc<dyn PipelineServices>,
    job_slots: Arc<Semaphore>,
}

impl VectorizePipeline {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let services = DefaultPipelineServices::from_config(config)?;
        Ok(Self::with_services(
            JobSettings::from_config(config),
            Arc::new(services),
        ))
    }

    pub fn with_services(settings: JobSettings, services: Arc<dyn PipelineServices>) -> Self {
        let job_slots = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            settings,
            services,
            job_slots,
        }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn services(&self) -> &dyn PipelineServices {
        self.services.as_ref()
    }

    pub fn available_slots(&self) -> usize {
        self.job_slots.available_permits()
    }

    /// Run a job on its own task so that dropping the caller (for example a
    /// disconnected HTTP client) does not cancel it halfway.
    pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<JobReport, JobFailure> {
        let job = Job::accept(request);
        let job_id = job.id.clone();
        let accepted_at = job.accepted_at;

        let pipeline = Arc::clone(self);
        match tokio::spawn(async move { pipeline.run_job(job).await }).await {
            Ok(result) => result,
            Err(join_err) => Err(JobFailure {
                job_id,
                duration_ms: duration_millis(accepted_at.elapsed()),
                error: AppError::from(join_err),
            }),
        }
    }

    #[tracing::instrument(skip_all, fields(job_id = %job.id, mode = %job.mode))]
    pub async fn run_job(&self, mut job: Job) -> Result<JobReport, JobFailure> {
        info!(source = %job.source.url, "job accepted");

        let _permit = match self.admit().await {
            Ok(permit) => permit,
            Err(err) => {
                job.status = JobStatus::Failed;
                warn!(error = %err, "job not admitted");
                return Err(JobFailure::new(&job, err));
            }
        };

        let mut workspace = match JobWorkspace::create(&self.settings.work_dir, &job.id).await {
            Ok(workspace) => workspace,
            Err(err) => {
                job.status = JobStatus::Failed;
                warn!(error = %err, "workspace allocation failed");
                return Err(JobFailure::new(&job, err));
            }
        };

        let result = self.drive_pipeline(&mut job, &workspace).await;
        workspace.destroy().await;

        match result {
            Ok(output) => {
                let report = JobReport {
                    job_id: job.id.clone(),
                    status: job.status,
                    output,
                    duration_ms: job.duration_ms(),
                };
                info!(duration_ms = report.duration_ms, "job done");
                Ok(report)
            }
            Err(err) => {
                let failure = JobFailure::new(&job, err);
                warn!(
                    duration_ms = failure.duration_ms,
                    client_error = failure.error.is_client_error(),
                    error = %failure.error,
                    "job failed"
                );
                Err(failure)
            }
        }
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, AppError> {
        let slots = Arc::clone(&self.job_slots);
        match self.settings.busy_policy {
            BusyPolicy::Queue => {
                if slots.available_permits() == 0 {
                    debug!("all job slots busy; queueing");
                }
                slots
                    .acquire_owned()
                    .await
                    .map_err(|_| AppError::InternalError("job slots closed".to_string()))
            }
            BusyPolicy::Reject => slots.try_acquire_owned().map_err(|err| match err {
                TryAcquireError::NoPermits => AppError::Busy(format!(
                    "all {} job slots are in use; retry later",
                    self.settings.max_concurrent_jobs
                )),
                TryAcquireError::Closed => {
                    AppError::InternalError("job slots closed".to_string())
                }
            }),
        }
    }

    async fn drive_pipeline(
        &self,
        job: &mut Job,
        workspace: &JobWorkspace,
    ) -> Result<JobOutput, AppError> {
        let mut ctx = PipelineContext::new(job, workspace, &self.settings, self.services.as_ref());

        let machine = accepted();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = fetch_source(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let fetch_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = enhance(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let enhance_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = vectorize(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let vectorize_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = publish(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let publish_duration = stage_start.elapsed();

        let _machine = finish(machine, &mut ctx).map_err(|err| ctx.abort(err))?;

        info!(
            job_id = %ctx.job_id(),
            total_ms = duration_millis(pipeline_started.elapsed()),
            fetch_ms = duration_millis(fetch_duration),
            enhance_ms = duration_millis(enhance_duration),
            vectorize_ms = duration_millis(vectorize_duration),
            publish_ms = duration_millis(publish_duration),
            enhancement_outcome = ctx
                .artifacts
                .enhancement
                .as_ref()
                .map_or("unknown", |outcome| outcome.label()),
            "vectorization pipeline finished"
        );

        ctx.take_published().map_err(|err| ctx.abort(err))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
