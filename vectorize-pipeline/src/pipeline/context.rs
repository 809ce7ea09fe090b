use std::path::PathBuf;

use common::{error::AppError, storage::workspace::JobWorkspace};
use tracing::error;

use super::{config::JobSettings, services::PipelineServices};
use crate::{
    types::{Job, JobOutput, JobStatus},
    utils::{enhancer::EnhanceOutcome, fetcher::SourceImage},
};

/// Files produced so far, in stage order. Everything except the published
/// output dies with the workspace.
#[derive(Debug, Default, Clone)]
pub struct StageArtifacts {
    pub source: Option<SourceImage>,
    pub enhanced: Option<PathBuf>,
    pub enhancement: Option<EnhanceOutcome>,
    pub output: Option<PathBuf>,
    pub published: Option<JobOutput>,
}

pub struct PipelineContext<'a> {
    pub job: &'a mut Job,
    pub workspace: &'a JobWorkspace,
    pub settings: &'a JobSettings,
    pub services: &'a dyn PipelineServices,
    pub artifacts: StageArtifacts,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        job: &'a mut Job,
        workspace: &'a JobWorkspace,
        settings: &'a JobSettings,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            job,
            workspace,
            settings,
            services,
            artifacts: StageArtifacts::default(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.job.status = status;
    }

    pub fn source_path(&self) -> Result<PathBuf, AppError> {
        self.artifacts
            .source
            .as_ref()
            .map(|source| source.path.clone())
            .ok_or_else(|| AppError::InternalError("source image expected to be available".into()))
    }

    pub fn enhanced_path(&self) -> Result<PathBuf, AppError> {
        self.artifacts.enhanced.clone().ok_or_else(|| {
            AppError::InternalError("enhanced image expected to be available".into())
        })
    }

    pub fn output_path(&self) -> Result<PathBuf, AppError> {
        self.artifacts
            .output
            .clone()
            .ok_or_else(|| AppError::InternalError("vector output expected to be available".into()))
    }

    pub fn take_published(&mut self) -> Result<JobOutput, AppError> {
        self.artifacts.published.take().ok_or_else(|| {
            AppError::InternalError("published output expected to be available".into())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        let stage = self.job.status;
        self.set_status(JobStatus::Failed);
        error!(
            job_id = %self.job.id,
            ?stage,
            error = %err,
            "vectorization pipeline aborted"
        );
        err
    }
}
