use std::path::Path;

use async_trait::async_trait;
use common::{error::AppError, utils::config::AppConfig};
use url::Url;

use crate::{
    types::{JobMode, JobOutput},
    utils::{
        enhancer::{EnhanceOutcome, Enhancer},
        fetcher::{Fetcher, SourceImage},
        publisher::Publisher,
        vectorizer::Vectorizer,
    },
};

/// The stage operations the orchestrator sequences. Swapped for mocks in tests.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch_source(&self, url: &Url, dest: &Path) -> Result<SourceImage, AppError>;

    /// Never fails because of the upscaler itself; see [`Enhancer::enhance`].
    async fn enhance(&self, input: &Path, output: &Path) -> Result<EnhanceOutcome, AppError>;

    async fn vectorize(&self, input: &Path, output: &Path, mode: JobMode)
        -> Result<(), AppError>;

    async fn publish(
        &self,
        job_id: &str,
        output: &Path,
        file_name: &str,
    ) -> Result<JobOutput, AppError>;

    fn upscaler_available(&self) -> bool;

    fn tracer_available(&self) -> bool;
}

pub struct DefaultPipelineServices {
    fetcher: Fetcher,
    enhancer: Enhancer,
    vectorizer: Vectorizer,
    publisher: Publisher,
}

impl DefaultPipelineServices {
    pub fn new(
        fetcher: Fetcher,
        enhancer: Enhancer,
        vectorizer: Vectorizer,
        publisher: Publisher,
    ) -> Self {
        Self {
            fetcher,
            enhancer,
            vectorizer,
            publisher,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Ok(Self::new(
            Fetcher::from_config(config)?,
            Enhancer::from_config(config),
            Vectorizer::from_config(config),
            Publisher::from_config(config)?,
        ))
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_source(&self, url: &Url, dest: &Path) -> Result<SourceImage, AppError> {
        self.fetcher.fetch(url, dest).await
    }

    async fn enhance(&self, input: &Path, output: &Path) -> Result<EnhanceOutcome, AppError> {
        self.enhancer.enhance(input, output).await
    }

    async fn vectorize(
        &self,
        input: &Path,
        output: &Path,
        mode: JobMode,
    ) -> Result<(), AppError> {
        self.vectorizer.vectorize(input, output, mode).await
    }

    async fn publish(
        &self,
        job_id: &str,
        output: &Path,
        file_name: &str,
    ) -> Result<JobOutput, AppError> {
        self.publisher.publish(job_id, output, file_name).await
    }

    fn upscaler_available(&self) -> bool {
        self.enhancer.is_available()
    }

    fn tracer_available(&self) -> bool {
        self.vectorizer.is_available()
    }
}
