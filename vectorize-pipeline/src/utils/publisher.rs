use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use common::{
    error::AppError,
    utils::config::{render_job_template, AppConfig, UploadMode},
};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::types::JobOutput;

const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// Where finished results go. Chosen at deployment time, never per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// Copy into a directory that outlives job workspaces.
    LocalPath { results_dir: PathBuf },
    /// HTTP PUT to a pre-signed URL; `{uuid}` is replaced with the job id.
    SignedPut { url_template: String },
}

pub struct Publisher {
    target: PublishTarget,
    client: reqwest::Client,
}

impl Publisher {
    /// `timeout` bounds a whole upload, so a stalled destination fails the job
    /// instead of holding its slot forever.
    pub fn new(target: PublishTarget, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { target, client })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let target = match config.result_upload_mode {
            UploadMode::LocalPath => PublishTarget::LocalPath {
                results_dir: std::path::absolute(&config.results_dir)?,
            },
            UploadMode::SignedPut => PublishTarget::SignedPut {
                url_template: config.result_upload_signed_put_url.trim().to_string(),
            },
        };
        Self::new(target, config.upload_timeout())
    }

    pub fn target(&self) -> &PublishTarget {
        &self.target
    }

    /// Hand `output` over to the configured target. `file_name` is the final
    /// rendered result name.
    ///
    /// Must finish before the job workspace holding `output` is destroyed.
    pub async fn publish(
        &self,
        job_id: &str,
        output: &Path,
        file_name: &str,
    ) -> Result<JobOutput, AppError> {
        match &self.target {
            PublishTarget::LocalPath { results_dir } => {
                let destination = results_dir.join(file_name);
                tokio::fs::create_dir_all(results_dir).await.map_err(|err| {
                    AppError::Upload(format!(
                        "failed to prepare results directory {}: {err}",
                        results_dir.display()
                    ))
                })?;
                let bytes = tokio::fs::copy(output, &destination).await.map_err(|err| {
                    AppError::Upload(format!(
                        "failed to copy result to {}: {err}",
                        destination.display()
                    ))
                })?;

                info!(%job_id, destination = %destination.display(), bytes, "result stored locally");
                Ok(JobOutput::LocalPath {
                    local_path: destination.display().to_string(),
                })
            }
            PublishTarget::SignedPut { url_template } => {
                let url = render_job_template(url_template, job_id);
                let bytes = self.upload(&url, output).await?;

                info!(%job_id, bytes, "result uploaded");
                Ok(JobOutput::Uploaded { uploaded_url: url })
            }
        }
    }

    async fn upload(&self, url: &str, output: &Path) -> Result<u64, AppError> {
        let file = tokio::fs::File::open(output).await.map_err(|err| {
            AppError::Upload(format!("failed to open result {}: {err}", output.display()))
        })?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, SVG_CONTENT_TYPE)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await
            .map_err(|err| AppError::Upload(format!("upload request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.trim();
            return Err(AppError::Upload(if detail.is_empty() {
                format!("upload rejected with HTTP {status}")
            } else {
                format!("upload rejected with HTTP {status}: {detail}")
            }));
        }

        Ok(length)
    }
}
