use std::{fmt, path::Path, str::FromStr, time::Duration};

use common::{error::AppError, storage::workspace::is_plain_name};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

/// Tracing mode requested by the caller. Wire values are `bw` and `color`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobMode {
    #[serde(rename = "bw")]
    Monochrome,
    #[serde(rename = "color")]
    Color,
}

impl JobMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JobMode::Monochrome => "bw",
            JobMode::Color => "color",
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobMode {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bw" => Ok(JobMode::Monochrome),
            "color" => Ok(JobMode::Color),
            _ => Err(AppError::Validation(
                "Invalid mode. Must be 'bw' or 'color'".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Accepted,
    Fetching,
    Enhancing,
    Vectorizing,
    Publishing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Where the source image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub url: Url,
    pub filename: Option<String>,
}

impl SourceRef {
    /// Name of the downloaded file inside the workspace.
    ///
    /// A requested filename is reduced to its last path component; anything that
    /// is not a plain file name falls back to `input_<job_id>.png`.
    pub fn input_file_name(&self, job_id: &str) -> String {
        self.filename
            .as_deref()
            .map(str::trim)
            .and_then(|name| Path::new(name).file_name())
            .and_then(|name| name.to_str())
            .filter(|name| is_plain_name(name) && !name.starts_with('.'))
            .map_or_else(|| format!("input_{job_id}.png"), str::to_string)
    }
}

/// A validated `/run` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub mode: JobMode,
    pub source: SourceRef,
}

impl JobRequest {
    pub fn parse(
        input_url: Option<&str>,
        mode: Option<&str>,
        filename: Option<String>,
    ) -> Result<Self, AppError> {
        let input_url = input_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AppError::Validation("input_url is required".to_string()))?;
        let url = Url::parse(input_url)
            .map_err(|err| AppError::Validation(format!("input_url is not a valid URL: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation(
                "input_url must use http or https".to_string(),
            ));
        }

        let mode = mode
            .ok_or_else(|| AppError::Validation("mode is required".to_string()))?
            .parse()?;

        Ok(Self {
            mode,
            source: SourceRef { url, filename },
        })
    }
}

/// One vectorization job, from acceptance to its terminal state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub mode: JobMode,
    pub source: SourceRef,
    pub status: JobStatus,
    pub accepted_at: Instant,
}

impl Job {
    pub fn accept(request: JobRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mode: request.mode,
            source: request.source,
            status: JobStatus::Accepted,
            accepted_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Where the published result can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    LocalPath { local_path: String },
    Uploaded { uploaded_url: String },
}

/// Successful job result as returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    pub output: JobOutput,
    pub duration_ms: u64,
}

#[derive(Error, Debug)]
#[error("job {job_id} failed after {duration_ms}ms: {error}")]
pub struct JobFailure {
    pub job_id: String,
    pub duration_ms: u64,
    #[source]
    pub error: AppError,
}

impl JobFailure {
    pub fn new(job: &Job, error: AppError) -> Self {
        Self {
            job_id: job.id.clone(),
            duration_ms: job.duration_ms(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_request() {
        let request = JobRequest::parse(
            Some("https://example.com/cat.png"),
            Some("color"),
            Some("cat.png".into()),
        )
        .expect("valid request");

        assert_eq!(request.mode, JobMode::Color);
        assert_eq!(request.source.url.as_str(), "https://example.com/cat.png");
    }

    #[test]
    fn rejects_unknown_mode() {
        let result = JobRequest::parse(Some("https://example.com/a.png"), Some("grayscale"), None);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn rejects_missing_or_malformed_url() {
        for url in [None, Some(""), Some("not a url"), Some("ftp://example.com/a.png")] {
            let result = JobRequest::parse(url, Some("bw"), None);
            assert!(matches!(result, Err(AppError::Validation(_))), "{url:?}");
        }
    }

    #[test]
    fn input_file_name_is_sanitized() {
        let source = |filename: Option<&str>| SourceRef {
            url: Url::parse("https://example.com/a.png").expect("url"),
            filename: filename.map(str::to_string),
        };

        assert_eq!(source(Some("logo.png")).input_file_name("j1"), "logo.png");
        assert_eq!(source(Some("../../etc/passwd")).input_file_name("j1"), "passwd");
        assert_eq!(source(Some("..")).input_file_name("j1"), "input_j1.png");
        assert_eq!(source(Some(".hidden")).input_file_name("j1"), "input_j1.png");
        assert_eq!(source(None).input_file_name("j1"), "input_j1.png");
    }

    #[test]
    fn output_serializes_to_wire_shape() {
        let report = JobReport {
            job_id: "abc".into(),
            status: JobStatus::Done,
            output: JobOutput::LocalPath {
                local_path: "/tmp/abc.svg".into(),
            },
            duration_ms: 12,
        };

        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["status"], "done");
        assert_eq!(value["output"]["local_path"], "/tmp/abc.svg");
        assert_eq!(value["duration_ms"], 12);

        let uploaded = serde_json::to_value(JobOutput::Uploaded {
            uploaded_url: "https://bucket/abc.svg".into(),
        })
        .expect("serialize");
        assert_eq!(uploaded["uploaded_url"], "https://bucket/abc.svg");
    }
}
