use std::path::PathBuf;

use common::utils::config::{render_job_template, AppConfig, BusyPolicy};

/// The slice of [`AppConfig`] the orchestrator itself needs.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub work_dir: PathBuf,
    pub result_naming: String,
    pub max_concurrent_jobs: usize,
    pub busy_policy: BusyPolicy,
}

impl JobSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            result_naming: config.result_naming.clone(),
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            busy_policy: config.busy_policy,
        }
    }

    pub fn output_file_name(&self, job_id: &str) -> String {
        render_job_template(&self.result_naming, job_id)
    }

    pub fn enhanced_file_name(job_id: &str) -> String {
        format!("upscaled_{job_id}.png")
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
