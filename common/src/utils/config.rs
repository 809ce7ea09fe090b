use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Placeholder secret shipped in sample environment files; never accepted at startup.
pub const PLACEHOLDER_SHARED_TOKEN: &str = "change-me-to-strong-secret-key";

/// Token substituted with the job id in naming and destination templates.
pub const JOB_ID_PLACEHOLDER: &str = "{uuid}";

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    LocalPath,
    SignedPut,
}

/// What a request does when every job slot is taken.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    Queue,
    Reject,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_runner_host")]
    pub runner_host: String,
    #[serde(default = "default_runner_port")]
    pub runner_port: u16,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    pub runner_shared_token: String,

    #[serde(default = "default_idle_exit_secs")]
    pub idle_exit_secs: i64,
    #[serde(default = "default_idle_check_interval_secs")]
    pub idle_check_interval_secs: u64,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_busy_policy")]
    pub busy_policy: BusyPolicy,
    #[serde(default = "default_request_max_body_bytes")]
    pub request_max_body_bytes: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: u64,
    #[serde(default)]
    pub allow_private_sources: bool,

    #[serde(default = "default_waifu2x_path")]
    pub waifu2x_path: PathBuf,
    #[serde(default = "default_waifu2x_scale")]
    pub waifu2x_scale: u32,
    #[serde(default = "default_waifu2x_noise")]
    pub waifu2x_noise: i32,
    #[serde(default = "default_waifu2x_model")]
    pub waifu2x_model: String,
    #[serde(default = "default_waifu2x_timeout_secs")]
    pub waifu2x_timeout_secs: u64,

    #[serde(default = "default_vtracer_path")]
    pub vtracer_path: PathBuf,
    #[serde(default = "default_vtracer_timeout_secs")]
    pub vtracer_timeout_secs: u64,
    #[serde(default = "default_vtracer_filter_speckle")]
    pub vtracer_filter_speckle: u32,
    #[serde(default = "default_vtracer_color_precision")]
    pub vtracer_color_precision: u32,
    #[serde(default = "default_vtracer_layer_difference")]
    pub vtracer_layer_difference: u32,
    #[serde(default = "default_vtracer_corner_threshold")]
    pub vtracer_corner_threshold: u32,
    #[serde(default = "default_vtracer_length_threshold")]
    pub vtracer_length_threshold: f64,
    #[serde(default = "default_vtracer_splice_threshold")]
    pub vtracer_splice_threshold: u32,
    #[serde(default = "default_vtracer_path_precision")]
    pub vtracer_path_precision: u32,

    #[serde(default = "default_upload_mode")]
    pub result_upload_mode: UploadMode,
    #[serde(default)]
    pub result_upload_signed_put_url: String,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_result_naming")]
    pub result_naming: String,
}

fn default_runner_host() -> String {
    "127.0.0.1".to_string()
}

fn default_runner_port() -> u16 {
    8787
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./runner-data/tmp")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("./runner-data/results")
}

fn default_idle_exit_secs() -> i64 {
    8 * 60
}

fn default_idle_check_interval_secs() -> u64 {
    30
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_busy_policy() -> BusyPolicy {
    BusyPolicy::Queue
}

fn default_request_max_body_bytes() -> usize {
    16 * 1024
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fetch_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_waifu2x_path() -> PathBuf {
    PathBuf::from("./waifu2x-ncnn-vulkan/waifu2x-ncnn-vulkan")
}

fn default_waifu2x_scale() -> u32 {
    4
}

fn default_waifu2x_noise() -> i32 {
    3
}

fn default_waifu2x_model() -> String {
    "models-upconv_7_anime_style_art_rgb".to_string()
}

fn default_waifu2x_timeout_secs() -> u64 {
    600
}

fn default_vtracer_path() -> PathBuf {
    PathBuf::from("vtracer")
}

fn default_vtracer_timeout_secs() -> u64 {
    300
}

fn default_vtracer_filter_speckle() -> u32 {
    12
}

fn default_vtracer_color_precision() -> u32 {
    8
}

fn default_vtracer_layer_difference() -> u32 {
    16
}

fn default_vtracer_corner_threshold() -> u32 {
    55
}

fn default_vtracer_length_threshold() -> f64 {
    4.0
}

fn default_vtracer_splice_threshold() -> u32 {
    55
}

fn default_vtracer_path_precision() -> u32 {
    3
}

fn default_upload_mode() -> UploadMode {
    UploadMode::LocalPath
}

fn default_upload_timeout_secs() -> u64 {
    120
}

fn default_result_naming() -> String {
    format!("{JOB_ID_PLACEHOLDER}.svg")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runner_host: default_runner_host(),
            runner_port: default_runner_port(),
            work_dir: default_work_dir(),
            results_dir: default_results_dir(),
            runner_shared_token: String::new(),
            idle_exit_secs: default_idle_exit_secs(),
            idle_check_interval_secs: default_idle_check_interval_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            busy_policy: default_busy_policy(),
            request_max_body_bytes: default_request_max_body_bytes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_max_bytes: default_fetch_max_bytes(),
            allow_private_sources: false,
            waifu2x_path: default_waifu2x_path(),
            waifu2x_scale: default_waifu2x_scale(),
            waifu2x_noise: default_waifu2x_noise(),
            waifu2x_model: default_waifu2x_model(),
            waifu2x_timeout_secs: default_waifu2x_timeout_secs(),
            vtracer_path: default_vtracer_path(),
            vtracer_timeout_secs: default_vtracer_timeout_secs(),
            vtracer_filter_speckle: default_vtracer_filter_speckle(),
            vtracer_color_precision: default_vtracer_color_precision(),
            vtracer_layer_difference: default_vtracer_layer_difference(),
            vtracer_corner_threshold: default_vtracer_corner_threshold(),
            vtracer_length_threshold: default_vtracer_length_threshold(),
            vtracer_splice_threshold: default_vtracer_splice_threshold(),
            vtracer_path_precision: default_vtracer_path_precision(),
            result_upload_mode: default_upload_mode(),
            result_upload_signed_put_url: String::new(),
            upload_timeout_secs: default_upload_timeout_secs(),
            result_naming: default_result_naming(),
        }
    }
}

impl AppConfig {
    /// Rejects settings that would otherwise only blow up on the first job.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let token = self.runner_shared_token.trim();
        if token.is_empty() {
            return Err(invalid("runner_shared_token must not be empty"));
        }
        if token == PLACEHOLDER_SHARED_TOKEN {
            return Err(invalid(
                "runner_shared_token still holds the placeholder value; set a real secret",
            ));
        }

        if self.max_concurrent_jobs == 0 {
            return Err(invalid("max_concurrent_jobs must be at least 1"));
        }
        if self.idle_check_interval_secs == 0 {
            return Err(invalid("idle_check_interval_secs must be greater than 0"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(invalid("fetch_timeout_secs must be greater than 0"));
        }
        if self.fetch_max_bytes == 0 {
            return Err(invalid("fetch_max_bytes must be greater than 0"));
        }
        if self.request_max_body_bytes == 0 {
            return Err(invalid("request_max_body_bytes must be greater than 0"));
        }
        if self.waifu2x_timeout_secs == 0 || self.vtracer_timeout_secs == 0 {
            return Err(invalid("external tool timeouts must be greater than 0"));
        }
        if self.upload_timeout_secs == 0 {
            return Err(invalid("upload_timeout_secs must be greater than 0"));
        }

        self.validate_tracer_settings()?;
        self.validate_result_naming()?;

        if self.result_upload_mode == UploadMode::SignedPut {
            let url = self.result_upload_signed_put_url.trim();
            if url.is_empty() {
                return Err(invalid(
                    "result_upload_signed_put_url is required when result_upload_mode is signed_put",
                ));
            }
            let rendered = render_job_template(url, "probe");
            let parsed = reqwest::Url::parse(&rendered).map_err(|err| {
                invalid(&format!("result_upload_signed_put_url is not a valid URL: {err}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(
                    "result_upload_signed_put_url must use http or https",
                ));
            }
        }

        Ok(())
    }

    /// Ranges accepted by the vtracer CLI; anything outside aborts the tool.
    fn validate_tracer_settings(&self) -> Result<(), ConfigError> {
        let in_range = |value: u32, min: u32, max: u32, key: &str| {
            if (min..=max).contains(&value) {
                Ok(())
            } else {
                Err(invalid(&format!("{key} must be between {min} and {max}")))
            }
        };
        in_range(self.vtracer_filter_speckle, 0, 16, "vtracer_filter_speckle")?;
        in_range(self.vtracer_color_precision, 1, 8, "vtracer_color_precision")?;
        in_range(self.vtracer_layer_difference, 0, 255, "vtracer_layer_difference")?;
        in_range(self.vtracer_corner_threshold, 0, 180, "vtracer_corner_threshold")?;
        in_range(self.vtracer_splice_threshold, 0, 180, "vtracer_splice_threshold")?;

        if !(3.5..=10.0).contains(&self.vtracer_length_threshold) {
            return Err(invalid("vtracer_length_threshold must be between 3.5 and 10"));
        }
        Ok(())
    }

    fn validate_result_naming(&self) -> Result<(), ConfigError> {
        if !self.result_naming.contains(JOB_ID_PLACEHOLDER) {
            return Err(invalid("result_naming must contain the {uuid} placeholder"));
        }
        let rendered = render_job_template(&self.result_naming, "probe");
        if rendered.contains(['/', '\\']) || rendered.starts_with('.') {
            return Err(invalid(
                "result_naming must render to a plain file name without path separators",
            ));
        }
        Ok(())
    }

    /// `None` when the idle guard is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        u64::try_from(self.idle_exit_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn waifu2x_timeout(&self) -> Duration {
        Duration::from_secs(self.waifu2x_timeout_secs)
    }

    pub fn vtracer_timeout(&self) -> Duration {
        Duration::from_secs(self.vtracer_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.runner_host, self.runner_port)
    }
}

/// Substitute the job id into a naming or destination template.
pub fn render_job_template(template: &str, job_id: &str) -> String {
    template.replace(JOB_ID_PLACEHOLDER, job_id)
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Message(message.to_string())
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    Ok(app_config)
}
