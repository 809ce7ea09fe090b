use std::{ffi::OsString, path::Path, sync::Arc, time::Duration};

use common::{error::AppError, utils::config::AppConfig};
use tracing::info;

use super::tool::{ProcessTool, Tool, ToolOutcome};
use crate::types::JobMode;

/// Fixed tracing parameters; only the color mode varies per job.
#[derive(Debug, Clone, PartialEq)]
pub struct TracerSettings {
    pub filter_speckle: u32,
    pub color_precision: u32,
    pub layer_difference: u32,
    pub corner_threshold: u32,
    pub length_threshold: f64,
    pub splice_threshold: u32,
    pub path_precision: u32,
    pub timeout: Duration,
}

impl TracerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            filter_speckle: config.vtracer_filter_speckle,
            color_precision: config.vtracer_color_precision,
            layer_difference: config.vtracer_layer_difference,
            corner_threshold: config.vtracer_corner_threshold,
            length_threshold: config.vtracer_length_threshold,
            splice_threshold: config.vtracer_splice_threshold,
            path_precision: config.vtracer_path_precision,
            timeout: config.vtracer_timeout(),
        }
    }
}

fn color_mode(mode: JobMode) -> &'static str {
    match mode {
        JobMode::Monochrome => "binary",
        JobMode::Color => "color",
    }
}

/// Tracing stage. Unlike the enhancer there is nothing to fall back to, so
/// every failure becomes [`AppError::Vectorization`].
pub struct Vectorizer {
    tool: Arc<dyn Tool>,
    settings: TracerSettings,
}

impl Vectorizer {
    pub fn new(tool: Arc<dyn Tool>, settings: TracerSettings) -> Self {
        Self { tool, settings }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(ProcessTool::new("vtracer", &config.vtracer_path)),
            TracerSettings::from_config(config),
        )
    }

    pub fn is_available(&self) -> bool {
        self.tool.is_available()
    }

    fn args(&self, input: &Path, output: &Path, mode: JobMode) -> Vec<OsString> {
        let s = &self.settings;
        vec![
            "--input".into(),
            input.into(),
            "--output".into(),
            output.into(),
            "--colormode".into(),
            color_mode(mode).into(),
            "--mode".into(),
            "spline".into(),
            "--filter_speckle".into(),
            s.filter_speckle.to_string().into(),
            "--color_precision".into(),
            s.color_precision.to_string().into(),
            "--gradient_step".into(),
            s.layer_difference.to_string().into(),
            "--corner_threshold".into(),
            s.corner_threshold.to_string().into(),
            "--segment_length".into(),
            s.length_threshold.to_string().into(),
            "--splice_threshold".into(),
            s.splice_threshold.to_string().into(),
            "--path_precision".into(),
            s.path_precision.to_string().into(),
        ]
    }

    pub async fn vectorize(
        &self,
        input: &Path,
        output: &Path,
        mode: JobMode,
    ) -> Result<(), AppError> {
        info!(
            tool = self.tool.name(),
            input = %input.display(),
            output = %output.display(),
            %mode,
            "running tracer"
        );

        let outcome = self
            .tool
            .run(&self.args(input, output, mode), self.settings.timeout)
            .await;

        match outcome {
            ToolOutcome::Success { .. } => {
                let size = tokio::fs::metadata(output)
                    .await
                    .ok()
                    .filter(|meta| meta.is_file())
                    .map_or(0, |meta| meta.len());
                if size == 0 {
                    return Err(AppError::Vectorization(format!(
                        "{} produced no SVG output",
                        self.tool.name()
                    )));
                }
                info!(tool = self.tool.name(), output_bytes = size, "tracer completed");
                Ok(())
            }
            failed => Err(AppError::Vectorization(format!(
                "{} {}",
                self.tool.name(),
                failed.describe()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn settings() -> TracerSettings {
        TracerSettings {
            timeout: Duration::from_secs(5),
            ..TracerSettings::from_config(&AppConfig::default())
        }
    }

    fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|arg| arg == flag)
            .and_then(|idx| args.get(idx + 1))
            .map(String::as_str)
    }

    struct RecordingTool {
        svg: Option<&'static str>,
        outcome: ToolOutcome,
        seen: Mutex<Vec<OsString>>,
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &str {
            "vtracer"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn run(&self, args: &[OsString], _timeout: Duration) -> ToolOutcome {
            *self.seen.lock().expect("lock") = args.to_vec();
            if let Some(svg) = self.svg {
                let output = args
                    .iter()
                    .skip_while(|arg| arg.as_os_str() != "--output")
                    .nth(1)
                    .expect("output argument");
                tokio::fs::write(output, svg).await.expect("write svg");
            }
            self.outcome.clone()
        }
    }

    fn success() -> ToolOutcome {
        ToolOutcome::Success {
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[tokio::test]
    async fn produces_output_and_passes_mode() {
        let dir = tempdir().expect("tempdir");
        let output = dir.path().join("out.svg");
        let tool = Arc::new(RecordingTool {
            svg: Some("<svg/>"),
            outcome: success(),
            seen: Mutex::new(Vec::new()),
        });
        let vectorizer = Vectorizer::new(tool.clone(), settings());

        vectorizer
            .vectorize(&dir.path().join("in.png"), &output, JobMode::Monochrome)
            .await
            .expect("vectorize");

        let seen: Vec<String> = tool
            .seen
            .lock()
            .expect("lock")
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(arg_value(&seen, "--colormode"), Some("binary"));
        assert!(seen.contains(&"spline".to_string()));
        assert_eq!(tokio::fs::read_to_string(&output).await.expect("svg"), "<svg/>");
    }

    #[test]
    fn default_arguments_are_accepted_by_the_cli() {
        let vectorizer = Vectorizer::from_config(&AppConfig::default());
        let args: Vec<String> = vectorizer
            .args(Path::new("in.png"), Path::new("out.svg"), JobMode::Color)
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let segment_length: f64 = arg_value(&args, "--segment_length")
            .expect("segment length")
            .parse()
            .expect("numeric segment length");
        assert!((3.5..=10.0).contains(&segment_length), "{segment_length}");

        let color_precision: u32 = arg_value(&args, "--color_precision")
            .expect("color precision")
            .parse()
            .expect("numeric color precision");
        assert!((1..=8).contains(&color_precision));
        assert_eq!(arg_value(&args, "--colormode"), Some("color"));
    }

    #[tokio::test]
    async fn tool_failure_is_fatal_with_diagnostic() {
        let dir = tempdir().expect("tempdir");
        let vectorizer = Vectorizer::new(
            Arc::new(RecordingTool {
                svg: None,
                outcome: ToolOutcome::Failure {
                    exit_code: Some(2),
                    diagnostic: "unsupported image".into(),
                },
                seen: Mutex::new(Vec::new()),
            }),
            settings(),
        );

        let err = vectorizer
            .vectorize(&dir.path().join("in.png"), &dir.path().join("out.svg"), JobMode::Color)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Vectorization(ref msg) if msg.contains("unsupported image")));
    }

    #[tokio::test]
    async fn timeout_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let vectorizer = Vectorizer::new(
            Arc::new(RecordingTool {
                svg: None,
                outcome: ToolOutcome::TimedOut {
                    after: Duration::from_secs(5),
                },
                seen: Mutex::new(Vec::new()),
            }),
            settings(),
        );

        let err = vectorizer
            .vectorize(&dir.path().join("in.png"), &dir.path().join("out.svg"), JobMode::Color)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Vectorization(ref msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn missing_output_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let vectorizer = Vectorizer::new(
            Arc::new(RecordingTool {
                svg: None,
                outcome: success(),
                seen: Mutex::new(Vec::new()),
            }),
            settings(),
        );

        let err = vectorizer
            .vectorize(&dir.path().join("in.png"), &dir.path().join("out.svg"), JobMode::Color)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Vectorization(ref msg) if msg.contains("no SVG output")));
    }
}
