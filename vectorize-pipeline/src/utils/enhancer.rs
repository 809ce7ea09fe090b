use std::{ffi::OsString, path::Path, sync::Arc, time::Duration};

use common::{error::AppError, utils::config::AppConfig};
use tracing::{info, warn};

use super::tool::{ProcessTool, Tool, ToolOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancerSettings {
    pub scale: u32,
    pub noise: i32,
    pub model: String,
    pub timeout: Duration,
}

impl EnhancerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            scale: config.waifu2x_scale,
            noise: config.waifu2x_noise,
            model: config.waifu2x_model.clone(),
            timeout: config.waifu2x_timeout(),
        }
    }
}

/// What `enhance` actually did. Either way the output file exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnhanceOutcome {
    Enhanced,
    FallbackCopied { reason: String },
}

impl EnhanceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EnhanceOutcome::Enhanced => "enhanced",
            EnhanceOutcome::FallbackCopied { .. } => "fallback_copied",
        }
    }
}

/// Upscaling stage. Never fails the job because of the upscaler: a missing
/// binary, a crash, a timeout or a missing result all fall back to copying
/// the input unchanged.
pub struct Enhancer {
    tool: Arc<dyn Tool>,
    settings: EnhancerSettings,
}

impl Enhancer {
    pub fn new(tool: Arc<dyn Tool>, settings: EnhancerSettings) -> Self {
        Self { tool, settings }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(ProcessTool::new("waifu2x", &config.waifu2x_path)),
            EnhancerSettings::from_config(config),
        )
    }

    pub fn is_available(&self) -> bool {
        self.tool.is_available()
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-i".into(),
            input.into(),
            "-o".into(),
            output.into(),
            "-n".into(),
            self.settings.noise.to_string().into(),
            "-s".into(),
            self.settings.scale.to_string().into(),
            "-m".into(),
            self.settings.model.clone().into(),
        ]
    }

    /// Only an I/O failure of the fallback copy itself is returned as an error.
    pub async fn enhance(&self, input: &Path, output: &Path) -> Result<EnhanceOutcome, AppError> {
        let reason = if self.tool.is_available() {
            let outcome = self
                .tool
                .run(&self.args(input, output), self.settings.timeout)
                .await;

            match outcome {
                ToolOutcome::Success { .. } if has_content(output).await => {
                    info!(
                        tool = self.tool.name(),
                        enhancement_outcome = "enhanced",
                        output = %output.display(),
                        "upscaling completed"
                    );
                    return Ok(EnhanceOutcome::Enhanced);
                }
                ToolOutcome::Success { .. } => {
                    format!("{} reported success but produced no output", self.tool.name())
                }
                failed => format!("{} {}", self.tool.name(), failed.describe()),
            }
        } else {
            format!("{} not found", self.tool.name())
        };

        warn!(
            tool = self.tool.name(),
            enhancement_outcome = "fallback_copied",
            %reason,
            "upscaling skipped; using original image"
        );

        tokio::fs::copy(input, output).await.map_err(|err| {
            AppError::Workspace(format!(
                "fallback copy {} -> {} failed: {err}",
                input.display(),
                output.display()
            ))
        })?;

        Ok(EnhanceOutcome::FallbackCopied { reason })
    }
}

async fn has_content(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::tempdir;

    fn settings(timeout: Duration) -> EnhancerSettings {
        EnhancerSettings {
            scale: 2,
            noise: 1,
            model: "models-cunet".into(),
            timeout,
        }
    }

    /// Scripted stand-in: optionally writes the output, then returns a fixed outcome.
    struct ScriptedTool {
        available: bool,
        writes: Option<&'static [u8]>,
        outcome: ToolOutcome,
    }

    #[async_trait]
    impl Tool for ScriptedTool {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn run(&self, args: &[OsString], _timeout: Duration) -> ToolOutcome {
            if let Some(bytes) = self.writes {
                let output = args
                    .iter()
                    .skip_while(|arg| arg.as_os_str() != "-o")
                    .nth(1)
                    .expect("output argument");
                tokio::fs::write(output, bytes).await.expect("write output");
            }
            self.outcome.clone()
        }
    }

    async fn run_enhancer(tool: ScriptedTool) -> (EnhanceOutcome, Vec<u8>, Vec<u8>) {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("input.png");
        let output = dir.path().join("upscaled.png");
        tokio::fs::write(&input, b"original-bytes").await.expect("write input");

        let enhancer = Enhancer::new(Arc::new(tool), settings(Duration::from_secs(5)));
        let outcome = enhancer.enhance(&input, &output).await.expect("never fatal");

        let input_bytes = tokio::fs::read(&input).await.expect("read input");
        let output_bytes = tokio::fs::read(&output).await.expect("read output");
        (outcome, input_bytes, output_bytes)
    }

    #[tokio::test]
    async fn keeps_tool_output_on_success() {
        let (outcome, _, output) = run_enhancer(ScriptedTool {
            available: true,
            writes: Some(b"upscaled-bytes"),
            outcome: ToolOutcome::Success {
                stdout: String::new(),
                stderr: String::new(),
            },
        })
        .await;

        assert_eq!(outcome, EnhanceOutcome::Enhanced);
        assert_eq!(output, b"upscaled-bytes");
    }

    #[tokio::test]
    async fn copies_input_when_tool_missing() {
        let (outcome, input, output) = run_enhancer(ScriptedTool {
            available: false,
            writes: None,
            outcome: ToolOutcome::Success {
                stdout: String::new(),
                stderr: String::new(),
            },
        })
        .await;

        assert!(matches!(outcome, EnhanceOutcome::FallbackCopied { ref reason } if reason.contains("not found")));
        assert_eq!(input, output);
    }

    #[tokio::test]
    async fn copies_input_when_tool_fails() {
        let (outcome, input, output) = run_enhancer(ScriptedTool {
            available: true,
            writes: Some(b"partial"),
            outcome: ToolOutcome::Failure {
                exit_code: Some(1),
                diagnostic: "vkCreateInstance failed".into(),
            },
        })
        .await;

        assert_eq!(outcome.label(), "fallback_copied");
        assert_eq!(input, output);
    }

    #[tokio::test]
    async fn copies_input_when_tool_times_out() {
        let (outcome, input, output) = run_enhancer(ScriptedTool {
            available: true,
            writes: None,
            outcome: ToolOutcome::TimedOut {
                after: Duration::from_secs(5),
            },
        })
        .await;

        assert!(matches!(outcome, EnhanceOutcome::FallbackCopied { ref reason } if reason.contains("timed out")));
        assert_eq!(input, output);
    }

    #[tokio::test]
    async fn copies_input_when_success_leaves_no_output() {
        let (outcome, input, output) = run_enhancer(ScriptedTool {
            available: true,
            writes: None,
            outcome: ToolOutcome::Success {
                stdout: String::new(),
                stderr: String::new(),
            },
        })
        .await;

        assert_eq!(outcome.label(), "fallback_copied");
        assert_eq!(input, output);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn real_process_timeout_falls_back_without_hanging() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("input.png");
        let output = dir.path().join("upscaled.png");
        tokio::fs::write(&input, b"original-bytes").await.expect("write input");

        let tool = ProcessTool::new("waifu2x", "/bin/sh").with_base_args(["-c", "exec sleep 30", "waifu2x"]);
        let enhancer = Enhancer::new(Arc::new(tool), settings(Duration::from_millis(200)));

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(10), enhancer.enhance(&input, &output))
            .await
            .expect("enhance must not hang")
            .expect("never fatal");

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(outcome.label(), "fallback_copied");
        assert_eq!(
            tokio::fs::read(&output).await.expect("read output"),
            b"original-bytes"
        );
    }

    #[test]
    fn builds_waifu2x_arguments() {
        let enhancer = Enhancer::new(
            Arc::new(ProcessTool::new("waifu2x", "waifu2x")),
            settings(Duration::from_secs(1)),
        );
        let args = enhancer.args(Path::new("in.png"), Path::new("out.png"));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(
            args,
            ["-i", "in.png", "-o", "out.png", "-n", "1", "-s", "2", "-m", "models-cunet"]
        );
    }
}
