use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Longest diagnostic tail kept from a failing tool's output.
const DIAGNOSTIC_CHAR_LIMIT: usize = 2_000;

/// How long output pipes may stay open after the tool itself exited. A
/// backgrounded grandchild can hold them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success { stdout: String, stderr: String },
    Failure { exit_code: Option<i32>, diagnostic: String },
    TimedOut { after: Duration },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    /// Human-readable summary for logs and error messages.
    pub fn describe(&self) -> String {
        match self {
            ToolOutcome::Success { .. } => "completed successfully".to_string(),
            ToolOutcome::Failure {
                exit_code: Some(code),
                diagnostic,
            } => format!("exited with status {code}: {diagnostic}"),
            ToolOutcome::Failure {
                exit_code: None,
                diagnostic,
            } => diagnostic.clone(),
            ToolOutcome::TimedOut { after } => {
                format!("timed out after {}s and was killed", after.as_secs_f64())
            }
        }
    }
}

/// An external executable the pipeline can invoke with a wall-clock limit.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the executable can be found right now.
    fn is_available(&self) -> bool;

    async fn run(&self, args: &[OsString], timeout: Duration) -> ToolOutcome;
}

/// [`Tool`] backed by a child process.
///
/// On timeout the child is killed and reaped before `run` returns, so no
/// process outlives the call.
#[derive(Debug, Clone)]
pub struct ProcessTool {
    name: String,
    program: PathBuf,
    base_args: Vec<OsString>,
}

impl ProcessTool {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    /// Arguments placed before every invocation's own arguments.
    #[must_use]
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn resolve_program(&self) -> Option<PathBuf> {
        let is_bare_name = self.program.components().count() == 1 && !self.program.is_absolute();
        if !is_bare_name {
            return self.program.is_file().then(|| self.program.clone());
        }

        let search_path = env::var_os("PATH")?;
        env::split_paths(&search_path)
            .map(|dir| dir.join(&self.program))
            .find(|candidate| candidate.is_file())
    }
}

#[async_trait]
impl Tool for ProcessTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.resolve_program().is_some()
    }

    async fn run(&self, args: &[OsString], timeout: Duration) -> ToolOutcome {
        debug!(
            tool = %self.name,
            program = %self.program.display(),
            ?args,
            timeout_secs = timeout.as_secs(),
            "spawning external tool"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return ToolOutcome::Failure {
                    exit_code: None,
                    diagnostic: format!(
                        "failed to start {} ({}): {err}",
                        self.name,
                        self.program.display()
                    ),
                }
            }
        };

        let stdout_task = child.stdout.take().map(|out| tokio::spawn(drain(out)));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(drain(err)));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let stdout = collect(stdout_task, OUTPUT_DRAIN_GRACE).await;
                let stderr = collect(stderr_task, OUTPUT_DRAIN_GRACE).await;

                if status.success() {
                    ToolOutcome::Success { stdout, stderr }
                } else {
                    let diagnostic = [stderr.trim(), stdout.trim()]
                        .into_iter()
                        .find(|text| !text.is_empty())
                        .map_or_else(
                            || format!("{} failed without output", self.name),
                            tail,
                        );
                    ToolOutcome::Failure {
                        exit_code: status.code(),
                        diagnostic,
                    }
                }
            }
            Ok(Err(err)) => {
                abort(stdout_task);
                abort(stderr_task);
                ToolOutcome::Failure {
                    exit_code: None,
                    diagnostic: format!("failed waiting for {}: {err}", self.name),
                }
            }
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!(tool = %self.name, error = %err, "failed to kill timed out tool");
                }
                abort(stdout_task);
                abort(stderr_task);
                ToolOutcome::TimedOut { after: timeout }
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buf).await {
        debug!(error = %err, "tool output stream closed early");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(task: Option<JoinHandle<String>>, grace: Duration) -> String {
    let Some(mut handle) = task else {
        return String::new();
    };
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(output) => output.unwrap_or_default(),
        Err(_) => {
            handle.abort();
            debug!("tool output still open after exit; left undrained");
            String::new()
        }
    }
}

fn abort(task: Option<JoinHandle<String>>) {
    if let Some(handle) = task {
        handle.abort();
    }
}

fn tail(text: &str) -> String {
    let count = text.chars().count();
    if count <= DIAGNOSTIC_CHAR_LIMIT {
        return text.to_string();
    }
    text.chars()
        .skip(count.saturating_sub(DIAGNOSTIC_CHAR_LIMIT))
        .collect()
}
