use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use tracing::{debug, warn};

use crate::error::AppError;

/// Exclusive scratch directory for a single job.
///
/// The directory is created by [`JobWorkspace::create`] and removed by
/// [`JobWorkspace::destroy`]. Dropping a workspace that was never destroyed
/// removes it synchronously, so a panicking job cannot leak its directory.
/// Removal failures are logged and never returned to the caller.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
    job_id: String,
    destroyed: bool,
}

impl JobWorkspace {
    /// Allocate `<work_dir>/<job_id>`, creating `work_dir` when missing.
    ///
    /// Fails if the job directory already exists: two jobs never share a workspace.
    pub async fn create(work_dir: &Path, job_id: &str) -> Result<Self, AppError> {
        if !is_plain_name(job_id) {
            return Err(AppError::Workspace(format!(
                "job id {job_id:?} is not usable as a directory name"
            )));
        }

        tokio::fs::create_dir_all(work_dir).await.map_err(|err| {
            AppError::Workspace(format!(
                "failed to prepare work directory {}: {err}",
                work_dir.display()
            ))
        })?;

        let root = work_dir.join(job_id);
        tokio::fs::create_dir(&root).await.map_err(|err| {
            AppError::Workspace(format!(
                "failed to create workspace {}: {err}",
                root.display()
            ))
        })?;

        debug!(job_id, path = %root.display(), "workspace created");

        Ok(Self {
            root,
            job_id: job_id.to_string(),
            destroyed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Path for an artifact stored directly inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Remove the workspace and everything in it. Safe to call more than once.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(job_id = %self.job_id, "workspace destroyed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(job_id = %self.job_id, "workspace already gone");
            }
            Err(err) => warn!(
                job_id = %self.job_id,
                path = %self.root.display(),
                error = %err,
                "failed to destroy workspace"
            ),
        }
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => warn!(
                job_id = %self.job_id,
                "workspace removed on drop without explicit destroy"
            ),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                job_id = %self.job_id,
                path = %self.root.display(),
                error = %err,
                "failed to remove workspace on drop"
            ),
        }
    }
}

/// True for a single, non-special path component.
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
