use common::error::AppError;
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use super::{
    config::JobSettings,
    context::PipelineContext,
    state::{Accepted, Done, Enhancing, Failed, Fetching, JobMachine, Publishing, Vectorizing},
};
use crate::types::JobStatus;

#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job_id()))]
pub async fn fetch_source(
    machine: JobMachine<(), Accepted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<JobMachine<(), Fetching>, AppError> {
    let machine = machine
        .start_fetch()
        .map_err(|(_, guard)| map_guard_error("start_fetch", &guard))?;
    ctx.set_status(JobStatus::Fetching);

    let dest = ctx
        .workspace
        .file(&ctx.job.source.input_file_name(ctx.job_id()));
    let source = match ctx.services.fetch_source(&ctx.job.source.url, &dest).await {
        Ok(source) => source,
        Err(err) => return Err(fail(machine.fail(), err)),
    };

    debug!(
        job_id = %ctx.job_id(),
        path = %source.path.display(),
        bytes = source.bytes,
        "source image stored in workspace"
    );
    ctx.artifacts.source = Some(source);

    Ok(machine)
}

#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job_id()))]
pub async fn enhance(
    machine: JobMachine<(), Fetching>,
    ctx: &mut PipelineContext<'_>,
) -> Result<JobMachine<(), Enhancing>, AppError> {
    let machine = machine
        .start_enhance()
        .map_err(|(_, guard)| map_guard_error("start_enhance", &guard))?;
    ctx.set_status(JobStatus::Enhancing);

    let input = ctx.source_path()?;
    let output = ctx
        .workspace
        .file(&JobSettings::enhanced_file_name(ctx.job_id()));
    let outcome = match ctx.services.enhance(&input, &output).await {
        Ok(outcome) => outcome,
        Err(err) => return Err(fail(machine.fail(), err)),
    };

    debug!(
        job_id = %ctx.job_id(),
        enhancement_outcome = outcome.label(),
        "enhancement stage finished"
    );
    ctx.artifacts.enhanced = Some(output);
    ctx.artifacts.enhancement = Some(outcome);

    Ok(machine)
}

#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job_id(), mode = %ctx.job.mode))]
pub async fn vectorize(
    machine: JobMachine<(), Enhancing>,
    ctx: &mut PipelineContext<'_>,
) -> Result<JobMachine<(), Vectorizing>, AppError> {
    let machine = machine
        .start_vectorize()
        .map_err(|(_, guard)| map_guard_error("start_vectorize", &guard))?;
    ctx.set_status(JobStatus::Vectorizing);

    let input = ctx.enhanced_path()?;
    let output = ctx
        .workspace
        .file(&ctx.settings.output_file_name(ctx.job_id()));
    if let Err(err) = ctx.services.vectorize(&input, &output, ctx.job.mode).await {
        return Err(fail(machine.fail(), err));
    }

    ctx.artifacts.output = Some(output);

    Ok(machine)
}

#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job_id()))]
pub async fn publish(
    machine: JobMachine<(), Vectorizing>,
    ctx: &mut PipelineContext<'_>,
) -> Result<JobMachine<(), Publishing>, AppError> {
    let machine = machine
        .start_publish()
        .map_err(|(_, guard)| map_guard_error("start_publish", &guard))?;
    ctx.set_status(JobStatus::Publishing);

    let output = ctx.output_path()?;
    let file_name = ctx.settings.output_file_name(ctx.job_id());
    let published = match ctx
        .services
        .publish(ctx.job_id(), &output, &file_name)
        .await
    {
        Ok(published) => published,
        Err(err) => return Err(fail(machine.fail(), err)),
    };

    info!(job_id = %ctx.job_id(), output = ?published, "result published");
    ctx.artifacts.published = Some(published);

    Ok(machine)
}

pub fn finish(
    machine: JobMachine<(), Publishing>,
    ctx: &mut PipelineContext<'_>,
) -> Result<JobMachine<(), Done>, AppError> {
    let machine = machine
        .finish()
        .map_err(|(_, guard)| map_guard_error("finish", &guard))?;
    ctx.set_status(JobStatus::Done);
    Ok(machine)
}

/// Moves the machine to `Failed` and hands back the stage error.
fn fail<M>(
    transition: Result<JobMachine<(), Failed>, (M, GuardError)>,
    err: AppError,
) -> AppError {
    if let Err((_, guard)) = transition {
        warn!(error = %err, ?guard, "failed to record failed transition");
    }
    err
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid vectorization pipeline transition during {event}: {guard:?}"
    ))
}
