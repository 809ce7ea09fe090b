use std::sync::Arc;

use common::{
    error::AppError,
    utils::{config::AppConfig, idle_guard::IdleGuard},
};
use vectorize_pipeline::VectorizePipeline;

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<VectorizePipeline>,
    pub idle_guard: Arc<IdleGuard>,
}

impl ApiState {
    pub fn new(config: &AppConfig, idle_guard: Arc<IdleGuard>) -> Result<Self, AppError> {
        let pipeline = Arc::new(VectorizePipeline::new(config)?);
        Ok(Self::with_pipeline(config, pipeline, idle_guard))
    }

    pub fn with_pipeline(
        config: &AppConfig,
        pipeline: Arc<VectorizePipeline>,
        idle_guard: Arc<IdleGuard>,
    ) -> Self {
        Self {
            config: Arc::new(config.clone()),
            pipeline,
            idle_guard,
        }
    }
}
