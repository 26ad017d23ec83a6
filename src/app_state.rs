use std::sync::Arc;
use std::time::Duration;

use rocket::tokio::sync::Semaphore;
use serde_json::Value;

use crate::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::engine::{AutomaticJob, PromptJob, SegmentationEngine};
use crate::error::ApiError;

/// Shared state behind every request:
/// - artifacts: listing of `<public>/<project>/` directories
/// - engine: the external segmentation routine
/// - workers: caps how many segmentation calls run at once
pub struct AppState {
    pub artifacts: ArtifactStore,
    pub engine: Arc<dyn SegmentationEngine>,
    pub workers: Arc<Semaphore>,
    pub segment_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum SegmentJob {
    Automatic(AutomaticJob),
    Prompted(PromptJob),
}

impl SegmentJob {
    fn kind(&self) -> &'static str {
        match self {
            SegmentJob::Automatic(_) => "automatic",
            SegmentJob::Prompted(_) => "predictor",
        }
    }

    fn run(&self, engine: &dyn SegmentationEngine) -> anyhow::Result<Value> {
        match self {
            SegmentJob::Automatic(job) => engine.detect_segment_objects(job),
            SegmentJob::Prompted(job) => engine.detect_segment_point_input_prompts(job),
        }
    }
}

/// What the routine handed back. Both variants go to the client unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Result(Value),
    ErrorPayload(Value),
}

impl SegmentOutcome {
    pub fn classify(value: Value) -> Self {
        let is_error = value
            .as_object()
            .map_or(false, |obj| obj.contains_key("error"));
        if is_error {
            SegmentOutcome::ErrorPayload(value)
        } else {
            SegmentOutcome::Result(value)
        }
    }

    pub fn into_body(self) -> Value {
        match self {
            SegmentOutcome::Result(v) | SegmentOutcome::ErrorPayload(v) => v,
        }
    }
}

impl AppState {
    pub fn new(config: &AppConfig, engine: Arc<dyn SegmentationEngine>) -> Self {
        Self {
            artifacts: ArtifactStore::new(&config.public_dir, &config.base_url),
            engine,
            workers: Arc::new(Semaphore::new(config.max_concurrent_segmentations)),
            segment_timeout: config.segment_timeout,
        }
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Runs `job` on a blocking worker and waits for it without tying up the runtime.
    ///
    /// On timeout the call keeps running (and keeps its permit) until the routine returns.
    pub async fn dispatch(&self, job: SegmentJob) -> Result<SegmentOutcome, ApiError> {
        let kind = job.kind();
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ApiError::Unavailable)?;

        let engine = Arc::clone(&self.engine);
        let task = rocket::tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job.run(engine.as_ref())
        });

        let joined = match self.segment_timeout {
            Some(limit) => match rocket::tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::error!(kind, ?limit, "segmentation call timed out");
                    return Err(ApiError::Timeout);
                }
            },
            None => task.await,
        };

        let value = joined?.map_err(ApiError::Segmentation)?;
        let outcome = SegmentOutcome::classify(value);
        if let SegmentOutcome::ErrorPayload(payload) = &outcome {
            tracing::warn!(kind, error = %payload["error"], "segmentation returned an error payload");
        }
        Ok(outcome)
    }
}
