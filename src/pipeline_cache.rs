//! Serving-path cache of initialized inference pipelines.
//!
//! Pipelines are keyed by task name only. The first request for a task builds
//! the pipeline with the model it names; every later request for that task
//! reuses it, whatever model it asks for. Entries are never evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backend::{Pipeline, PipelineProvider};
use crate::error::AppError;

type Slot = Arc<OnceCell<Arc<dyn Pipeline>>>;

/// Task-keyed pipeline cache with single-flight initialization.
pub struct PipelineCache {
    provider: Arc<dyn PipelineProvider>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl PipelineCache {
    pub fn new(provider: Arc<dyn PipelineProvider>) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pipeline cached for `task`, building it from `model_id` on first use.
    ///
    /// Concurrent first requests for one task share a single construction. A
    /// failed construction leaves the task uncached so a later call retries.
    pub async fn get_or_create(
        &self,
        task: &str,
        model_id: &str,
    ) -> Result<Arc<dyn Pipeline>, AppError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(task.to_string()).or_default())
        };

        if let Some(pipeline) = slot.get() {
            if pipeline.model_id() != model_id {
                debug!(
                    task,
                    requested_model = model_id,
                    cached_model = pipeline.model_id(),
                    "requested model differs from cached pipeline; reusing cached"
                );
            }
            return Ok(Arc::clone(pipeline));
        }

        let pipeline = slot
            .get_or_try_init(|| async {
                info!(task, model = model_id, "initializing pipeline");
                self.provider.load(task, model_id).await
            })
            .await?;

        Ok(Arc::clone(pipeline))
    }

    /// Sorted task names that currently hold an initialized pipeline.
    pub fn keys(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(task, _)| task.clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }
}
