//! Static registry of pipelines warmed at startup.

use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::backend::PipelineProvider;
use crate::error::AppError;

/// A `(task, model)` pair known to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    pub task: &'static str,
    pub model_id: &'static str,
}

/// Pipelines constructed during warm-up, in order.
pub const MODEL_REGISTRY: &[ModelEntry] = &[
    ModelEntry {
        task: "summarization",
        model_id: "Falconsai/text_summarization",
    },
    ModelEntry {
        task: "text-classification",
        model_id: "mohameddhiab/humor-no-humor",
    },
    ModelEntry {
        task: "text-classification",
        model_id: "SamLowe/roberta-base-go_emotions",
    },
    ModelEntry {
        task: "text-classification",
        model_id: "bhadresh-savani/distilbert-base-uncased-emotion",
    },
    ModelEntry {
        task: "text-classification",
        model_id: "Falconsai/offensive_speech_detection",
    },
    ModelEntry {
        task: "text-classification",
        model_id: "helinivan/english-sarcasm-detector",
    },
    ModelEntry {
        task: "sentiment-analysis",
        model_id: "michellejieli/emotion_text_classifier",
    },
];

/// Constructs and discards a pipeline for every entry.
///
/// This does not touch the serving cache. The first failure is returned.
pub async fn warm_up(
    provider: &dyn PipelineProvider,
    entries: &[ModelEntry],
) -> Result<(), AppError> {
    for entry in entries {
        let started = Instant::now();
        provider.load(entry.task, entry.model_id).await?;
        info!(
            task = entry.task,
            model = entry.model_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "warmed pipeline"
        );
    }
    Ok(())
}
