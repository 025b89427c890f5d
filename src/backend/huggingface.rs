//! Hugging Face backed inference pipelines.
//!
//! Loading a pipeline resolves the model on the hub so unknown ids fail at
//! construction time. Running it posts the input to the hosted inference
//! runtime.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::backend::{excerpt, Pipeline, PipelineProvider};
use crate::error::{AppError, Upstream};

/// Builds [`HfPipeline`]s against a hub and an inference endpoint.
pub struct HfInferenceProvider {
    client: reqwest::Client,
    hub_url: String,
    inference_url: String,
    token: Option<String>,
}

impl HfInferenceProvider {
    pub fn new(
        client: reqwest::Client,
        hub_url: String,
        inference_url: String,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            hub_url,
            inference_url,
            token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    #[serde(default)]
    pipeline_tag: Option<String>,
}

/// Maps task aliases onto the hub's pipeline tag names.
pub fn canonical_task(task: &str) -> &str {
    match task {
        "sentiment-analysis" => "text-classification",
        "ner" => "token-classification",
        other => other,
    }
}

#[async_trait]
impl PipelineProvider for HfInferenceProvider {
    async fn load(&self, task: &str, model_id: &str) -> Result<Arc<dyn Pipeline>, AppError> {
        let model_id = model_id.trim_matches('/');
        if model_id.is_empty() {
            return Err(AppError::invalid_request("model must not be empty"));
        }

        let url = format!("{}/api/models/{model_id}", self.hub_url);
        let mut request = self.client.get(&url);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            AppError::upstream(
                Upstream::Inference,
                format!("failed to resolve model {model_id:?}: {err}"),
            )
        })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(AppError::not_found(format!(
                    "model {model_id:?} not found on the hub"
                )));
            }
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                let hint = if self.token.is_some() {
                    "HF_TOKEN was rejected or lacks access"
                } else {
                    "set HF_TOKEN"
                };
                return Err(AppError::upstream(
                    Upstream::Inference,
                    format!("model {model_id:?} requires authentication ({status}); {hint}"),
                ));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::upstream(
                    Upstream::Inference,
                    format!(
                        "hub lookup for {model_id:?} failed with {status}: {}",
                        excerpt(&body)
                    ),
                ));
            }
        }

        let info: ModelInfo = response.json().await.map_err(|err| {
            AppError::upstream(
                Upstream::Inference,
                format!("invalid hub metadata for {model_id:?}: {err}"),
            )
        })?;

        match info.pipeline_tag.as_deref() {
            Some(tag) if tag != canonical_task(task) => {
                warn!(task, model = model_id, tag, "model is tagged for a different task");
            }
            Some(_) => {}
            None => warn!(task, model = model_id, "model has no pipeline tag"),
        }

        debug!(task, model = model_id, "resolved pipeline");

        Ok(Arc::new(HfPipeline {
            task: task.to_string(),
            model_id: model_id.to_string(),
            endpoint: format!("{}/models/{model_id}", self.inference_url),
            client: self.client.clone(),
            token: self.token.clone(),
        }))
    }
}

/// Pipeline invoking one model on the hosted inference runtime.
pub struct HfPipeline {
    task: String,
    model_id: String,
    endpoint: String,
    client: reqwest::Client,
    token: Option<String>,
}

#[async_trait]
impl Pipeline for HfPipeline {
    fn task(&self) -> &str {
        &self.task
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn run(&self, input: &str) -> Result<serde_json::Value, AppError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "inputs": input,
            "options": {"wait_for_model": true},
        }));
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            AppError::upstream(
                Upstream::Inference,
                format!("inference request to {:?} failed: {err}", self.model_id),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(
                Upstream::Inference,
                format!(
                    "{} inference on {:?} failed with {status}: {}",
                    self.task,
                    self.model_id,
                    excerpt(&body)
                ),
            ));
        }

        let output: Value = response.json().await.map_err(|err| {
            AppError::upstream(
                Upstream::Inference,
                format!("invalid inference output from {:?}: {err}", self.model_id),
            )
        })?;

        if canonical_task(&self.task) == "text-classification" {
            return Ok(top_label(output));
        }
        Ok(output)
    }
}

/// Reduces classifier output to `[{label, score}]` for the best label.
///
/// The hosted runtime answers one input with a batch of one, `[[...]]`, that
/// lists every label. Other shapes are returned unchanged.
pub fn top_label(output: Value) -> Value {
    let labels = match output {
        Value::Array(mut batch) if matches!(batch.first(), Some(Value::Array(_))) => {
            match batch.swap_remove(0) {
                Value::Array(labels) => labels,
                other => return other,
            }
        }
        Value::Array(labels) => labels,
        other => return other,
    };

    let score = |item: &Value| item["score"].as_f64().unwrap_or(f64::NEG_INFINITY);
    let best = labels
        .into_iter()
        .reduce(|best, item| if score(&item) > score(&best) { item } else { best });
    Value::Array(best.into_iter().collect())
}
