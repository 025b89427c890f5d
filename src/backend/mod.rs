//! Collaborator abstractions for captions, search, and model inference.
//!
//! The HTTP layer depends on the traits in this module instead of concrete
//! clients, which keeps request handling decoupled from the upstream services.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::UpstreamConfig;
use crate::error::AppError;

pub mod google;
pub mod huggingface;
pub mod youtube;

/// Browser user agent sent to services that serve different markup to bots.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// One timed caption line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSegment {
    /// Caption text with markup entities resolved.
    pub text: String,
    /// Start offset in seconds.
    pub start: f64,
    /// Display duration in seconds.
    pub duration: f64,
}

/// Parameters of one search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Free-text query.
    pub term: String,
    /// Maximum number of results to return.
    pub num_results: usize,
    /// Interface language, for example `"en"`.
    pub lang: String,
}

/// Structured search result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Retrieves timed captions for a video.
#[async_trait]
pub trait CaptionSource: Send + Sync {
    /// Returns captions in playback order, or fails when none exist.
    async fn fetch(&self, video_id: &str) -> Result<Vec<CaptionSegment>, AppError>;
}

/// Retrieves ordered web search results.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Returns at most `query.num_results` records.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, AppError>;
}

/// Initialized inference unit bound to one task and model.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Task this pipeline was constructed for.
    fn task(&self) -> &str;

    /// Model identifier used at construction.
    fn model_id(&self) -> &str;

    /// Runs inference on `input` and returns the task-specific output.
    async fn run(&self, input: &str) -> Result<serde_json::Value, AppError>;
}

/// Constructs inference pipelines.
#[async_trait]
pub trait PipelineProvider: Send + Sync {
    /// Builds a pipeline for `task` backed by `model_id`.
    async fn load(&self, task: &str, model_id: &str) -> Result<Arc<dyn Pipeline>, AppError>;
}

/// The set of collaborators used by the daemon.
#[derive(Clone)]
pub struct Backends {
    pub captions: Arc<dyn CaptionSource>,
    pub search: Arc<dyn SearchProvider>,
    pub pipelines: Arc<dyn PipelineProvider>,
}

/// Builds the HTTP-backed collaborators sharing one connection pool.
pub fn build_backends(cfg: &UpstreamConfig) -> Result<Backends, AppError> {
    let client = http_client(cfg)?;

    Ok(Backends {
        captions: Arc::new(youtube::YoutubeCaptions::new(
            client.clone(),
            cfg.youtube_url.clone(),
        )),
        search: Arc::new(google::GoogleSearch::new(
            client.clone(),
            cfg.google_url.clone(),
        )),
        pipelines: Arc::new(huggingface::HfInferenceProvider::new(
            client,
            cfg.hf_hub_url.clone(),
            cfg.hf_inference_url.clone(),
            cfg.hf_token.clone(),
        )),
    })
}

fn http_client(cfg: &UpstreamConfig) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(cfg.timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|err| AppError::internal(format!("failed to create HTTP client: {err}")))
}

/// Truncates an upstream response body for inclusion in error messages.
pub(crate) fn excerpt(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let mut out = trimmed.chars().take(MAX_CHARS).collect::<String>();
    out.push_str("...");
    out
}
