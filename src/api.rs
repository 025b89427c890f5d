//! HTTP API surface.
//!
//! This module owns routing, parameter extraction, and response shaping while
//! delegating the actual work to collaborators and the pipeline cache.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::backend::{
    Backends, CaptionSegment, CaptionSource, SearchProvider, SearchQuery, SearchResult,
};
use crate::error::AppError;
use crate::pipeline_cache::PipelineCache;
use crate::registry::MODEL_REGISTRY;

/// Number of results requested from the search provider.
pub const SEARCH_RESULTS: usize = 20;
/// Interface language requested from the search provider.
pub const SEARCH_LANG: &str = "en";

/// Every registered route as `(path, handler name)`, in registration order.
pub const ROUTES: &[(&str, &str)] = &[
    ("/ping", "ping"),
    ("/app/youtube/cc/:video_id", "youtube_captions"),
    ("/app/google/ss/", "google_search"),
    ("/", "routes"),
    ("/known", "known_models"),
    ("/transformers/pipeline/:task", "pipeline"),
];

/// Shared state injected into all route handlers.
pub struct AppState {
    pub captions: Arc<dyn CaptionSource>,
    pub search: Arc<dyn SearchProvider>,
    /// Serving-path pipelines, populated on first use per task.
    pub pipelines: PipelineCache,
}

impl AppState {
    /// Constructs shared handler state with an empty pipeline cache.
    pub fn new(backends: Backends) -> Self {
        Self {
            captions: backends.captions,
            search: backends.search,
            pipelines: PipelineCache::new(backends.pipelines),
        }
    }
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(ROUTES[0].0, get(ping))
        .route(ROUTES[1].0, get(youtube_captions))
        .route(ROUTES[2].0, get(google_search))
        .route(ROUTES[3].0, get(routes))
        .route(ROUTES[4].0, get(known_models))
        .route(ROUTES[5].0, post(pipeline))
        .with_state(state)
}

/// Liveness check (`GET /ping`).
pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({"daemon": true, "ok": true}))
}

/// Captions of a video (`GET /app/youtube/cc/:video_id`).
pub async fn youtube_captions(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Result<Json<Vec<CaptionSegment>>, AppError> {
    let segments = state.captions.fetch(&video_id).await?;
    Ok(Json(segments))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
}

/// Structured web search (`GET /app/google/ss/?q=`).
pub async fn google_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    let query = SearchQuery {
        term: params.q,
        num_results: SEARCH_RESULTS,
        lang: SEARCH_LANG.to_string(),
    };
    let mut results = state.search.search(&query).await?;
    results.truncate(SEARCH_RESULTS);
    Ok(Json(results))
}

/// Route listing plus current pipeline cache keys (`GET /`).
pub async fn routes(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uri = ROUTES
        .iter()
        .map(|(path, name)| json!({"path": path, "name": name}))
        .collect::<Vec<_>>();

    Json(json!({
        "daemon": true,
        "uri": uri,
        "_classifications_cache_keys": state.pipelines.keys(),
    }))
}

/// Statically registered warm-up models (`GET /known`).
pub async fn known_models() -> Json<serde_json::Value> {
    let uri = MODEL_REGISTRY
        .iter()
        .map(|entry| json!([entry.task, entry.model_id]))
        .collect::<Vec<_>>();

    Json(json!({"uri": uri}))
}

#[derive(Debug, Deserialize)]
pub struct ModelParams {
    pub model: String,
}

/// Request body of the transform endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransformRequest {
    pub value: String,
}

/// Response body of the transform endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformResponse {
    pub task: String,
    /// Model named by the request, not necessarily the one that ran.
    pub model: String,
    pub output: serde_json::Value,
    /// Seconds spent inside the inference call.
    pub classification_time: f64,
    /// Seconds from cache lookup through the end of inference.
    pub init_time: f64,
}

/// Runs a cached pipeline on the request text (`POST /transformers/pipeline/:task?model=`).
pub async fn pipeline(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
    Query(params): Query<ModelParams>,
    Json(body): Json<TransformRequest>,
) -> Result<Json<TransformResponse>, AppError> {
    let started = Instant::now();
    let handle = state.pipelines.get_or_create(&task, &params.model).await?;

    let inference_started = Instant::now();
    let output = handle.run(&body.value).await?;
    let classification_time = inference_started.elapsed().as_secs_f64();
    let init_time = started.elapsed().as_secs_f64();

    info!(
        task = %task,
        requested_model = %params.model,
        model = handle.model_id(),
        classification_time,
        init_time,
        "pipeline call completed"
    );

    Ok(Json(TransformResponse {
        task,
        model: params.model,
        output,
        classification_time,
        init_time,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::backend::huggingface::HfInferenceProvider;
    use crate::backend::{
        Backends, CaptionSegment, CaptionSource, SearchProvider, SearchQuery, SearchResult,
    };
    use crate::error::{AppError, Upstream};
    use crate::pipeline_cache::tests::CountingProvider;

    use super::{build_router, AppState, SEARCH_RESULTS};

    struct MockCaptions;

    #[async_trait]
    impl CaptionSource for MockCaptions {
        async fn fetch(&self, video_id: &str) -> Result<Vec<CaptionSegment>, AppError> {
            if video_id != "dQw4w9WgXcQ" {
                return Err(AppError::not_found(format!(
                    "no captions available for video {video_id:?}"
                )));
            }
            Ok(vec![
                CaptionSegment {
                    text: "never gonna".to_string(),
                    start: 0.0,
                    duration: 1.5,
                },
                CaptionSegment {
                    text: "give you up".to_string(),
                    start: 1.5,
                    duration: 1.2,
                },
            ])
        }
    }

    /// Returns more results than requested so the handler cap is exercised.
    struct MockSearch;

    #[async_trait]
    impl SearchProvider for MockSearch {
        async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, AppError> {
            if query.term == "fail" {
                return Err(AppError::upstream(Upstream::Search, "blocked"));
            }
            assert_eq!(query.lang, "en");
            Ok((0..query.num_results + 5)
                .map(|i| SearchResult {
                    title: format!("title {i}"),
                    link: format!("https://example.com/{i}"),
                    snippet: format!("snippet {i}"),
                })
                .collect())
        }
    }

    fn state_with(provider: Arc<CountingProvider>) -> Arc<AppState> {
        Arc::new(AppState::new(Backends {
            captions: Arc::new(MockCaptions),
            search: Arc::new(MockSearch),
            pipelines: provider,
        }))
    }

    async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
        let res = build_router(Arc::clone(state))
            .oneshot(req)
            .await
            .expect("response");
        let status = res.status();
        let bytes = to_bytes(res.into_body(), 1024 * 1024)
            .await
            .expect("body bytes");
        let payload = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, payload)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .expect("request")
    }

    fn transform(task: &str, model: &str, value: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/transformers/pipeline/{task}?model={model}"))
            .method("POST")
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::json!({"value": value}).to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn ping_reports_daemon_ok() {
        let state = state_with(Arc::new(CountingProvider::default()));
        let (status, payload) = send(&state, get("/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload, serde_json::json!({"daemon": true, "ok": true}));
    }

    #[tokio::test]
    async fn captions_are_returned_in_order() {
        let state = state_with(Arc::new(CountingProvider::default()));
        let (status, payload) = send(&state, get("/app/youtube/cc/dQw4w9WgXcQ")).await;
        assert_eq!(status, StatusCode::OK);

        let segments = payload.as_array().expect("array");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0]["text"], "never gonna");
        assert_eq!(segments[1]["start"], 1.5);
    }

    #[tokio::test]
    async fn missing_captions_are_not_an_empty_success() {
        let state = state_with(Arc::new(CountingProvider::default()));
        let (status, payload) = send(&state, get("/app/youtube/cc/aaaaaaaaaaa")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(payload["error"]["type"], "not_found_error");
    }

    #[tokio::test]
    async fn search_caps_results_and_keeps_fields() {
        let state = state_with(Arc::new(CountingProvider::default()));
        let (status, payload) = send(&state, get("/app/google/ss/?q=rust%20daemon")).await;
        assert_eq!(status, StatusCode::OK);

        let results = payload.as_array().expect("array");
        assert_eq!(results.len(), SEARCH_RESULTS);
        for result in results {
            assert!(result["title"].is_string());
            assert!(result["link"].is_string());
            assert!(result["snippet"].is_string());
        }
    }

    #[tokio::test]
    async fn blank_query_is_passed_to_provider() {
        let state = state_with(Arc::new(CountingProvider::default()));
        let (status, payload) = send(&state, get("/app/google/ss/?q=")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.as_array().expect("array").len(), SEARCH_RESULTS);

        let (status, _) = send(&state, get("/app/google/ss/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_upstream_failure_is_bad_gateway() {
        let state = state_with(Arc::new(CountingProvider::default()));
        let (status, payload) = send(&state, get("/app/google/ss/?q=fail")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(payload["error"]["code"], "search_unavailable");
    }

    #[tokio::test]
    async fn sentiment_analysis_scenario() {
        let state = state_with(Arc::new(CountingProvider::default()));
        let (status, payload) = send(
            &state,
            transform(
                "sentiment-analysis",
                "michellejieli/emotion_text_classifier",
                "I love this!",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["task"], "sentiment-analysis");
        assert_eq!(payload["model"], "michellejieli/emotion_text_classifier");
        assert!(!payload["output"].as_array().expect("output").is_empty());
        assert!(payload["classification_time"].as_f64().unwrap() >= 0.0);
        assert!(payload["init_time"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn hosted_classifier_output_is_top_label_only() {
        let mut server = mockito::Server::new_async().await;
        let _info = server
            .mock("GET", "/api/models/michellejieli/emotion_text_classifier")
            .with_status(200)
            .with_body(r#"{"pipeline_tag": "text-classification"}"#)
            .create_async()
            .await;
        let _infer = server
            .mock("POST", "/models/michellejieli/emotion_text_classifier")
            .with_status(200)
            .with_body(r#"[[{"label": "joy", "score": 0.9}, {"label": "anger", "score": 0.1}]]"#)
            .create_async()
            .await;

        let provider =
            HfInferenceProvider::new(reqwest::Client::new(), server.url(), server.url(), None);
        let state = Arc::new(AppState::new(Backends {
            captions: Arc::new(MockCaptions),
            search: Arc::new(MockSearch),
            pipelines: Arc::new(provider),
        }));

        let (status, payload) = send(
            &state,
            transform(
                "sentiment-analysis",
                "michellejieli/emotion_text_classifier",
                "I love this!",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload["output"],
            serde_json::json!([{"label": "joy", "score": 0.9}])
        );
    }

    #[tokio::test]
    async fn cold_call_includes_construction_time() {
        let state = state_with(Arc::new(CountingProvider::default()));

        let (_, first) = send(&state, transform("summarization", "m", "text")).await;
        let (_, second) = send(&state, transform("summarization", "m", "text")).await;

        let first_init = first["init_time"].as_f64().unwrap();
        let first_cls = first["classification_time"].as_f64().unwrap();
        assert!(first_init > first_cls);
        // CountingProvider sleeps 20ms while loading.
        assert!(first_init - first_cls >= 0.02);

        let second_init = second["init_time"].as_f64().unwrap();
        let second_cls = second["classification_time"].as_f64().unwrap();
        assert!(second_init >= second_cls);
        assert!(second_init - second_cls < 0.02);
    }

    #[tokio::test]
    async fn later_model_reuses_cached_pipeline() {
        let provider = Arc::new(CountingProvider::default());
        let state = state_with(provider.clone());

        send(&state, transform("text-classification", "model-a", "x")).await;
        let (status, payload) = send(&state, transform("text-classification", "model-b", "x")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["model"], "model-b");
        assert_eq!(payload["output"][0]["model"], "model-a");
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn root_lists_routes_and_transformed_tasks_only() {
        let provider = Arc::new(CountingProvider {
            fail: Some("missing/model".to_string()),
            ..Default::default()
        });
        let state = state_with(provider);

        let (_, before) = send(&state, get("/")).await;
        assert_eq!(before["daemon"], true);
        assert!(before["_classifications_cache_keys"]
            .as_array()
            .unwrap()
            .is_empty());
        let paths = before["uri"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["path"].as_str())
            .collect::<Vec<_>>();
        assert!(paths.contains(&"/ping"));
        assert!(paths.contains(&"/transformers/pipeline/:task"));

        send(&state, transform("summarization", "m", "x")).await;
        let (status, _) = send(&state, transform("ner", "missing/model", "x")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, after) = send(&state, get("/")).await;
        assert_eq!(
            after["_classifications_cache_keys"],
            serde_json::json!(["summarization"])
        );
    }

    #[tokio::test]
    async fn known_is_independent_of_transforms() {
        let state = state_with(Arc::new(CountingProvider::default()));
        let (_, before) = send(&state, get("/known")).await;

        send(&state, transform("translation", "t5-small", "hello")).await;
        let (status, after) = send(&state, get("/known")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(before, after);

        let uri = after["uri"].as_array().expect("array");
        assert_eq!(uri.len(), 7);
        assert_eq!(
            uri[0],
            serde_json::json!(["summarization", "Falconsai/text_summarization"])
        );
        assert_eq!(
            uri[2],
            serde_json::json!(["text-classification", "SamLowe/roberta-base-go_emotions"])
        );
        assert_eq!(
            uri[6],
            serde_json::json!(["sentiment-analysis", "michellejieli/emotion_text_classifier"])
        );
    }

    #[tokio::test]
    async fn transform_requires_model_and_value() {
        let state = state_with(Arc::new(CountingProvider::default()));

        let req = Request::builder()
            .uri("/transformers/pipeline/summarization")
            .method("POST")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"value": "x"}"#))
            .expect("request");
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .uri("/transformers/pipeline/summarization?model=m")
            .method("POST")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"text": "x"}"#))
            .expect("request");
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
