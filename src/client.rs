//! Client for talking to a running daemon from another process.

use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::api::{TransformRequest, TransformResponse};
use crate::error::{AppError, Upstream};

/// Thin typed wrapper over the daemon's HTTP surface.
pub struct DaemonClient {
    base_url: Url,
    client: reqwest::Client,
}

impl DaemonClient {
    /// Creates a client for `base_url`, e.g. `https://localhost:9911`.
    ///
    /// `accept_invalid_certs` allows the self-signed certificates a local
    /// daemon is usually started with.
    pub fn new(base_url: impl AsRef<str>, accept_invalid_certs: bool) -> Result<Self, AppError> {
        let raw = base_url.as_ref();
        let base_url = Url::parse(raw)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| AppError::internal(format!("invalid daemon URL {raw:?}")))?;
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|err| AppError::internal(format!("failed to create HTTP client: {err}")))?;

        Ok(Self { base_url, client })
    }

    /// Returns whether the daemon answers `/ping` with `ok: true`.
    pub async fn is_alive(&self) -> bool {
        match self.get_json::<Value>("/ping").await {
            Ok(Some(body)) => body["ok"] == Value::Bool(true),
            Ok(None) | Err(_) => false,
        }
    }

    /// Polls `/ping` every `interval` until the daemon reports alive.
    ///
    /// Never gives up on its own; wrap it in `tokio::time::timeout` to bound it.
    pub async fn wait_until_alive(&self, interval: Duration) {
        loop {
            if self.is_alive().await {
                info!(url = %self.base_url, "daemon is alive");
                return;
            }
            debug!(url = %self.base_url, ?interval, "daemon not alive yet");
            tokio::time::sleep(interval).await;
        }
    }

    /// Runs `task` with `model` on `value`.
    ///
    /// Returns `Ok(None)` when the daemon answers with a non-success status.
    pub async fn transform(
        &self,
        task: &str,
        model: &str,
        value: &str,
    ) -> Result<Option<TransformResponse>, AppError> {
        let url = self.endpoint(["transformers", "pipeline", task]);
        let response = self
            .client
            .post(url)
            .query(&[("model", model)])
            .json(&TransformRequest {
                value: value.to_string(),
            })
            .send()
            .await
            .map_err(|err| unreachable_daemon(task, err))?;

        if !response.status().is_success() {
            debug!(task, model, status = %response.status(), "daemon rejected transform");
            return Ok(None);
        }

        let output = response
            .json::<TransformResponse>()
            .await
            .map_err(|err| invalid_body(task, err))?;
        Ok(Some(output))
    }

    /// Performs a GET against `path` and decodes the JSON body.
    ///
    /// Each `/`-separated part of `path` is encoded as one path segment.
    /// Returns `Ok(None)` when the daemon answers with a non-success status.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, AppError> {
        let url = self.endpoint(path.split('/').filter(|part| !part.is_empty()));
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| unreachable_daemon(path, err))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        info!(path, "calling daemon");
        let body = response
            .json::<T>()
            .await
            .map_err(|err| invalid_body(path, err))?;
        Ok(Some(body))
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn unreachable_daemon(target: &str, err: reqwest::Error) -> AppError {
    AppError::upstream(Upstream::Daemon, format!("daemon request for {target} failed: {err}"))
}

fn invalid_body(target: &str, err: reqwest::Error) -> AppError {
    AppError::upstream(Upstream::Daemon, format!("invalid daemon response for {target}: {err}"))
}
