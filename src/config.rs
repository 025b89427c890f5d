//! Configuration resolution from environment variables.
//!
//! Every variable is read exactly once at startup and classified as unset,
//! set-but-empty, or set. The resulting [`AppConfig`] is consumed by the
//! bootstrap routine only.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::AppError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9911;
pub const DEFAULT_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 64;
pub const DEFAULT_TLS_KEY_FILE: &str = "./RootCA.key";
pub const DEFAULT_TLS_CERT_FILE: &str = "./RootCA.crt";

/// Names read for each listener setting, launcher names first.
const HOST_VARS: &[&str] = &["FASTAPI_HOST", "HOST"];
const PORT_VARS: &[&str] = &["FASTAPI_PORT", "PORT"];
const WORKERS_VARS: &[&str] = &["WORK_COUNT", "WORKERS"];
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: usize = 60;
pub const MAX_UPSTREAM_TIMEOUT_SECS: usize = 600;

/// Raw state of one environment variable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EnvValue {
    /// Variable is not present in the environment.
    Unset,
    /// Variable is present but blank after trimming.
    Empty,
    /// Variable holds a trimmed, non-empty value.
    Set(String),
}

impl EnvValue {
    fn classify(raw: Option<String>) -> Self {
        match raw {
            None => Self::Unset,
            Some(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Self::Empty
                } else {
                    Self::Set(trimmed.to_string())
                }
            }
        }
    }

    /// Picks the first set value; otherwise empty if any candidate was empty.
    fn first_of(values: impl IntoIterator<Item = Self>) -> Self {
        let mut resolved = Self::Unset;
        for value in values {
            match value {
                Self::Set(_) => return value,
                Self::Empty => resolved = Self::Empty,
                Self::Unset => {}
            }
        }
        resolved
    }

    fn into_option(self) -> Option<String> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unset | Self::Empty => None,
        }
    }
}

/// Certificate and private key used to terminate TLS.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Base URLs of the external services the daemon delegates to.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Hugging Face hub, used to resolve model metadata.
    pub hf_hub_url: String,
    /// Hosted inference runtime.
    pub hf_inference_url: String,
    /// Optional Hugging Face token sent as a bearer credential.
    pub hf_token: Option<String>,
    /// YouTube origin serving watch pages and timed text.
    pub youtube_url: String,
    /// Google origin serving result pages.
    pub google_url: String,
    /// Timeout applied to every outbound request.
    pub timeout: Duration,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host interface to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Number of tokio worker threads.
    pub workers: usize,
    /// TLS material, `None` when TLS is disabled.
    pub tls: Option<TlsFiles>,
    /// Whether registry pipelines are constructed before serving.
    pub warm_up: bool,
    /// Collaborator endpoints.
    pub upstream: UpstreamConfig,
}

impl AppConfig {
    /// Builds configuration from process environment variables.
    ///
    /// Variables (`HOST`, `PORT` and `WORKERS` are accepted as aliases):
    /// - `FASTAPI_HOST` (default `localhost`; an empty value also falls back, with a warning)
    /// - `FASTAPI_PORT` (default `9911`)
    /// - `WORK_COUNT` (default `1`, min `1`, max `64`)
    /// - `TLS_KEY_FILE` / `TLS_CERT_FILE` (default `./RootCA.key` / `./RootCA.crt`;
    ///   setting either to an empty value disables TLS)
    /// - `WARM_UP` (default `true`)
    /// - `HF_TOKEN` (optional)
    /// - `HF_HUB_URL`, `HF_INFERENCE_URL`, `YOUTUBE_URL`, `GOOGLE_URL`
    /// - `UPSTREAM_TIMEOUT_SECS` (default `60`, min `1`, max `600`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| EnvValue::classify(lookup(name));

        let any_of = |names: &[&str]| EnvValue::first_of(names.iter().map(|name| var(*name)));

        let host = match any_of(HOST_VARS) {
            EnvValue::Set(host) => host,
            EnvValue::Empty => {
                warn!(default = DEFAULT_HOST, "FASTAPI_HOST is set but empty; using default");
                DEFAULT_HOST.to_string()
            }
            EnvValue::Unset => DEFAULT_HOST.to_string(),
        };
        let port = parse_port("FASTAPI_PORT", any_of(PORT_VARS), DEFAULT_PORT)?;
        let workers = parse_usize_bounded(
            "WORK_COUNT",
            any_of(WORKERS_VARS),
            DEFAULT_WORKERS,
            1,
            MAX_WORKERS,
        )?;
        let tls = resolve_tls(var("TLS_KEY_FILE"), var("TLS_CERT_FILE"));
        let warm_up = parse_bool("WARM_UP", var("WARM_UP"), true)?;
        let timeout_secs = parse_usize_bounded(
            "UPSTREAM_TIMEOUT_SECS",
            var("UPSTREAM_TIMEOUT_SECS"),
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
            1,
            MAX_UPSTREAM_TIMEOUT_SECS,
        )?;

        let url = |name: &str, default: &str| {
            var(name)
                .into_option()
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };

        Ok(Self {
            host,
            port,
            workers,
            tls,
            warm_up,
            upstream: UpstreamConfig {
                hf_hub_url: url("HF_HUB_URL", "https://huggingface.co"),
                hf_inference_url: url("HF_INFERENCE_URL", "https://api-inference.huggingface.co"),
                hf_token: var("HF_TOKEN").into_option(),
                youtube_url: url("YOUTUBE_URL", "https://www.youtube.com"),
                google_url: url("GOOGLE_URL", "https://www.google.com"),
                timeout: Duration::from_secs(timeout_secs as u64),
            },
        })
    }

    /// Returns the `host:port` pair to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn resolve_tls(key: EnvValue, cert: EnvValue) -> Option<TlsFiles> {
    let file = |value: EnvValue, default: &str| match value {
        EnvValue::Unset => Some(PathBuf::from(default)),
        EnvValue::Empty => None,
        EnvValue::Set(path) => Some(PathBuf::from(path)),
    };

    Some(TlsFiles {
        key: file(key, DEFAULT_TLS_KEY_FILE)?,
        cert: file(cert, DEFAULT_TLS_CERT_FILE)?,
    })
}

fn parse_port(name: &str, value: EnvValue, default: u16) -> Result<u16, AppError> {
    let Some(raw) = value.into_option() else {
        return Ok(default);
    };
    let parsed = raw.parse::<u16>().map_err(|_| {
        AppError::internal(format!("invalid {name}={raw:?}; expected integer 1-65535"))
    })?;
    if parsed == 0 {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected > 0"
        )));
    }
    Ok(parsed)
}

fn parse_bool(name: &str, value: EnvValue, default: bool) -> Result<bool, AppError> {
    let Some(raw) = value.into_option() else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected true/false"
        ))),
    }
}

fn parse_usize_bounded(
    name: &str,
    value: EnvValue,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, AppError> {
    let Some(raw) = value.into_option() else {
        return Ok(default);
    };
    let parsed = raw.parse::<usize>().map_err(|_| {
        AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        ))
    })?;
    if parsed < min || parsed > max {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        )));
    }
    Ok(parsed)
}
