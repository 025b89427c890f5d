use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use tensor_daemon::api::{build_router, AppState};
use tensor_daemon::backend::build_backends;
use tensor_daemon::config::{AppConfig, TlsFiles};
use tensor_daemon::error::AppError;
use tensor_daemon::registry::{warm_up, MODEL_REGISTRY};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tensor_daemon=info,axum=info".into()),
        )
        .compact()
        .init();

    let cfg = AppConfig::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.workers)
        .enable_all()
        .build()?;

    runtime.block_on(run(cfg))
}

async fn run(cfg: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let backends = build_backends(&cfg.upstream)?;

    if cfg.warm_up {
        info!(models = MODEL_REGISTRY.len(), "warming registry pipelines");
        warm_up(backends.pipelines.as_ref(), MODEL_REGISTRY).await?;
    }

    let state = Arc::new(AppState::new(backends));
    let app = build_router(state);
    let addr = cfg.bind_addr();

    info!(
        host = %cfg.host,
        port = cfg.port,
        workers = cfg.workers,
        tls = cfg.tls.is_some(),
        "starting tensor-daemon"
    );

    match &cfg.tls {
        Some(tls) => serve_tls(app, &addr, tls).await?,
        None => {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }
    Ok(())
}

async fn serve_tls(app: Router, addr: &str, tls: &TlsFiles) -> Result<(), Box<dyn std::error::Error>> {
    let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .map_err(|err| {
            AppError::internal(format!(
                "failed to load TLS material cert={:?} key={:?}: {err}",
                tls.cert, tls.key
            ))
        })?;
    let socket_addr = tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| AppError::internal(format!("could not resolve bind address {addr:?}")))?;

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    axum_server::bind_rustls(socket_addr, rustls)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
