//! axo-tus server binary.
//!
//! Builds the filesystem-backed upload store, starts the expiry sweeper and
//! serves the tus endpoints until Ctrl+C or SIGTERM.

use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum::middleware;
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use axo_tus::config::Args;
use axo_tus::handler::{TusConfig, tus_router};
use axo_tus::http::{add_security_headers, build_cors_layer, extract_forwarded_ip};
use axo_tus::logging::{self, log_completion};
use axo_tus::{UploadStore, spawn_sweeper};

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let store = UploadStore::on_disk(&args.upload_dir, args.upload_config())
        .await
        .map_err(std::io::Error::other)?;
    let store = Arc::new(store);
    store.subscribe(log_completion);
    info!(
        upload_dir = args.upload_dir,
        max_size = args.upload_max_size,
        "upload store ready"
    );

    let sweeper = args.expire_after().map(|max_age| {
        info!(
            expire_secs = args.expire_secs,
            interval_secs = args.sweep_interval_secs,
            "expiry sweeper enabled"
        );
        spawn_sweeper(store.clone(), args.sweep_interval(), max_age)
    });

    let tus_config = TusConfig::new(&args.base_path, args.expire_after());
    let mut app = tus_router(store, tus_config)
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = extract_forwarded_ip(request.headers())
                        .or(connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        );

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(%addr, base_path = args.base_path, "starting tus server");

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
