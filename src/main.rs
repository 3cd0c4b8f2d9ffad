use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod config;
mod errors;
mod kv;
mod metrics;
mod middleware;
mod proxy;
mod router;
mod state;
mod upstream;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config_path = config::resolve_path(args.config.as_deref());
    let cfg = config::load(&config_path)?;

    init_logging(&cfg.server.mode);

    tracing::info!(port = cfg.server.port, mode = %cfg.server.mode, "starting gateway");

    let redis_addr = std::env::var("REDIS_ADDR").unwrap_or_else(|_| "localhost:6379".to_string());
    let kv_client = match kv::KvClient::connect(&redis_addr).await {
        Ok(client) => {
            tracing::info!(addr = %redis_addr, "connected to redis rate-limit store");
            Some(client)
        }
        Err(e) => {
            tracing::warn!(error = %e, "redis unavailable at startup, rate limiting fails open");
            None
        }
    };

    let http_client = reqwest::Client::builder()
        .build()
        .expect("reqwest client config is always valid");

    let upstreams = upstream::UpstreamManager::new(&cfg.upstreams, http_client.clone());

    let port = cfg.server.port;
    let state = Arc::new(AppState {
        config: cfg,
        upstreams,
        kv: kv_client,
        http_client,
    });

    let app = axum::Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback(router::handle)
        .with_state(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.upstreams.shutdown();
    Ok(())
}

fn init_logging(mode: &str) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "gateway=info,tower_http=info".into()),
    );

    // Mirrors the original's default: OTEL_EXPORTER_OTLP_ENDPOINT falls back to
    // localhost:4317 rather than disabling the exporter outright. A collector
    // not being reachable there is logged and never fatal.
    let otel_endpoint =
        std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| "http://localhost:4317".to_string());

    let telemetry_layer = {
        use opentelemetry::KeyValue;
        use opentelemetry_sdk::{trace as sdktrace, Resource};

        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(&otel_endpoint),
            )
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "vibeway-gateway"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("otlp exporter init failed, continuing without tracing export: {}", e);
                None
            }
        }
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry_layer);

    if mode == "production" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}

async fn metrics() -> String {
    metrics::METRICS.render()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections");
}
