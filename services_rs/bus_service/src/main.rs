mod config;
mod error;
mod handlers;
mod models;
mod state;

use axum::extract::MatchedPath;
use axum::http::{header::HeaderName, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use bus_engine::store::{connect, NoopLocker};
use bus_engine::{BusEngine, EngineMode, HttpPaymentGateway, PgStore};
use config::Config;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let pool = match connect(&cfg.db_url, cfg.db_max_connections).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "db connect failed");
            std::process::exit(2);
        }
    };
    let mut store = PgStore::new(pool, cfg.db_schema.clone());
    if cfg.db_max_connections == 1 {
        // one connection is one writer; row locks add nothing
        store = store.with_locker(Arc::new(NoopLocker));
    }
    if let Err(e) = store.ensure_schema().await {
        tracing::error!(error = %e, "db ensure_schema failed");
        std::process::exit(2);
    }

    let mut engine = BusEngine::new(Arc::new(store), cfg.ticket_signer.clone());
    if let Some(base_url) = cfg.payments_base_url.as_deref() {
        let gateway = match HttpPaymentGateway::new(
            base_url,
            cfg.payments_timeout,
            cfg.bus_payments_internal_secret.clone(),
            &cfg.internal_service_id,
        ) {
            Ok(g) => g,
            Err(e) => {
                tracing::error!(error = %e, "payments client init failed");
                std::process::exit(2);
            }
        };
        engine = engine.with_payments(Arc::new(gateway));
    }
    if cfg.is_test_env() {
        engine = engine.with_mode(EngineMode::Test);
    }
    tracing::info!(
        env = %cfg.env_name,
        payments_required = engine.payments_required(),
        "engine ready"
    );

    let app = build_router(AppState::new(engine, cfg.env_name.clone()), cfg.max_body_bytes);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));
    tracing::info!(%addr, "starting bus_service");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, %addr, "bind failed");
            std::process::exit(2);
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let request_id = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/health", get(handlers::health))
        .route("/cities", post(handlers::create_city))
        .route("/operators", post(handlers::create_operator))
        .route(
            "/operators/:operator_id/online",
            post(handlers::operator_online),
        )
        .route(
            "/operators/:operator_id/offline",
            post(handlers::operator_offline),
        )
        .route(
            "/operators/:operator_id/stats",
            get(handlers::operator_stats),
        )
        .route("/routes", post(handlers::create_route))
        .route("/trips", post(handlers::create_trip))
        .route("/trips/:trip_id", get(handlers::trip_detail))
        .route("/trips/:trip_id/publish", post(handlers::publish_trip))
        .route("/trips/:trip_id/unpublish", post(handlers::unpublish_trip))
        .route("/trips/:trip_id/cancel", post(handlers::cancel_trip))
        .route("/trips/:trip_id/quote", get(handlers::quote))
        .route("/trips/:trip_id/book", post(handlers::book_trip))
        .route("/bookings/:booking_id", get(handlers::booking_status))
        .route(
            "/bookings/:booking_id/cancel",
            post(handlers::cancel_booking),
        )
        .route("/tickets/board", post(handlers::ticket_board))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        // Log the matched route template, never the query string.
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str)
                    .unwrap_or_else(|| req.uri().path());
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                tracing::span!(
                    tracing::Level::INFO,
                    "http_request",
                    method = %req.method(),
                    path = %path,
                    request_id = %request_id
                )
            }),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}
