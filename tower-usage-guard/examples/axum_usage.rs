use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_usage_guard::GuardError;
use tower_usage_guard::ManagedGuardLayer;
use tracing_subscriber::EnvFilter;
use usage_guard::GuardOptions;
use usage_guard::GuardRegistry;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. One registry for the process, handed to each route explicitly
    let registry = GuardRegistry::new();

    let ingest = registry.get_or_create(
        &GuardOptions::new("usage-ingest")
            .with_max_inflight_keys(["USAGE_INGEST_MAX_INFLIGHT", "USAGE_MAX_INFLIGHT"])
            .with_retry_after_keys(["USAGE_INGEST_RETRY_AFTER_MS", "USAGE_RETRY_AFTER_MS"]),
    )?;
    let summary = registry.get_or_create(
        &GuardOptions::new("usage-summary")
            .with_max_inflight_keys(["USAGE_SUMMARY_MAX_INFLIGHT", "USAGE_MAX_INFLIGHT"])
            .with_retry_after_keys(["USAGE_RETRY_AFTER_MS"]),
    )?;

    // 2. Build the Router, one guard per API surface
    let app = Router::new()
        .route(
            "/usage",
            post(record_usage).layer(
                ServiceBuilder::new()
                    // 1. The outermost layer: catches BoxError and returns Response
                    .layer(HandleErrorLayer::new(handle_guard_error))
                    // 2. The middle layer: introduces BoxError
                    .layer(ManagedGuardLayer::<_, Request>::new(
                        ingest,
                        Duration::from_secs(10),
                    ))
                    // 3. Converts the route's Infallible to BoxError so the guard can wrap it
                    .map_err(BoxError::from),
            ),
        )
        .route(
            "/usage/summary",
            get(usage_summary).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_guard_error))
                    .layer(ManagedGuardLayer::<_, Request>::new(
                        summary,
                        Duration::from_secs(5),
                    ))
                    .map_err(BoxError::from),
            ),
        );

    // 3. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await?;
    Ok(())
}

/// The signature must match BoxError -> IntoResponse
///
/// Saturation becomes 429 with `Retry-After` and `retry-after-ms` headers.
async fn handle_guard_error(err: BoxError) -> impl IntoResponse {
    if let Some(guard_err) = err.downcast_ref::<GuardError>() {
        guard_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}

async fn record_usage(body: String) -> impl IntoResponse {
    // Simulate a write against the shared usage store
    tokio::time::sleep(Duration::from_millis(200)).await;
    (StatusCode::ACCEPTED, format!("recorded {} bytes", body.len()))
}

async fn usage_summary() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(50)).await;
    "{\"events\": 0}"
}
