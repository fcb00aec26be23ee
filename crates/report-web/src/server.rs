//! Axum router assembly for the admission API. Headless: there is no
//! dashboard to serve, unlike the teacher's UI-bearing control plane.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::jobs;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/api/jobs/:id", get(jobs::get_job))
        .route("/api/jobs/:id/cancel", post(jobs::cancel_job))
        .route(
            "/api/health",
            get(|| async {
                axum::Json(serde_json::json!({
                    "status": "ok",
                    "service": "report-web",
                }))
            }),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(state: AppState, addr: &str) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "report-web listening");
    axum::serve(listener, app).await
}
