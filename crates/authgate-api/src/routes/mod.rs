use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

pub mod auth;

use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    providers: usize,
    store: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        providers: state.gateway.providers.len(),
        store: state.gateway.store.name().to_string(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
}
