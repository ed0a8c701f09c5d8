//! Read API surface for the dashboard.

pub mod movers;

use crate::store::RadarStore;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct ApiState {
    pub store: RadarStore,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/movers", get(movers::get_movers))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

async fn healthz(State(state): State<ApiState>) -> Json<Value> {
    let latest_tick = state.store.latest_delta_tick().ok().flatten();
    Json(json!({
        "status": "ok",
        "latest_tick": latest_tick,
    }))
}
