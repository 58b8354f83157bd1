use axum::{
    routing::{get, post, put},
    Router,
};

use crate::broker::api;

pub async fn root() -> &'static str {
    "Reader Broker API"
}

pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/users/:user_id/subscription",
            get(api::get_subscription).delete(api::cancel_subscription),
        )
        .route(
            "/api/users/:user_id/subscription/reader",
            put(api::set_reader),
        )
        .route(
            "/api/users/:user_id/subscription/all-access",
            post(api::enable_all_access),
        )
        .route(
            "/api/users/:user_id/assignment",
            get(api::resolve_assignment).post(api::record_assignment),
        )
        .route("/api/readers/:reader_id/split", get(api::calculate_split))
        .route("/api/readers/:reader_id/metrics", get(api::reader_metrics))
        .route("/api/revenue", post(api::record_revenue))
        .route("/api/metrics/platform", get(api::platform_metrics))
}
