mod auth;
mod classify;
mod home;
mod metrics;

use crate::server::SharedState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub fn api_routes(state: &SharedState) -> Router<SharedState> {
    let protected = Router::new()
        .route("/", get(home::home))
        .route("/classify-batch-memory", post(classify::classify_batch_memory))
        .route("/classify-batch-paths", post(classify::classify_batch_paths))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    protected.route("/metrics", get(metrics::metrics_handler))
}
