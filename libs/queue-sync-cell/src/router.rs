use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{get_queue_snapshot, health, websocket_handler, QueueSyncState};

pub fn create_queue_sync_router(state: Arc<QueueSyncState>) -> Router {
    let protected_routes = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/queue/{chamber_id}", get(get_queue_snapshot))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .with_state(state)
}
