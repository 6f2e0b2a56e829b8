use std::sync::Arc;

use axum::{routing::get, Router};

use queue_sync_cell::{create_queue_sync_router, QueueSyncState};

pub fn create_router(state: Arc<QueueSyncState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic queue sync API is running!" }))
        .nest("/queue-sync", create_queue_sync_router(state))
}
