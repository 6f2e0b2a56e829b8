pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::*;
pub use handlers::QueueSyncState;
pub use models::*;
pub use router::create_queue_sync_router;
pub use services::*;
