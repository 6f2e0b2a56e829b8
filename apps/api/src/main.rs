use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use changefeed_cell::{ChangeHub, ChangefeedBridge, HubTransport};
use queue_sync_cell::{
    QueueBroker, QueueSyncState, RoomRegistry, SupabaseQueueStore,
};
use shared_config::AppConfig;
use shared_database::SupabaseClient;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic queue sync server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Wire the core explicitly: store feeds the change hub, the bridge
    // watches the hub, the broker routes over the room registry. All of it
    // is constructed here once and injected, torn down on shutdown.
    let supabase = Arc::new(SupabaseClient::new(&config));
    let hub = Arc::new(ChangeHub::new(config.realtime.room_buffer_size));
    let transport = Arc::new(HubTransport::new(Arc::clone(&hub)));
    let bridge = ChangefeedBridge::new(transport, config.realtime.clone());

    let store = Arc::new(SupabaseQueueStore::new(supabase, Arc::clone(&hub)));
    let rooms = Arc::new(RoomRegistry::new(config.realtime.room_buffer_size));
    let broker = Arc::new(QueueBroker::new(store, rooms, config.realtime.clone()));

    let state = Arc::new(QueueSyncState {
        config: Arc::clone(&config),
        broker,
        feed_status: bridge.status(),
    });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(bridge))
        .await
        .unwrap();
}

async fn shutdown_signal(bridge: Arc<ChangefeedBridge>) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("Shutdown signal received");
    bridge.shutdown();
}
