use std::sync::Arc;
use tracing::info;

mod api;
mod attachments;
mod bus;
mod chat;
mod entity;
mod error;
mod gate;
mod manager;
mod monitor;
mod payments;
mod reconciler;
mod schedule;
mod session;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file; missing is fine.
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Tutorhub coordinator starting...");

    let bus = Arc::new(bus::EventBus::new());

    // Store lives at ~/.tutorhub/tutorhub.db unless overridden.
    let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    let db_path = match std::env::var("TUTORHUB_DB") {
        Ok(p) => std::path::PathBuf::from(p),
        Err(_) => std::path::Path::new(&home_dir)
            .join(".tutorhub")
            .join("tutorhub.db"),
    };

    info!("Initializing store at {}", db_path.display());
    let store = store::Store::new(&db_path).await?;
    store.init().await?;

    let port: u16 = std::env::var("TUTORHUB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    // Uploaded files live next to the database unless overridden, and are
    // served back under /files on the same listener.
    let data_dir = match std::env::var("TUTORHUB_DATA_DIR") {
        Ok(p) => std::path::PathBuf::from(p),
        Err(_) => std::path::Path::new(&home_dir).join(".tutorhub").join("files"),
    };
    let public_base = std::env::var("TUTORHUB_PUBLIC_URL")
        .unwrap_or_else(|_| format!("http://localhost:{port}"));
    let files = Arc::new(attachments::LocalBucket::new(data_dir, public_base));

    let manager = Arc::new(manager::Manager::new(
        store.clone(),
        bus.clone(),
        files.clone(),
    ));

    // Session monitor runs in the background against every active room, and
    // the live feed keeps open-room timelines in step with the bus.
    let monitor_handle = tokio::spawn(manager.clone().run_monitor());
    let feed_handle = tokio::spawn(manager.clone().run_live_feed());

    // Payment functions are optional; without a gateway the checkout
    // endpoints answer 503.
    let payments = match std::env::var("PAYMENTS_BASE_URL") {
        Ok(base) => Some(payments::PaymentsClient::new(
            base,
            store.clone(),
            bus.clone(),
        )?),
        Err(_) => {
            info!("No PAYMENTS_BASE_URL set, checkout endpoints disabled.");
            None
        }
    };

    let api = api::server::ApiServer::new(manager, store, bus, files, payments);
    let app = api.router();

    info!("Starting API server on port {}", port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = monitor_handle => {
            info!("Session monitor stopped unexpectedly");
        }
        _ = feed_handle => {
            info!("Live feed stopped unexpectedly");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
