//! Keycleave - split-key API proxy

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keycleave::{config::Args, db::MongoClient, db::MongoStore, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("keycleave={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Keycleave - split-key API proxy");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!(
        "Default attestation credential: {}",
        if args.apple_jwt_kid.is_some() { "registered" } else { "none" }
    );
    let allowlist = args.destination_allowlist_entries();
    if allowlist.is_empty() {
        info!("Destination allow-list: (open)");
    } else {
        info!("Destination allow-list: {} host(s)", allowlist.len());
    }
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let store = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => match MongoStore::new(&client).await {
            Ok(store) => Some(store),
            Err(e) => {
                error!("Failed to open collections: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, continuing without): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // Build application state (validates the default attestation credential)
    let state = match server::AppState::new(args, store) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup error: {}", e);
            std::process::exit(1);
        }
    };

    // Run the server
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
