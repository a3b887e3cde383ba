use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rudis::rdb;
use rudis::server::{ServerConfig, SharedServer};

/// Entry point: parse configuration, restore the snapshot, serve until
/// ctrl-c, then persist the snapshot.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match ServerConfig::new(std::env::args()) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "failed to parse command line arguments");
            return ExitCode::FAILURE;
        }
    };

    let server = Arc::new(SharedServer::new(config));

    if server.config.snapshot_path.exists() {
        match rdb::load_snapshot(&server.config.snapshot_path, &server.keyspace).await {
            Ok(()) => info!(
                path = %server.config.snapshot_path.display(),
                "snapshot restored"
            ),
            Err(error) => warn!(%error, "failed to restore snapshot, starting empty"),
        }
    }

    tokio::select! {
        result = Arc::clone(&server).run() => {
            if let Err(error) = result {
                error!(%error, "failed to start server");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    if let Err(error) = rdb::save_snapshot(&server.config.snapshot_path, &server.keyspace).await {
        error!(%error, "failed to save snapshot");
    }

    ExitCode::SUCCESS
}
