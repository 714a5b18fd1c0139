use std::sync::Arc;

use dotenv::dotenv;
use relaychat_server::db::{ChatStore, SqliteStore};
use relaychat_server::{ChatServer, Settings};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> relaychat_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully");

    let store: Arc<dyn ChatStore> =
        Arc::new(SqliteStore::connect(&config.database.url, config.database.max_connections).await?);
    info!(url = %config.database.url, "Database ready");

    let server = ChatServer::new(&config, store);
    let liveness = server.spawn_liveness();

    let listener =
        TcpListener::bind(format!("{}:{}", config.server.host, config.server.port)).await?;
    info!(
        "Chat server ready to accept connections at ws://{}:{}/",
        config.server.host, config.server.port
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(server.clone().handle_connection(stream, addr));
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    liveness.abort();
    server.shutdown().await;
    Ok(())
}
