//! Database maintenance: prune old messages and print a usage report.

use anyhow::{Context, Result};
use dotenv::dotenv;
use relaychat_server::db::{ChatStore, SqliteStore};
use relaychat_server::Settings;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_target(false)
        .init();

    let config = Settings::new().context("loading configuration")?;
    let store = SqliteStore::connect(&config.database.url, 1)
        .await
        .context("opening database")?;

    let retention_days = i64::from(config.chat.retention_days);
    let removed = store
        .clean_old_messages(retention_days)
        .await
        .context("pruning old messages")?;
    println!("Removed {removed} messages older than {retention_days} days");

    let stats = store.statistics().await.context("reading statistics")?;
    println!(
        "{} users, {} messages ({} today), {} sessions",
        stats.total_users, stats.total_messages, stats.today_messages, stats.total_sessions
    );

    let top = store.top_users(10).await.context("reading top users")?;
    if !top.is_empty() {
        println!("Most active users:");
        for user in top {
            println!(
                "  {:<20} {:>6} messages (last seen {})",
                user.nickname, user.total_messages, user.last_seen
            );
        }
    }

    store
        .log_system("cleanup", &format!("removed {removed} old messages"), None)
        .await
        .context("recording cleanup run")?;

    store.close().await;
    Ok(())
}
