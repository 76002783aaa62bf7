//! ReminderRelay scheduler binary entrypoint.

use relay_common::config::AppConfig;
use relay_common::db;
use relay_common::queue::NotificationQueue;
use relay_common::redis_pool;

use relay_scheduler::poller::ReminderPoller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_scheduler=info,relay_store=info".into()),
        )
        .json()
        .init();

    tracing::info!("ReminderRelay scheduler starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let queue = NotificationQueue::new(redis);

    // Ctrl+C flips the watch channel; the poller finishes the cycle in
    // flight before returning, draining claimed reminders onto the queue.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, finishing current cycle...");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut poller = ReminderPoller::new(pool, queue, config.poll_interval_ms);
    poller.run(shutdown_rx).await?;

    tracing::info!("ReminderRelay scheduler stopped.");
    Ok(())
}
