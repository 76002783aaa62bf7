//! ReminderRelay dispatcher binary entrypoint.
//!
//! Several dispatcher processes may run against the same queue; each one
//! consumes envelopes one at a time.

use std::sync::Arc;

use relay_channels::{TwilioSender, WebPushChannel};
use relay_common::config::AppConfig;
use relay_common::db;
use relay_common::queue::NotificationQueue;
use relay_common::redis_pool;

use relay_dispatcher::sender::NotificationSender;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay_dispatcher=info,relay_channels=info,relay_store=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("ReminderRelay dispatcher starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let queue = NotificationQueue::new(redis);

    if config.vapid_private_key.is_none() {
        tracing::warn!("VAPID private key not configured; push requests will be sent unsigned");
    }
    let push = WebPushChannel::new(config.vapid_private_key.clone())
        .map_err(|e| anyhow::anyhow!("could not create web-push client: {e}"))?;

    let sms = match config.twilio() {
        Some(twilio) => Some(
            TwilioSender::new(twilio)
                .map_err(|e| anyhow::anyhow!("could not create Twilio client: {e}"))?,
        ),
        None => {
            tracing::warn!(
                "Twilio credentials not configured; sms notifications will fail until they are provided"
            );
            None
        }
    };

    // Ctrl+C flips the watch channel; the sender settles the envelope in
    // flight before returning.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, finishing current envelope...");
            let _ = shutdown_tx.send(true);
        }
    });

    let sender = NotificationSender::new(pool, Arc::new(push), sms);
    sender.run(queue, shutdown_rx).await?;

    tracing::info!("ReminderRelay dispatcher stopped.");
    Ok(())
}
