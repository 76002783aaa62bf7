//! Redis-backed notification queue connecting the scheduler to dispatchers.
//!
//! Semantics are deliberately best-effort: `LPUSH` on the producer side,
//! `BRPOP` on the consumer side, no acknowledgement and no redelivery.
//! An envelope popped by a dispatcher that dies mid-delivery is lost, and a
//! restarted producer may occasionally publish a duplicate. Consumers must
//! therefore be idempotent with respect to reminder ids.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::AppError;
use crate::types::NotificationEnvelope;

/// Redis list key holding serialized notification envelopes.
const DEFAULT_QUEUE_KEY: &str = "reminders:notifications";

/// Handle to the notification queue. Owned by the scheduler (publish side)
/// or by a dispatcher instance (consume side); created at service start and
/// dropped on shutdown once in-flight work has drained.
#[derive(Clone)]
pub struct NotificationQueue {
    redis: ConnectionManager,
    key: String,
}

impl NotificationQueue {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            key: DEFAULT_QUEUE_KEY.to_string(),
        }
    }

    /// Use a non-default list key. Lets tests isolate their queues.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Publish one envelope. UTF-8 JSON on the wire.
    pub async fn publish(&mut self, envelope: &NotificationEnvelope) -> Result<(), AppError> {
        let payload = serde_json::to_string(envelope)?;
        self.redis.lpush::<_, _, ()>(&self.key, payload).await?;

        tracing::debug!(reminder_id = envelope.reminder.id, "Envelope published");
        Ok(())
    }

    /// Block up to `timeout_secs` waiting for the next envelope.
    ///
    /// Returns `None` on timeout so consumers can interleave shutdown checks
    /// with queue reads.
    pub async fn pop(
        &mut self,
        timeout_secs: f64,
    ) -> Result<Option<NotificationEnvelope>, AppError> {
        let reply: Option<(String, String)> = self.redis.brpop(&self.key, timeout_secs).await?;

        match reply {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Drop every queued envelope. Test setup facility.
    pub async fn clear(&mut self) -> Result<(), AppError> {
        self.redis.del::<_, ()>(&self.key).await?;
        Ok(())
    }
}
