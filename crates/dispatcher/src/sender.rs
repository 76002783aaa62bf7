//! Envelope consumer and delivery reconciliation.
//!
//! Consumes one envelope at a time, attempts every notification entry in
//! parallel and settles the reminder's terminal status from the aggregate:
//! every entry delivered or resolved gone → `done`, anything else → `error`.
//! Redelivery of the same reminder is tolerated: `done` goes through the
//! non-regressing store write, so a stale success can never overwrite a
//! terminal error, and gone-subscription deletes are no-ops the second time.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinSet;

use relay_channels::{ChannelError, PushChannel, TwilioSender};
use relay_common::error::AppError;
use relay_common::queue::NotificationQueue;
use relay_common::types::{NotificationEntry, NotificationEnvelope, ReminderStatus};
use relay_store::reminders::ReminderStore;
use relay_store::subscriptions::SubscriptionStore;

/// Queue poll timeout, which is also how often shutdown is observed.
const POP_TIMEOUT_SECS: f64 = 1.0;

/// Outcome of one delivery attempt for one notification entry.
#[derive(Debug)]
enum EntryOutcome {
    /// The provider accepted the notification.
    Delivered,
    /// The push endpoint is permanently gone. The subscription row must be
    /// removed, but the entry is resolved without error.
    Gone { subscription_id: i64 },
    /// Hard failure for this entry.
    Failed(String),
}

/// Dispatcher instance. Several may run against the same queue; each
/// consumes one envelope at a time.
pub struct NotificationSender {
    pool: PgPool,
    push: Arc<dyn PushChannel>,
    sms: Option<Arc<TwilioSender>>,
}

impl NotificationSender {
    pub fn new(pool: PgPool, push: Arc<dyn PushChannel>, sms: Option<TwilioSender>) -> Self {
        Self {
            pool,
            push,
            sms: sms.map(Arc::new),
        }
    }

    /// Consume envelopes until `shutdown` flips. The envelope in flight is
    /// always fully settled before returning.
    pub async fn run(
        &self,
        mut queue: NotificationQueue,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        tracing::info!("Notification sender started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match queue.pop(POP_TIMEOUT_SECS).await {
                Ok(Some(envelope)) => self.deliver_envelope(envelope).await,
                Ok(None) => {} // timeout; loop around to re-check shutdown
                Err(e) => {
                    tracing::error!(error = %e, "Queue read failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        tracing::info!("Notification sender stopped");
        Ok(())
    }

    /// Deliver every entry of one envelope and settle the reminder status.
    /// Never returns an error: failures are logged and recorded on the
    /// reminder, so a poison envelope cannot take the consumer loop down.
    pub async fn deliver_envelope(&self, envelope: NotificationEnvelope) {
        let reminder_id = envelope.reminder.id;
        let entry_count = envelope.notifications.len();

        tracing::debug!(reminder_id, entries = entry_count, "Delivering envelope");

        // The push payload is the reminder itself, shown by the service
        // worker on the receiving browser.
        let payload = match serde_json::to_vec(&envelope.reminder) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(reminder_id, error = %e, "Unencodable reminder payload");
                self.settle(reminder_id, ReminderStatus::Error).await;
                return;
            }
        };

        let mut tasks: JoinSet<EntryOutcome> = JoinSet::new();
        for (index, entry) in envelope.notifications.into_iter().enumerate() {
            let push = Arc::clone(&self.push);
            let sms = self.sms.clone();
            let payload = payload.clone();
            tasks.spawn(async move { send_entry(push, sms, payload, index, entry).await });
        }

        let mut outcomes = Vec::with_capacity(entry_count);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(EntryOutcome::Failed(format!(
                    "delivery task panicked: {e}"
                ))),
            }
        }

        self.reconcile(reminder_id, outcomes).await;
    }

    /// Settle the reminder from the per-entry outcomes: delete gone
    /// subscriptions, then write the terminal status.
    async fn reconcile(&self, reminder_id: i64, outcomes: Vec<EntryOutcome>) {
        for outcome in &outcomes {
            match outcome {
                EntryOutcome::Gone { subscription_id } => {
                    tracing::info!(reminder_id, subscription_id, "Removing gone subscription");
                    if let Err(e) = SubscriptionStore::delete(&self.pool, *subscription_id).await {
                        tracing::error!(
                            reminder_id,
                            subscription_id,
                            error = %e,
                            "Could not delete gone subscription"
                        );
                    }
                }
                EntryOutcome::Failed(reason) => {
                    tracing::error!(reminder_id, reason = %reason, "Notification entry failed");
                }
                EntryOutcome::Delivered => {}
            }
        }

        self.settle(reminder_id, settled_status(&outcomes)).await;
    }

    async fn settle(&self, reminder_id: i64, status: ReminderStatus) {
        let result = match status {
            // Non-regressing: a terminal error set elsewhere wins over a
            // late or duplicate success.
            ReminderStatus::Done => {
                ReminderStore::set_status_if_not_error(&self.pool, reminder_id, status).await
            }
            _ => ReminderStore::set_status(&self.pool, reminder_id, status).await,
        };

        match result {
            Ok(()) => tracing::info!(reminder_id, status = %status, "Reminder settled"),
            Err(e) => {
                tracing::error!(reminder_id, error = %e, "Could not settle reminder status");
            }
        }
    }
}

/// `done` iff every entry settled without a hard failure; gone endpoints
/// count as resolved.
fn settled_status(outcomes: &[EntryOutcome]) -> ReminderStatus {
    let any_failed = outcomes
        .iter()
        .any(|outcome| matches!(outcome, EntryOutcome::Failed(_)));

    if any_failed {
        ReminderStatus::Error
    } else {
        ReminderStatus::Done
    }
}

/// One delivery attempt for one entry. The adapter's own request timeout
/// bounds the call; there is no extra timeout layer here.
async fn send_entry(
    push: Arc<dyn PushChannel>,
    sms: Option<Arc<TwilioSender>>,
    payload: Vec<u8>,
    index: usize,
    entry: NotificationEntry,
) -> EntryOutcome {
    if let Some(notification) = entry.subscription {
        let subscription_id = notification.id;
        return match push.send(&notification.subscription, &payload).await {
            Ok(()) => EntryOutcome::Delivered,
            Err(ChannelError::Gone) => EntryOutcome::Gone { subscription_id },
            Err(e) => EntryOutcome::Failed(format!("web-push: {e}")),
        };
    }

    if let Some(sms_notification) = entry.sms {
        let Some(sender) = sms else {
            return EntryOutcome::Failed(
                "sms notification requested but Twilio credentials are not configured".to_string(),
            );
        };
        return match sender.send(&sms_notification.target, &sms_notification.body).await {
            Ok(()) => EntryOutcome::Delivered,
            Err(e) => EntryOutcome::Failed(format!("sms: {e}")),
        };
    }

    EntryOutcome::Failed(format!(
        "entry {index} carries neither a subscription nor an sms payload"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use relay_common::types::{
        PushNotification, SubscriptionKeys, WebPushSubscription,
    };

    /// Push channel stub returning a canned result.
    struct StubPush(Result<(), ChannelError>);

    #[async_trait]
    impl PushChannel for StubPush {
        async fn send(
            &self,
            _subscription: &WebPushSubscription,
            _payload: &[u8],
        ) -> Result<(), ChannelError> {
            self.0.clone()
        }
    }

    fn push_entry(subscription_id: i64) -> NotificationEntry {
        NotificationEntry::push(PushNotification {
            id: subscription_id,
            user_id: 2,
            title: None,
            subscription: WebPushSubscription {
                endpoint: "https://push.example/ep".to_string(),
                keys: SubscriptionKeys {
                    p256dh: "pub".to_string(),
                    auth: "secret".to_string(),
                },
            },
        })
    }

    #[tokio::test]
    async fn test_push_success_is_delivered() {
        let outcome = send_entry(
            Arc::new(StubPush(Ok(()))),
            None,
            Vec::new(),
            0,
            push_entry(7),
        )
        .await;
        assert!(matches!(outcome, EntryOutcome::Delivered));
    }

    #[tokio::test]
    async fn test_gone_endpoint_carries_subscription_id() {
        let outcome = send_entry(
            Arc::new(StubPush(Err(ChannelError::Gone))),
            None,
            Vec::new(),
            0,
            push_entry(7),
        )
        .await;
        assert!(matches!(outcome, EntryOutcome::Gone { subscription_id: 7 }));
    }

    #[tokio::test]
    async fn test_provider_failure_is_hard() {
        let outcome = send_entry(
            Arc::new(StubPush(Err(ChannelError::Provider("503".to_string())))),
            None,
            Vec::new(),
            0,
            push_entry(7),
        )
        .await;
        match outcome {
            EntryOutcome::Failed(reason) => assert!(reason.contains("web-push")),
            other => panic!("expected a hard failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sms_without_credentials_is_hard_failure() {
        let entry = NotificationEntry::sms("2123456789".to_string(), "body".to_string());
        let outcome = send_entry(Arc::new(StubPush(Ok(()))), None, Vec::new(), 0, entry).await;
        match outcome {
            EntryOutcome::Failed(reason) => assert!(reason.contains("not configured")),
            other => panic!("expected a hard failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_entry_is_malformed() {
        let outcome = send_entry(
            Arc::new(StubPush(Ok(()))),
            None,
            Vec::new(),
            3,
            NotificationEntry::default(),
        )
        .await;
        match outcome {
            EntryOutcome::Failed(reason) => assert!(reason.contains("entry 3")),
            other => panic!("expected a hard failure, got {other:?}"),
        }
    }

    #[test]
    fn test_settled_status_all_delivered() {
        let outcomes = vec![EntryOutcome::Delivered, EntryOutcome::Delivered];
        assert_eq!(settled_status(&outcomes), ReminderStatus::Done);
    }

    #[test]
    fn test_settled_status_gone_counts_as_resolved() {
        let outcomes = vec![
            EntryOutcome::Delivered,
            EntryOutcome::Gone { subscription_id: 7 },
        ];
        assert_eq!(settled_status(&outcomes), ReminderStatus::Done);
    }

    #[test]
    fn test_settled_status_one_failure_marks_error() {
        let outcomes = vec![
            EntryOutcome::Delivered,
            EntryOutcome::Failed("boom".to_string()),
        ];
        assert_eq!(settled_status(&outcomes), ReminderStatus::Error);
    }
}
