//! Due-reminder poller.
//!
//! Each cycle finds reminders whose due time has passed, resolves every
//! recipient's delivery channels, claims the reminder and publishes one
//! notification envelope on the queue. Reminders nobody can receive are
//! short-circuited to `error-no-subscription` without touching the queue.
//!
//! The claim write and the recipient/channel reads are separate statements;
//! a recipient added between them is simply not notified for this firing.
//! Claiming flips the status to `pending`, so the next cycle's `waiting`
//! query naturally skips anything already in flight.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinSet;

use relay_common::error::AppError;
use relay_common::queue::NotificationQueue;
use relay_common::types::{
    NotificationEntry, NotificationEnvelope, PushNotification, Reminder, ReminderStatus,
    Subscription,
};
use relay_store::reminders::ReminderStore;
use relay_store::subscriptions::SubscriptionStore;
use relay_store::users::UserStore;

/// Scheduler driving the discovery side of the notification pipeline.
/// Owns its store pool and queue handle for the life of the service.
pub struct ReminderPoller {
    pool: PgPool,
    queue: NotificationQueue,
    poll_interval: Duration,
}

/// Delivery channels resolved for one recipient.
struct ResolvedRecipient {
    user_id: i64,
    subscription: Option<Subscription>,
    phone_number: Option<String>,
}

impl ResolvedRecipient {
    fn is_unreachable(&self) -> bool {
        self.subscription.is_none() && self.phone_number.is_none()
    }
}

/// How one reminder's pipeline ended, short of an error.
enum DispatchOutcome {
    /// Claimed and published with this many notification entries.
    Published { entries: usize },
    /// Every recipient was unreachable; nothing was published.
    NobodyReachable,
}

impl ReminderPoller {
    pub fn new(pool: PgPool, queue: NotificationQueue, poll_interval_ms: u64) -> Self {
        Self {
            pool,
            queue,
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }

    /// Run the poll loop until `shutdown` flips. The cycle in progress is
    /// always finished before returning, so claimed reminders are never
    /// abandoned mid-flight.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Reminder poller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now().timestamp_millis();
                    if let Err(e) = self.poll_once(now).await {
                        // Store or queue outage; skip this cycle and retry on the next tick.
                        tracing::error!(error = %e, "Poll cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A closed channel means the process is going away too.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reminder poller stopped");
        Ok(())
    }

    /// One poll cycle against a fixed clock. Public so tests can drive
    /// cycles deterministically.
    pub async fn poll_once(&mut self, now: i64) -> Result<(), AppError> {
        let due = ReminderStore::find_due(&self.pool, now).await?;

        if due.is_empty() {
            tracing::debug!(now, "No due reminders");
            return Ok(());
        }

        tracing::info!(count = due.len(), now, "Found due reminders");

        let mut tasks = JoinSet::new();
        for reminder in due {
            let pool = self.pool.clone();
            let queue = self.queue.clone();
            tasks.spawn(process_reminder(pool, queue, reminder));
        }

        // One reminder failing must not abort the others; each task has
        // already reconciled its own reminder's status before returning.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Reminder task panicked");
            }
        }

        Ok(())
    }
}

/// Pipeline for a single due reminder. Failures are contained here: on any
/// error the reminder is moved to `error` instead of sticking in `pending`.
async fn process_reminder(pool: PgPool, mut queue: NotificationQueue, reminder: Reminder) {
    let reminder_id = reminder.id;

    match dispatch_reminder(&pool, &mut queue, reminder).await {
        Ok(DispatchOutcome::Published { entries }) => {
            tracing::info!(reminder_id, entries, "Envelope published");
        }
        Ok(DispatchOutcome::NobodyReachable) => {
            tracing::warn!(reminder_id, "No recipient has any delivery channel");
        }
        Err(e) => {
            tracing::error!(reminder_id, error = %e, "Reminder pipeline failed");
            if let Err(e) = ReminderStore::set_status(&pool, reminder_id, ReminderStatus::Error).await
            {
                tracing::error!(reminder_id, error = %e, "Could not record reminder failure");
            }
        }
    }
}

/// Resolve channels, then claim and publish — or close the reminder out as
/// `error-no-subscription` when there is nobody to notify.
async fn dispatch_reminder(
    pool: &PgPool,
    queue: &mut NotificationQueue,
    reminder: Reminder,
) -> Result<DispatchOutcome, AppError> {
    let recipients = ReminderStore::recipients(pool, reminder.id).await?;

    let mut resolved = Vec::with_capacity(recipients.len());
    for user in recipients {
        let subscription = SubscriptionStore::find_for_user(pool, user.id).await?;
        let phone_number = UserStore::phone_number(pool, user.id).await?;
        resolved.push(ResolvedRecipient {
            user_id: user.id,
            subscription,
            phone_number,
        });
    }

    let entries = build_entries(&reminder, resolved);
    if entries.is_empty() {
        // Nobody can receive this reminder. Don't claim it, close it out.
        ReminderStore::set_status(pool, reminder.id, ReminderStatus::ErrorNoSubscription).await?;
        return Ok(DispatchOutcome::NobodyReachable);
    }

    // Claim before publishing so the next cycle no longer sees the reminder
    // as waiting. Anything failing after this point moves it to `error`.
    ReminderStore::set_status(pool, reminder.id, ReminderStatus::Pending).await?;

    let count = entries.len();
    let envelope = NotificationEnvelope {
        reminder,
        notifications: entries,
    };
    queue.publish(&envelope).await?;

    Ok(DispatchOutcome::Published { entries: count })
}

/// One notification entry per reachable channel. A recipient with both a
/// subscription and a phone number yields two entries; a recipient with
/// neither yields none.
fn build_entries(reminder: &Reminder, recipients: Vec<ResolvedRecipient>) -> Vec<NotificationEntry> {
    let body = sms_body(reminder);
    let mut entries = Vec::new();

    for recipient in recipients {
        if recipient.is_unreachable() {
            tracing::debug!(
                reminder_id = reminder.id,
                user_id = recipient.user_id,
                "Recipient has no delivery channel"
            );
            continue;
        }

        if let Some(subscription) = recipient.subscription {
            entries.push(NotificationEntry::push(PushNotification::from(subscription)));
        }
        if let Some(number) = recipient.phone_number {
            entries.push(NotificationEntry::sms(number, body.clone()));
        }
    }

    entries
}

/// Text body for SMS recipients, e.g. `Reminder: attend meeting at 14:05 UTC`.
fn sms_body(reminder: &Reminder) -> String {
    let due = Utc
        .timestamp_millis_opt(reminder.due)
        .single()
        .unwrap_or_else(Utc::now);

    format!("Reminder: {} at {}", reminder.action, due.format("%H:%M UTC"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_reminder() -> Reminder {
        Reminder {
            id: 1,
            action: "attend important meeting".to_string(),
            due: 1_754_000_000_000,
            created: 1_753_900_000_000,
            status: ReminderStatus::Waiting,
        }
    }

    fn make_subscription(user_id: i64) -> Subscription {
        Subscription {
            id: user_id * 10,
            user_id,
            title: Some("Firefox on Linux".to_string()),
            endpoint: format!("https://push.example/user-{user_id}"),
            p256dh: "pub_key".to_string(),
            auth: "auth_secret".to_string(),
        }
    }

    fn recipient(
        user_id: i64,
        subscription: Option<Subscription>,
        phone_number: Option<&str>,
    ) -> ResolvedRecipient {
        ResolvedRecipient {
            user_id,
            subscription,
            phone_number: phone_number.map(str::to_string),
        }
    }

    #[test]
    fn test_recipient_with_both_channels_yields_two_entries() {
        let reminder = make_reminder();
        let entries = build_entries(
            &reminder,
            vec![recipient(2, Some(make_subscription(2)), Some("2123456789"))],
        );

        assert_eq!(entries.len(), 2);
        assert!(entries[0].subscription.is_some());
        assert!(entries[1].sms.is_some());
    }

    #[test]
    fn test_partial_channel_recipients() {
        let reminder = make_reminder();
        let entries = build_entries(
            &reminder,
            vec![
                recipient(2, Some(make_subscription(2)), None),
                recipient(3, None, Some("2123456789")),
            ],
        );

        assert_eq!(entries.len(), 2);
        let push = entries.iter().find(|e| e.subscription.is_some()).unwrap();
        assert_eq!(push.subscription.as_ref().unwrap().user_id, 2);
        let sms = entries.iter().find(|e| e.sms.is_some()).unwrap();
        assert_eq!(sms.sms.as_ref().unwrap().target, "2123456789");
    }

    #[test]
    fn test_unreachable_recipients_are_skipped_not_fatal() {
        let reminder = make_reminder();
        let entries = build_entries(
            &reminder,
            vec![
                recipient(2, None, None),
                recipient(3, Some(make_subscription(3)), None),
            ],
        );

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subscription.as_ref().unwrap().user_id, 3);
    }

    #[test]
    fn test_all_unreachable_yields_no_entries() {
        let reminder = make_reminder();
        let entries = build_entries(
            &reminder,
            vec![recipient(2, None, None), recipient(3, None, None)],
        );

        assert!(entries.is_empty());
    }

    #[test]
    fn test_zero_recipients_yields_no_entries() {
        let entries = build_entries(&make_reminder(), Vec::new());
        assert!(entries.is_empty());
    }

    #[test]
    fn test_sms_body_mentions_action_and_time() {
        let body = sms_body(&make_reminder());
        assert!(body.contains("attend important meeting"));
        assert!(body.ends_with("UTC"));
    }
}
