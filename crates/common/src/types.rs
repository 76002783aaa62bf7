use serde::{Deserialize, Serialize};

/// Delivery lifecycle of a reminder.
///
/// `waiting` → `pending` (claimed by the scheduler, envelope published) →
/// `done` | `error`, with `error-no-subscription` set directly from
/// `waiting` when no recipient has any delivery channel. The two error
/// states are terminal and are never overwritten by a late `done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ReminderStatus {
    Waiting,
    Pending,
    Done,
    Error,
    ErrorNoSubscription,
}

impl ReminderStatus {
    /// Terminal error states guarded by the non-regressing status write.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ReminderStatus::Error | ReminderStatus::ErrorNoSubscription
        )
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderStatus::Waiting => write!(f, "waiting"),
            ReminderStatus::Pending => write!(f, "pending"),
            ReminderStatus::Done => write!(f, "done"),
            ReminderStatus::Error => write!(f, "error"),
            ReminderStatus::ErrorNoSubscription => write!(f, "error-no-subscription"),
        }
    }
}

/// A reminder row. Created by the CRUD layer; the core only ever mutates
/// `status`. `due` and `created` are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reminder {
    pub id: i64,
    pub action: String,
    pub due: i64,
    pub created: i64,
    pub status: ReminderStatus,
}

/// A recipient bound to a reminder. Read-only input to the core.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRef {
    pub id: i64,
    pub forename: String,
}

/// A web-push registration row. At most one per endpoint; removed by the
/// dispatcher when the provider reports the endpoint gone.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

/// The message published on the transport for one reminder firing:
/// the reminder itself plus one notification entry per reachable channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub reminder: Reminder,
    pub notifications: Vec<NotificationEntry>,
}

/// One notification entry: either a web-push target or an SMS target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<PushNotification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms: Option<SmsNotification>,
}

impl NotificationEntry {
    pub fn push(subscription: PushNotification) -> Self {
        Self {
            subscription: Some(subscription),
            sms: None,
        }
    }

    pub fn sms(target: String, body: String) -> Self {
        Self {
            subscription: None,
            sms: Some(SmsNotification { target, body }),
        }
    }
}

/// Web-push target as it travels in an envelope. Carries the subscription
/// row id so a dispatcher can delete the row on a gone signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub subscription: WebPushSubscription,
}

/// The browser-issued push registration: endpoint plus encryption keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// SMS target: destination number and the rendered message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsNotification {
    pub target: String,
    pub body: String,
}

impl From<Subscription> for PushNotification {
    fn from(row: Subscription) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            subscription: WebPushSubscription {
                endpoint: row.endpoint,
                keys: SubscriptionKeys {
                    p256dh: row.p256dh,
                    auth: row.auth,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&ReminderStatus::ErrorNoSubscription).unwrap();
        assert_eq!(json, "\"error-no-subscription\"");
        let back: ReminderStatus = serde_json::from_str("\"waiting\"").unwrap();
        assert_eq!(back, ReminderStatus::Waiting);
    }

    #[test]
    fn test_error_states_are_terminal() {
        assert!(ReminderStatus::Error.is_error());
        assert!(ReminderStatus::ErrorNoSubscription.is_error());
        assert!(!ReminderStatus::Done.is_error());
        assert!(!ReminderStatus::Pending.is_error());
    }

    #[test]
    fn test_sms_entry_omits_subscription_key() {
        let entry = NotificationEntry::sms("2123456789".to_string(), "body".to_string());
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("subscription").is_none());
        assert_eq!(value["sms"]["target"], "2123456789");
    }

    #[test]
    fn test_push_entry_wire_shape() {
        let row = Subscription {
            id: 7,
            user_id: 3,
            title: Some("Firefox on Linux".to_string()),
            endpoint: "https://push.example/ep".to_string(),
            p256dh: "pub".to_string(),
            auth: "secret".to_string(),
        };
        let entry = NotificationEntry::push(PushNotification::from(row));
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("sms").is_none());
        assert_eq!(value["subscription"]["userId"], 3);
        assert_eq!(
            value["subscription"]["subscription"]["keys"]["p256dh"],
            "pub"
        );
    }
}
