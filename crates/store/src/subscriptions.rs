//! Web-push subscription store operations.

use sqlx::PgPool;

use relay_common::error::AppError;
use relay_common::types::Subscription;

/// DAO for the `subscriptions` table.
pub struct SubscriptionStore;

impl SubscriptionStore {
    /// The user's web-push registration, when present.
    ///
    /// Endpoints are unique, and a user re-registering from the same browser
    /// replaces their row, so one row per user is the expected shape.
    pub async fn find_for_user(
        pool: &PgPool,
        user_id: i64,
    ) -> Result<Option<Subscription>, AppError> {
        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1 LIMIT 1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;

        Ok(subscription)
    }

    /// Remove a subscription whose endpoint the push provider reported gone.
    ///
    /// Idempotent: a duplicate envelope delivery may race another dispatcher
    /// to the same row, and losing that race is fine.
    pub async fn delete(pool: &PgPool, subscription_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(subscription_id, "Subscription already deleted");
        } else {
            tracing::info!(subscription_id, "Subscription deleted");
        }

        Ok(())
    }
}
