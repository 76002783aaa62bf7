//! Reminder store operations used by the scheduler and dispatcher.

use sqlx::PgPool;

use relay_common::error::AppError;
use relay_common::types::{Reminder, ReminderStatus, UserRef};

/// DAO for the `reminders` table and its recipient bindings.
pub struct ReminderStore;

impl ReminderStore {
    /// All reminders that are due at `now` (epoch ms, inclusive) and still
    /// waiting. Claimed or settled reminders are never returned.
    pub async fn find_due(pool: &PgPool, now: i64) -> Result<Vec<Reminder>, AppError> {
        let reminders: Vec<Reminder> =
            sqlx::query_as("SELECT * FROM reminders WHERE due <= $1 AND status = 'waiting'")
                .bind(now)
                .fetch_all(pool)
                .await?;

        Ok(reminders)
    }

    /// Unconditional status write. Fails when the reminder does not exist.
    pub async fn set_status(
        pool: &PgPool,
        id: i64,
        status: ReminderStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE reminders SET status = $1 WHERE id = $2")
            .bind(status.to_string())
            .bind(id)
            .execute(pool)
            .await?;

        match result.rows_affected() {
            1 => {
                tracing::debug!(reminder_id = id, status = %status, "Reminder status set");
                Ok(())
            }
            0 => Err(AppError::NotFound(format!("reminder {id} not found"))),
            n => Err(AppError::Inconsistent(format!(
                "status update for reminder {id} touched {n} rows"
            ))),
        }
    }

    /// Conditional status write that never downgrades a terminal error.
    ///
    /// A late `done` arriving after another dispatcher marked the reminder
    /// `error` or `error-no-subscription` must not win; the update applies
    /// only when the current status is not an error status. Touching zero
    /// rows is not an error here: either the reminder vanished or an error
    /// status already holds, and in both cases the write must be a no-op.
    pub async fn set_status_if_not_error(
        pool: &PgPool,
        id: i64,
        status: ReminderStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE reminders SET status = $1
             WHERE id = $2 AND status NOT IN ('error', 'error-no-subscription')",
        )
        .bind(status.to_string())
        .bind(id)
        .execute(pool)
        .await?;

        match result.rows_affected() {
            0 | 1 => Ok(()),
            n => Err(AppError::Inconsistent(format!(
                "conditional status update for reminder {id} touched {n} rows"
            ))),
        }
    }

    /// Users bound to a reminder as recipients.
    pub async fn recipients(pool: &PgPool, reminder_id: i64) -> Result<Vec<UserRef>, AppError> {
        let users: Vec<UserRef> = sqlx::query_as(
            r#"
            SELECT u.id, u.forename
            FROM users u
            JOIN user_reminders ur ON ur.user_id = u.id
            WHERE ur.reminder_id = $1
            "#,
        )
        .bind(reminder_id)
        .fetch_all(pool)
        .await?;

        Ok(users)
    }
}
