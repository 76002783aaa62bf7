//! User rows the core reads. Lifecycle is owned by the CRUD layer.

use sqlx::PgPool;

use relay_common::error::AppError;

/// DAO for the `users` table.
pub struct UserStore;

impl UserStore {
    /// A user's SMS phone number, when they registered one.
    pub async fn phone_number(pool: &PgPool, user_id: i64) -> Result<Option<String>, AppError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT phone_number FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;

        Ok(row.and_then(|(number,)| number))
    }
}
