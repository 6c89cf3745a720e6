//! Repository for the `users` table (credit balance only).

use plangen_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::user::{CreateUser, User};

/// Column list for `users` queries.
const COLUMNS: &str = "id, email, credits_balance, created_at";

/// Provides account lookups and balance changes.
pub struct UserRepo;

impl UserRepo {
    /// Insert a user.
    pub async fn create(pool: &PgPool, input: &CreateUser) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (email, credits_balance) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(&input.email)
            .bind(input.credits_balance.unwrap_or(0))
            .fetch_one(pool)
            .await
    }

    /// Find a user by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lock a user row for the rest of the transaction and return its
    /// balance, or `None` if the account does not exist.
    pub async fn lock_balance(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT credits_balance FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Subtract `credits` from the balance. The balance may go negative.
    /// Returns the new balance.
    pub async fn debit(
        conn: &mut PgConnection,
        id: DbId,
        credits: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE users SET credits_balance = credits_balance - $2 \
             WHERE id = $1 \
             RETURNING credits_balance",
        )
        .bind(id)
        .bind(credits)
        .fetch_one(conn)
        .await
    }
}
