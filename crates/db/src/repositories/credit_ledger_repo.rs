//! Repository for the append-only `credit_ledger` table.

use sqlx::{PgConnection, PgPool};

use crate::models::credit_ledger::{CreditLedgerEntry, NewLedgerEntry};

/// Column list for `credit_ledger` queries.
const COLUMNS: &str = "id, user_id, delta, reason, source, external_id, created_at";

/// Provides ledger appends and lookups. Rows are never updated or deleted.
pub struct CreditLedgerRepo;

impl CreditLedgerRepo {
    /// Whether a row with this `(source, external_id)` already exists.
    pub async fn exists(
        conn: &mut PgConnection,
        source: &str,
        external_id: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM credit_ledger WHERE source = $1 AND external_id = $2)",
        )
        .bind(source)
        .bind(external_id)
        .fetch_one(conn)
        .await
    }

    /// Append a row.
    pub async fn insert(
        conn: &mut PgConnection,
        entry: &NewLedgerEntry<'_>,
    ) -> Result<CreditLedgerEntry, sqlx::Error> {
        let query = format!(
            "INSERT INTO credit_ledger (user_id, delta, reason, source, external_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CreditLedgerEntry>(&query)
            .bind(entry.user_id)
            .bind(entry.delta)
            .bind(entry.reason)
            .bind(entry.source)
            .bind(entry.external_id)
            .fetch_one(conn)
            .await
    }

    /// All rows recorded for one `(source, external_id)`.
    pub async fn list_by_external_id(
        pool: &PgPool,
        source: &str,
        external_id: &str,
    ) -> Result<Vec<CreditLedgerEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM credit_ledger \
             WHERE source = $1 AND external_id = $2 \
             ORDER BY id"
        );
        sqlx::query_as::<_, CreditLedgerEntry>(&query)
            .bind(source)
            .bind(external_id)
            .fetch_all(pool)
            .await
    }
}
