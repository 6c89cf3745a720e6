//! Append-only credit ledger models.

use plangen_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `credit_ledger` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditLedgerEntry {
    pub id: DbId,
    pub user_id: DbId,
    pub delta: i64,
    pub reason: String,
    pub source: String,
    pub external_id: Option<String>,
    pub created_at: Timestamp,
}

/// DTO for appending a ledger row.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry<'a> {
    pub user_id: DbId,
    pub delta: i64,
    pub reason: &'a str,
    pub source: &'a str,
    pub external_id: Option<&'a str>,
}
