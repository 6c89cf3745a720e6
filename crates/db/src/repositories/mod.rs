//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or `&mut PgConnection` inside a transaction) as the
//! first argument.

pub mod credit_ledger_repo;
pub mod task_repo;
pub mod user_repo;
pub mod worker_heartbeat_repo;

pub use credit_ledger_repo::CreditLedgerRepo;
pub use task_repo::{StateTransition, TaskRepo};
pub use user_repo::UserRepo;
pub use worker_heartbeat_repo::WorkerHeartbeatRepo;
