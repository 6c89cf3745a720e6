//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` entity struct matching the database
//! row and, where rows are created from this side, a create DTO.

pub mod credit_ledger;
pub mod status;
pub mod task;
pub mod user;
pub mod worker_heartbeat;
