//! Pure domain logic for the plangen task queue.
//!
//! Nothing in this crate touches the database or the network. The worker
//! and db crates build on these types so the rules they enforce (outcome
//! classification, billing arithmetic, cancellation decisions, bounded
//! retries) can be unit tested in isolation.

pub mod artifacts;
pub mod billing;
pub mod cancellation;
pub mod context;
pub mod error;
pub mod retry;
pub mod types;
