//! Durable case storage
//!
//! A case's durable representation is its append-only delta log. Any store
//! satisfying the [`CaseStore`] contract works: per-case append ordering,
//! optimistic sequence checking, idempotent replay. The in-memory
//! implementation backs tests; PostgreSQL is the reference durable backend.

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryCaseStore;
pub use postgres::PgCaseStore;
pub use store::{CaseFilter, CaseRecord, CaseStore, StoreError};
