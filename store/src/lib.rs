//! Durable job ledger, conversation persistence, and state machine
//! enforcement (C5).
//!
//! Backed by SQLite via `rusqlite`; every database file this crate opens
//! is hardened to `0600`/`0700` permissions on Unix before use.

mod job_store;
mod sqlite_security;

pub use job_store::{JobStore, StoreError};
