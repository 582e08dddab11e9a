//! Database initialization
//!
//! Opens (or creates) the canonical entity store and creates the schema
//! idempotently. All uniqueness guarantees the reconciler relies on live
//! here as table constraints, not application locks.

pub mod init;

pub use init::init_database;
