//! Shared types for the LeadFlow services
//!
//! Canonical domain types, error type, configuration loading, and database
//! initialization used by the lead scoring service.

pub mod config;
pub mod db;
pub mod error;
pub mod model;

pub use error::{Error, Result};
