//! Canonical entity store access
//!
//! Row types and queries for the three canonical entities plus the per-source
//! ingestion watermark. All functions are generic over the executor so the
//! reconciler can run them inside a single per-record transaction.

pub mod leads;
pub mod source_records;
pub mod vehicles;
pub mod watermarks;

pub use leads::Lead;
pub use source_records::SourceRecord;
pub use vehicles::Vehicle;
