//! Input/output helpers.
//!
//! - staged CSV ingest + synonym resolution (`ingest`)
//! - artifact exports (CSV/JSON) (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
