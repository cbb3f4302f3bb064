//! Reporting utilities: residual buckets, effect tables, and formatted
//! terminal output.
//!
//! We keep formatting code in one place so:
//! - the weighting/inference code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

pub mod buckets;
pub mod format;

pub use buckets::*;
pub use format::*;
