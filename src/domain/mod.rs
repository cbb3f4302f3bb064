//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - staged input records (`EnrollmentRecord`, `RatingRecord`, `CountyAttribute`)
//! - derived stage outputs (`ContractCountyWeight`, `ContractYearExposure`, ...)
//! - classification enums (`AttributeKind`, `ThresholdBand`, `ResidualBucket`)
//! - the run configuration object threaded through every stage

pub mod types;

pub use types::*;
