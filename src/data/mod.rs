//! Synthetic demo data.
//!
//! The real pipeline runs on staged government extracts; `sample` writes a
//! small, seeded synthetic set of the same CSV shapes so the full pipeline
//! can be exercised end-to-end without any source data.

pub mod sample;

pub use sample::*;
