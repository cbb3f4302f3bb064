//! Structural regression & decomposition engine.
//!
//! `frame` assembles the contract-year modeling frame from ratings,
//! exposures, and concentration metrics; `decompose` fits the ordered logit
//! and splits each observed rating into a structural expectation and an
//! operational residual.

pub mod decompose;
pub mod frame;

pub use decompose::*;
pub use frame::*;
