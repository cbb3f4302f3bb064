//! Mathematical utilities: least squares, GLMs, ordinal/multinomial logit,
//! a small BFGS optimizer, and summary statistics.

pub mod glm;
pub mod multinomial;
pub mod ols;
pub mod optim;
pub mod ordinal;
pub mod stats;

pub use ols::*;
pub use stats::*;
