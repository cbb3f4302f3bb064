//! Pipeline error type.
//!
//! Fatal errors carry a process exit code so the batch driver can distinguish
//! failure classes without parsing messages:
//!
//! - `2`: missing input / I/O failure
//! - `3`: schema mismatch after synonym resolution
//! - `4`: model-fit failure (primary fit only; cross-checks are logged)
//!
//! Non-fatal conditions (coverage gaps, small bootstrap samples) never become
//! an `AppError`; they are recorded in the stage outputs instead.

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Missing input file/table or an I/O failure while reading/writing one.
    pub fn input(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    /// Expected column absent after synonym resolution.
    ///
    /// The message should carry the full discovered column list for diagnosis.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(3, message)
    }

    /// Numerical non-convergence or separation in a primary model fit.
    pub fn model(message: impl Into<String>) -> Self {
        Self::new(4, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
