//! Result type definition and extension traits.
//!
//! Monitoring and healing code must never propagate an error far enough to
//! stop the control plane; these combinators log and continue instead.

use crate::error::Error;

/// The standard Result type for Warden operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error with context.
    fn into_option_logged(self, context: &str) -> Option<T>;

    /// Get the value or a default, logging the error with context.
    fn or_default_logged(self, context: &str, default: T) -> T;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn or_default_logged(self, context: &str, default: T) -> T {
        self.into_option_logged(context).unwrap_or(default)
    }
}
