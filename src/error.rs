//! Startup error types.
//!
//! Configuration problems are the only errors the daemon treats as
//! fatal at startup; everything after that is handled where it occurs
//! (a failed tick is abandoned, an unknown time zone is skipped, a
//! failed HTTP fetch becomes a recorded result).

use thiserror::Error;

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is present but unusable.
    #[error("invalid configuration: {message}\n\nHow to fix: {fix_hint}")]
    Invalid {
        /// What is wrong.
        message: String,
        /// How to fix it.
        fix_hint: String,
    },
}

impl ConfigError {
    /// Create an invalid-value error with an actionable hint.
    #[must_use]
    pub fn invalid(message: impl Into<String>, fix_hint: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            fix_hint: fix_hint.into(),
        }
    }
}
