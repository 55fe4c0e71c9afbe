//! Error types for grefsen
//!
//! Only configuration problems and start-up failures travel through these
//! types. Trapped signals never do: they belong to [`crate::crash_guard`],
//! and fatal log records end the process from inside [`crate::log_sink`].

use std::fmt;

/// Main error type for grefsen operations
#[derive(Debug, thiserror::Error)]
pub enum GrefsenError {
    /// None of the requested screens exist
    #[error("none of the screens {requested:?} exist; available screens: {available:?}")]
    NoMatchingDisplays {
        requested: Vec<String>,
        available: Vec<String>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Log sink could not be set up
    #[error("Log sink error: {0}")]
    LogSink(#[from] crate::log_sink::LogSinkError),

    /// Crash guard could not be armed
    #[error("Crash guard error: {0}")]
    CrashGuard(#[from] crate::crash_guard::CrashGuardError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),
}

impl GrefsenError {
    /// Process exit status reported for this error
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Result type alias for grefsen operations
pub type GrefsenResult<T> = Result<T, GrefsenError>;

/// Helper for operations that should log errors but not propagate them
pub fn log_error<T, E: fmt::Display>(result: Result<T, E>) -> Option<T> {
    match result {
        Ok(val) => Some(val),
        Err(err) => {
            tracing::warn!("Operation failed, continuing without it: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_matching_displays_lists_both_sides() {
        let err = GrefsenError::NoMatchingDisplays {
            requested: vec!["nonexistent".into()],
            available: vec!["HDMI-1".into(), "eDP-1".into()],
        };
        let text = err.to_string();
        assert!(text.contains("nonexistent"));
        assert!(text.contains("HDMI-1"));
        assert!(text.contains("eDP-1"));
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn log_error_swallows_failures() {
        let ok: Result<u8, String> = Ok(3);
        assert_eq!(log_error(ok), Some(3));
        let err: Result<u8, String> = Err("nope".into());
        assert_eq!(log_error(err), None);
    }
}
