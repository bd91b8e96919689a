//! Shared error-code contract.
//!
//! Every error enum in the crate implements [`ErrorCode`] so callers (UI
//! toasts, automation layers, logs) can branch on a stable, grepable code
//! instead of matching on display strings.

/// Grepable error code and retryable flag for structured error reporting.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
