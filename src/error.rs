use std::time::Duration;

use thiserror::Error;

/// Errors that cross the boundary of the session core.
///
/// Engine, directory and hashing failures are logged where they happen and
/// collapse into `StoreUnavailable`; nothing here wraps a raw backend error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Too many failed login attempts, try again in {}s", .remaining.as_secs().max(1))]
    BanActive { remaining: Duration },
    /// Wrong password and unknown identity look the same on purpose.
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Random source unavailable")]
    RandomSourceUnavailable,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Session store unavailable")]
    StoreUnavailable,
    #[error("User already exists")]
    UserAlreadyExists,
}

impl AuthError {
    /// HTTP status the edge should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::BanActive { .. } => 429,
            AuthError::InvalidCredentials | AuthError::SessionNotFound => 401,
            AuthError::UserAlreadyExists => 409,
            AuthError::RandomSourceUnavailable | AuthError::StoreUnavailable => 500,
        }
    }

    /// Remaining ban, for `Retry-After`
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AuthError::BanActive { remaining } => Some(*remaining),
            _ => None,
        }
    }
}

/// Log an engine failure and translate it. Use as `.map_err(store_unavailable("op"))`.
pub(crate) fn store_unavailable<E: std::fmt::Display>(
    operation: &'static str,
) -> impl FnOnce(E) -> AuthError {
    move |err| {
        tracing::error!(error = %err, operation, "Key-value engine call failed");
        AuthError::StoreUnavailable
    }
}
