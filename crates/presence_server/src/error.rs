//! Error types and handling for the presence server.
//!
//! Two families live here. [`ServerError`] covers infrastructure failures that
//! stop the server itself (binding, configuration). [`PresenceError`] is the
//! per-event taxonomy used inside the core: none of its variants ever cross a
//! connection boundary, handlers either drop the event or degrade.

/// Enumeration of possible server errors.
///
/// Categorizes errors into network-related, configuration and internal server
/// errors to help with debugging and error handling.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or handshake issues
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid or inconsistent configuration detected at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a connection can fail the session gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    #[error("no credential token was presented")]
    MissingToken,

    #[error("credential token is malformed: {0}")]
    MalformedToken(&'static str),

    #[error("credential token was rejected")]
    Rejected,

    #[error("credential verifier unavailable: {0}")]
    VerifierUnavailable(String),
}

/// Per-event failure taxonomy of the presence core.
///
/// | Variant | Handling |
/// |---|---|
/// | `Authentication` | fatal for the connection |
/// | `Authorization` | event dropped, logged at warn |
/// | `Validation` | event dropped or auto-corrected |
/// | `NotFound` | expected race, silent no-op |
/// | `Dependency` | degrade to local state, or drop |
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PresenceError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dependency unavailable: {0}")]
    Dependency(String),
}

impl PresenceError {
    /// Whether this failure is part of normal operation and should not be
    /// reported above debug level.
    pub fn is_expected(&self) -> bool {
        matches!(self, PresenceError::NotFound(_) | PresenceError::Validation(_))
    }

    pub(crate) fn dependency(context: &str, err: impl std::fmt::Display) -> Self {
        PresenceError::Dependency(format!("{context}: {err}"))
    }
}
