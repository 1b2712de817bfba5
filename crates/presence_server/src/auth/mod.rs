//! # Session Gate
//!
//! Every connection is authenticated exactly once, during the WebSocket
//! upgrade and before any event is read. The resulting identity is bound to
//! the connection for its whole lifetime; there is no re-authentication and
//! no retry.
//!
//! Credential checks and membership checks are external collaborators behind
//! async traits. [`StaticDirectory`] is the shipped implementation of both.

pub mod directory;

pub use directory::{DirectoryUser, StaticDirectory};

use crate::error::{AuthenticationError, PresenceError};
use crate::types::{SpaceId, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on accepted token length in bytes.
pub const MAX_TOKEN_BYTES: usize = 4096;

/// The parts of the upgrade request the gate looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeMetadata {
    /// Raw `Authorization` header value
    pub authorization: Option<String>,
    /// Raw query string of the upgrade URL, without the leading `?`
    pub query: Option<String>,
}

impl HandshakeMetadata {
    /// Bearer token from the `Authorization` header, else the `token` query
    /// parameter. Browsers cannot set headers on a WebSocket upgrade, hence
    /// the query fallback.
    pub fn bearer_token(&self) -> Option<&str> {
        let from_header = self.authorization.as_deref().and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then_some(token)
        });
        from_header.or_else(|| {
            self.query.as_deref()?.split('&').find_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                (key == "token").then_some(value)
            })
        })
    }
}

/// Identity bound to a connection after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub display_name: Option<String>,
}

/// Resolves an opaque bearer token to an identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns `Rejected` for unknown or expired tokens and
    /// `VerifierUnavailable` when the verifier itself cannot answer.
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthenticationError>;
}

/// Decides whether a user belongs to the organization owning a space.
#[async_trait]
pub trait MembershipAuthorizer: Send + Sync {
    async fn is_member(&self, user_id: &UserId, space_id: &SpaceId) -> Result<bool, PresenceError>;
}

/// Checks the syntactic shape of a token before it reaches the verifier.
pub fn validate_token(token: &str) -> Result<&str, AuthenticationError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthenticationError::MalformedToken("empty"));
    }
    if token.len() > MAX_TOKEN_BYTES {
        return Err(AuthenticationError::MalformedToken("too long"));
    }
    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AuthenticationError::MalformedToken("contains whitespace or control characters"));
    }
    Ok(token)
}

/// One-shot authentication of inbound connections.
#[derive(Clone)]
pub struct SessionGate {
    verifier: Arc<dyn CredentialVerifier>,
}

impl SessionGate {
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self { verifier }
    }

    /// Resolves handshake metadata to a verified identity.
    ///
    /// # Errors
    ///
    /// Any [`AuthenticationError`]; all of them are terminal for the connection.
    pub async fn authenticate(
        &self,
        metadata: &HandshakeMetadata,
    ) -> Result<VerifiedIdentity, AuthenticationError> {
        let token = metadata.bearer_token().ok_or(AuthenticationError::MissingToken)?;
        let token = validate_token(token)?;
        match self.verifier.verify(token).await {
            Ok(identity) => {
                debug!("🔐 Authenticated user {}", identity.user_id);
                Ok(identity)
            }
            Err(err) => {
                warn!("🔒 Authentication failed: {}", err);
                Err(err)
            }
        }
    }
}
