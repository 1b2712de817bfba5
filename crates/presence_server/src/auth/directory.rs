//! Static user directory loaded from configuration.

use super::{CredentialVerifier, MembershipAuthorizer, VerifiedIdentity};
use crate::error::{AuthenticationError, PresenceError};
use crate::types::{SpaceId, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// A user known to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub user_id: UserId,
    pub token: String,
    pub display_name: Option<String>,
    pub organizations: Vec<String>,
}

/// Token and membership lookups over a fixed set of users and spaces.
///
/// Serves both as the credential verifier and as the chat membership
/// authorizer. Spaces without an owning organization admit nobody.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    by_token: HashMap<String, VerifiedIdentity>,
    memberships: HashMap<UserId, HashSet<String>>,
    space_owners: HashMap<SpaceId, String>,
}

impl StaticDirectory {
    pub fn new(users: Vec<DirectoryUser>) -> Self {
        let mut directory = Self::default();
        for user in users {
            directory.by_token.insert(
                user.token,
                VerifiedIdentity {
                    user_id: user.user_id.clone(),
                    display_name: user.display_name,
                },
            );
            directory
                .memberships
                .entry(user.user_id)
                .or_default()
                .extend(user.organizations);
        }
        directory
    }

    /// Records which organization owns `space_id`.
    pub fn with_space_owner(mut self, space_id: SpaceId, organization: impl Into<String>) -> Self {
        self.space_owners.insert(space_id, organization.into());
        self
    }

    pub fn user_count(&self) -> usize {
        self.memberships.len()
    }
}

#[async_trait]
impl CredentialVerifier for StaticDirectory {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthenticationError> {
        self.by_token.get(token).cloned().ok_or(AuthenticationError::Rejected)
    }
}

#[async_trait]
impl MembershipAuthorizer for StaticDirectory {
    async fn is_member(&self, user_id: &UserId, space_id: &SpaceId) -> Result<bool, PresenceError> {
        let Some(organization) = self.space_owners.get(space_id) else {
            return Ok(false);
        };
        Ok(self
            .memberships
            .get(user_id)
            .is_some_and(|orgs| orgs.contains(organization)))
    }
}
