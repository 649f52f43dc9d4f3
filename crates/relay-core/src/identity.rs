//! Identity of a connecting client.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{OrgId, RoleId, UserId};

/// Who is on the other end of a connection.
///
/// Supplied by the authentication layer at accept time. The hub does not
/// validate it, it only indexes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// The user.
    pub user_id: UserId,
    /// The user's organization (empty if none).
    #[serde(default)]
    pub organization: OrgId,
    /// Roles held by the user.
    #[serde(default)]
    pub roles: BTreeSet<RoleId>,
}

impl Identity {
    /// Build an identity from its parts.
    pub fn new(
        user_id: impl Into<UserId>,
        organization: impl Into<OrgId>,
        roles: impl IntoIterator<Item = impl Into<RoleId>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            organization: organization.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the user holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
