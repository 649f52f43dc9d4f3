//! A registered client: identity plus the connection that reaches it.

use std::sync::Arc;

use relay_core::{ConnectionId, Identity, OrgId, RoleId, UserId};

use crate::websocket::connection::ClientConnection;

/// One logical user bound to one physical connection.
///
/// Identity is fixed for the life of the connection.
#[derive(Debug)]
pub struct Client {
    identity: Identity,
    connection: Arc<ClientConnection>,
}

impl Client {
    /// Bind `identity` to `connection`.
    pub fn new(identity: Identity, connection: Arc<ClientConnection>) -> Self {
        Self {
            identity,
            connection,
        }
    }

    /// The connection's ID. Registry membership is keyed on this.
    pub fn id(&self) -> ConnectionId {
        self.connection.id
    }

    /// Who this client is.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The user.
    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// The user's organization (possibly empty).
    pub fn organization(&self) -> &OrgId {
        &self.identity.organization
    }

    /// Roles held.
    pub fn roles(&self) -> impl Iterator<Item = &RoleId> {
        self.identity.roles.iter()
    }

    /// The transport.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }
}
