//! Client indices by user, role and organization.
//!
//! Owned by the hub task alone, so nothing here locks. All three indices are
//! updated together on every register and unregister.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relay_core::{ConnectionId, OrgId, RoleId, RoutedMessage, UserId};
use serde::Serialize;

use super::client::Client;

type Members = HashMap<ConnectionId, Arc<Client>>;

/// Point-in-time registry sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Registered clients (one per user).
    pub clients: usize,
    /// Roles with at least one member.
    pub roles: usize,
    /// Organizations with at least one member.
    pub organizations: usize,
}

/// The hub's view of who is connected.
#[derive(Debug, Default)]
pub struct Registry {
    by_user: HashMap<UserId, Arc<Client>>,
    by_role: HashMap<RoleId, Members>,
    by_org: HashMap<OrgId, Members>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `client` under its user, each of its roles and its organization.
    ///
    /// A user has at most one registered client. If another connection of
    /// the same user was registered it is removed from every index and
    /// returned so the caller can close it. Clients with an empty
    /// organization are not indexed by organization.
    pub fn register(&mut self, client: Arc<Client>) -> Option<Arc<Client>> {
        let previous = self
            .by_user
            .insert(client.user_id().clone(), Arc::clone(&client));
        if let Some(prev) = &previous {
            self.remove_from_groups(prev);
        }

        for role in client.roles() {
            let _ = self
                .by_role
                .entry(role.clone())
                .or_default()
                .insert(client.id(), Arc::clone(&client));
        }
        if !client.organization().is_empty() {
            let _ = self
                .by_org
                .entry(client.organization().clone())
                .or_default()
                .insert(client.id(), Arc::clone(&client));
        }

        previous.filter(|prev| prev.id() != client.id())
    }

    /// Remove `client` from every index.
    ///
    /// Matches on connection ID: if the user has since reconnected, the newer
    /// connection stays registered and this returns `false`.
    pub fn unregister(&mut self, client: &Client) -> bool {
        match self.by_user.get(client.user_id()) {
            Some(current) if current.id() == client.id() => {
                let _ = self.by_user.remove(client.user_id());
            }
            _ => return false,
        }
        self.remove_from_groups(client);
        true
    }

    /// Every client a message should reach, each exactly once.
    ///
    /// Unknown users, roles and organizations contribute nothing.
    pub fn resolve(&self, message: &RoutedMessage) -> Vec<Arc<Client>> {
        match message {
            RoutedMessage::Broadcast { .. } => self.by_user.values().cloned().collect(),
            RoutedMessage::Targeted {
                users, roles, orgs, ..
            } => {
                let mut seen = HashSet::new();
                let mut targets = Vec::new();

                for client in users.iter().filter_map(|u| self.by_user.get(u)) {
                    push_unique(&mut seen, &mut targets, client);
                }
                for members in roles.iter().filter_map(|r| self.by_role.get(r)) {
                    for client in members.values() {
                        push_unique(&mut seen, &mut targets, client);
                    }
                }
                for members in orgs.iter().filter_map(|o| self.by_org.get(o)) {
                    for client in members.values() {
                        push_unique(&mut seen, &mut targets, client);
                    }
                }
                targets
            }
        }
    }

    /// The client registered for `user`, if any.
    #[cfg(test)]
    pub fn get(&self, user: &str) -> Option<&Arc<Client>> {
        self.by_user.get(user)
    }

    /// Number of members of `role`, or `None` if the role has no entry.
    #[cfg(test)]
    pub fn role_size(&self, role: &str) -> Option<usize> {
        self.by_role.get(role).map(HashMap::len)
    }

    /// Number of members of `org`, or `None` if the organization has no entry.
    #[cfg(test)]
    pub fn org_size(&self, org: &str) -> Option<usize> {
        self.by_org.get(org).map(HashMap::len)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    /// Current sizes.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            clients: self.by_user.len(),
            roles: self.by_role.len(),
            organizations: self.by_org.len(),
        }
    }

    /// Empty every index, returning the clients that were registered.
    pub fn drain(&mut self) -> Vec<Arc<Client>> {
        self.by_role.clear();
        self.by_org.clear();
        self.by_user.drain().map(|(_, client)| client).collect()
    }

    fn remove_from_groups(&mut self, client: &Client) {
        let id = client.id();
        for role in client.roles() {
            remove_member(&mut self.by_role, role, id);
        }
        remove_member(&mut self.by_org, client.organization(), id);
    }
}

fn push_unique(
    seen: &mut HashSet<ConnectionId>,
    targets: &mut Vec<Arc<Client>>,
    client: &Arc<Client>,
) {
    if seen.insert(client.id()) {
        targets.push(Arc::clone(client));
    }
}

fn remove_member<K>(index: &mut HashMap<K, Members>, key: &K, id: ConnectionId)
where
    K: std::hash::Hash + Eq,
{
    if let Some(members) = index.get_mut(key) {
        let _ = members.remove(&id);
        if members.is_empty() {
            let _ = index.remove(key);
        }
    }
}
