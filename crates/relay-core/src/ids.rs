//! Branded ID newtypes.
//!
//! Users, roles and organizations are named by the upstream identity provider,
//! so their IDs wrap whatever string it hands us. Connection IDs are minted
//! locally as UUID v7 (time-ordered).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the ID is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a logical user.
    UserId
}

branded_id! {
    /// Identifier of a role a user may hold.
    RoleId
}

branded_id! {
    /// Identifier of an organization. Empty when the user has none.
    OrgId
}

impl Default for OrgId {
    fn default() -> Self {
        Self(String::new())
    }
}

/// Identifier of one physical connection.
///
/// Two connections of the same user never share an ID, which is what the
/// registry deduplicates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mint a new connection ID (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_is_uuid_v7() {
        let id = ConnectionId::new();
        assert_eq!(id.as_uuid().get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn from_str_ref() {
        let id = UserId::from("u-1");
        assert_eq!(id.as_str(), "u-1");
    }

    #[test]
    fn deref_to_str() {
        let id = RoleId::from("admin");
        let s: &str = &id;
        assert_eq!(s, "admin");
    }

    #[test]
    fn empty_org() {
        assert!(OrgId::from("").is_empty());
        assert!(!OrgId::from("org1").is_empty());
    }

    #[test]
    fn borrow_lookup_in_map() {
        let mut map = std::collections::HashMap::new();
        let _ = map.insert(UserId::from("alice"), 1);
        assert_eq!(map.get("alice"), Some(&1));
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&OrgId::from("org1")).unwrap();
        assert_eq!(json, "\"org1\"");
        let back: OrgId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrgId::from("org1"));
    }
}
