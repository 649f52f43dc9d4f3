//! Routed messages and the client wire shape.

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::ids::{OrgId, RoleId, UserId};

/// Opaque, already-encoded message body.
///
/// The routing layer never looks inside. Cloning is a reference-count bump.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    /// Wrap raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Serialize a JSON value as compact text.
    pub fn from_json(value: &Value) -> Self {
        Self(Bytes::from(value.to_string()))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.0.len()).finish()
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

/// A message addressed either to everyone or to an explicit destination set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutedMessage {
    /// Deliver to every connected client.
    Broadcast {
        /// Body to deliver.
        payload: Payload,
    },
    /// Deliver to the union of the named users, role members and org members.
    Targeted {
        /// Explicit user destinations.
        users: BTreeSet<UserId>,
        /// Every member of these roles.
        roles: BTreeSet<RoleId>,
        /// Every member of these organizations.
        orgs: BTreeSet<OrgId>,
        /// Body to deliver.
        payload: Payload,
    },
}

impl RoutedMessage {
    /// Broadcast `payload` to every client.
    pub fn broadcast(payload: impl Into<Payload>) -> Self {
        Self::Broadcast {
            payload: payload.into(),
        }
    }

    /// Start a targeted message with no destinations.
    pub fn targeted(payload: impl Into<Payload>) -> Self {
        Self::Targeted {
            users: BTreeSet::new(),
            roles: BTreeSet::new(),
            orgs: BTreeSet::new(),
            payload: payload.into(),
        }
    }

    /// Add a user destination. No-op on a broadcast.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<UserId>) -> Self {
        if let Self::Targeted { users, .. } = &mut self {
            let _ = users.insert(user.into());
        }
        self
    }

    /// Add a role destination. No-op on a broadcast.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<RoleId>) -> Self {
        if let Self::Targeted { roles, .. } = &mut self {
            let _ = roles.insert(role.into());
        }
        self
    }

    /// Add an organization destination. No-op on a broadcast.
    #[must_use]
    pub fn with_org(mut self, org: impl Into<OrgId>) -> Self {
        if let Self::Targeted { orgs, .. } = &mut self {
            let _ = orgs.insert(org.into());
        }
        self
    }

    /// The body to deliver.
    pub fn payload(&self) -> &Payload {
        match self {
            Self::Broadcast { payload } | Self::Targeted { payload, .. } => payload,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Broadcast { .. } => "broadcast",
            Self::Targeted { .. } => "targeted",
        }
    }
}

/// Wire shape sent by clients, and carried as `data` in bus envelopes.
///
/// ```json
/// {"broadcast": false, "users": ["u1"], "roles": ["admin"],
///  "organizations": ["org1"], "payload": {"kind": "refresh"}}
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Deliver to everyone, ignoring the destination lists.
    #[serde(default)]
    pub broadcast: bool,
    /// Explicit user destinations.
    #[serde(default)]
    pub users: Vec<UserId>,
    /// Role destinations.
    #[serde(default)]
    pub roles: Vec<RoleId>,
    /// Organization destinations.
    #[serde(default)]
    pub organizations: Vec<OrgId>,
    /// Arbitrary JSON body, forwarded verbatim.
    #[serde(default)]
    pub payload: Value,
}

impl ClientMessage {
    /// Parse a client frame.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Message)
    }

    /// Parse the `data` attribute of a decoded envelope.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        serde_json::from_value(value).map_err(DecodeError::Message)
    }

    /// Turn the wire shape into a routed message.
    pub fn into_routed(self) -> RoutedMessage {
        let payload = Payload::from_json(&self.payload);
        if self.broadcast {
            return RoutedMessage::Broadcast { payload };
        }
        RoutedMessage::Targeted {
            users: self.users.into_iter().collect(),
            roles: self.roles.into_iter().collect(),
            orgs: self.organizations.into_iter().collect(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn parse_full_message() {
        let msg = ClientMessage::parse(
            br#"{"broadcast":false,"users":["u1"],"roles":["admin"],"organizations":["org1"],"payload":{"a":1}}"#,
        )
        .unwrap();
        assert!(!msg.broadcast);
        assert_eq!(msg.users, vec![UserId::from("u1")]);
        assert_eq!(msg.roles, vec![RoleId::from("admin")]);
        assert_eq!(msg.organizations, vec![OrgId::from("org1")]);
        assert_eq!(msg.payload, json!({"a": 1}));
    }

    #[test]
    fn missing_fields_default() {
        let msg = ClientMessage::parse(br#"{"payload":"hi"}"#).unwrap();
        assert!(!msg.broadcast);
        assert!(msg.users.is_empty());
        assert!(msg.roles.is_empty());
        assert!(msg.organizations.is_empty());
    }

    #[test]
    fn malformed_frame_is_decode_error() {
        assert_matches!(ClientMessage::parse(b"not json"), Err(DecodeError::Message(_)));
        assert_matches!(
            ClientMessage::parse(br#"{"users":"not-a-list"}"#),
            Err(DecodeError::Message(_))
        );
    }

    #[test]
    fn broadcast_flag_ignores_destinations() {
        let msg = ClientMessage {
            broadcast: true,
            users: vec!["u1".into()],
            payload: json!({"x": true}),
            ..ClientMessage::default()
        };
        let routed = msg.into_routed();
        assert_eq!(routed.kind(), "broadcast");
        assert_eq!(routed.payload().as_text(), Some(r#"{"x":true}"#));
    }

    #[test]
    fn float_payload_keeps_its_value() {
        let x = 2.435_359_894_375_784e-88_f64;
        let frame = json!({"broadcast": true, "payload": x}).to_string();
        let routed = ClientMessage::parse(frame.as_bytes()).unwrap().into_routed();
        let back: Value = serde_json::from_slice(&routed.payload().clone().into_bytes()).unwrap();
        assert_eq!(back, json!(x));
    }

    #[test]
    fn targeted_destinations_are_deduplicated() {
        let msg = ClientMessage {
            users: vec!["u1".into(), "u1".into()],
            roles: vec!["admin".into()],
            organizations: vec!["org1".into(), "org1".into()],
            payload: json!(1),
            ..ClientMessage::default()
        };
        assert_matches!(msg.into_routed(), RoutedMessage::Targeted { users, roles, orgs, .. } => {
            assert_eq!(users.len(), 1);
            assert_eq!(roles.len(), 1);
            assert_eq!(orgs.len(), 1);
        });
    }

    #[test]
    fn builder_adds_destinations() {
        let routed = RoutedMessage::targeted("{}")
            .with_user("u1")
            .with_role("admin")
            .with_org("org1");
        assert_eq!(routed.kind(), "targeted");
        assert_matches!(routed, RoutedMessage::Targeted { users, roles, orgs, .. } => {
            assert!(users.contains("u1"));
            assert!(roles.contains("admin"));
            assert!(orgs.contains("org1"));
        });
    }

    #[test]
    fn builder_on_broadcast_is_noop() {
        let routed = RoutedMessage::broadcast("{}").with_user("u1");
        assert_eq!(routed, RoutedMessage::broadcast("{}"));
    }

    #[test]
    fn payload_debug_hides_contents() {
        let p = Payload::from("secret");
        assert_eq!(format!("{p:?}"), "Payload(6)");
    }
}
