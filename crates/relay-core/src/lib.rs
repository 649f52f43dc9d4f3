//! # relay-core
//!
//! Shared vocabulary for the relay hub.
//!
//! - **Branded IDs**: `UserId`, `RoleId`, `OrgId`, `ConnectionId` as newtypes
//! - **Identity**: the `{userId, organization, roles}` triple supplied by the
//!   upstream authenticator at connection-accept time
//! - **Messages**: `ClientMessage` (wire shape) and `RoutedMessage` (what the
//!   hub fans out), with an opaque `Payload`
//! - **Envelope codec**: versioned wire wrapper used on the external bus
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod message;

pub use envelope::{ContentType, Envelope, SpecVersion};
pub use errors::{DecodeError, EnvelopeError};
pub use identity::Identity;
pub use ids::{ConnectionId, OrgId, RoleId, UserId};
pub use logging::LogFormat;
pub use message::{ClientMessage, Payload, RoutedMessage};
