//! Real-time message relay.
//!
//! Clients connect over WebSocket with an identity supplied by the
//! authentication layer and are indexed by user, role and organization in a
//! single-owner [`hub`]. Messages from clients or from an external bus
//! ([`ingest`]) are routed to every matching connection through a bounded
//! per-connection queue. A client that cannot keep up is evicted rather than
//! slowing anyone else down.

pub mod config;
pub mod health;
pub mod hub;
pub mod ingest;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
