//! WebSocket transport: connections, identity extraction, pumps and the
//! per-client session.

pub mod connection;
pub mod identity;
pub mod pumps;
pub mod session;
