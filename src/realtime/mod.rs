//! # Realtime API Module
//!
//! Connection and wire types for the remote realtime-conversation endpoint.
//!
//! ## Key Components:
//! - **Messages**: Outbound commands and inbound server events
//! - **Client**: Authenticated WebSocket connection with reader/writer tasks

pub mod client;    // Connection, RemoteLink trait, RemoteSignal
pub mod messages;  // Wire types
