//! # Relay Module
//!
//! One relay session per browser connection, bridging it to the realtime API.
//!
//! ## Key Components:
//! - **Call flag**: Process-wide "call active" switch shared by all sessions
//! - **Router**: Pure state machine from realtime events to actions
//! - **Socket**: The per-connection actor that executes those actions
//! - **Registry**: Live sessions, for limits, health and shutdown
//! - **Teardown**: Releases capture, playback and remote on disconnect

pub mod call;      // CallFlag
pub mod events;    // Client-facing JSON events
pub mod registry;  // SessionRegistry
pub mod router;    // RelayRouter state machine
pub mod socket;    // RelaySession actor and /ws handler
pub mod teardown;  // Session resource release

pub use call::CallFlag;
pub use registry::SessionRegistry;
pub use socket::relay_websocket;
