//! # Audio Module
//!
//! Everything that touches raw PCM inside a relay session.
//!
//! ## Key Components:
//! - **PCM helpers**: Duration math and frame validation
//! - **Sequencer**: Ordered, one-at-a-time playback queue with played-duration tracking
//! - **Playback**: Device that paces fragments out to the client connection
//! - **Capture**: Gate for microphone frames arriving from the client
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 24kHz (configurable)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod capture;    // Local capture source
pub mod pcm;        // Format helpers
pub mod playback;   // Playback device and output factory
pub mod sequencer;  // Playback queue
