//! Process-wide call-active flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "is a call active" toggle.
///
/// Cloning shares the same flag. Every session reads it concurrently; only the
/// start/stop endpoints write it.
#[derive(Debug, Clone, Default)]
pub struct CallFlag(Arc<AtomicBool>);

impl CallFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the call active. Returns true if this changed the flag.
    pub fn start(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// Mark the call inactive. Returns true if this changed the flag.
    pub fn stop(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
