//! # Local Capture Source
//!
//! The microphone-equivalent input of a relay session. The browser streams PCM as
//! binary WebSocket frames; the capture source decides which of those frames are
//! forwarded to the realtime endpoint.
//!
//! ## Gating Rules:
//! - Capture only starts while the call-active flag is set
//! - A frame is forwarded only while capture is running AND the call is active
//! - Frames that are empty or not whole 16-bit samples are rejected outright

use crate::audio::pcm::{peak_level, AudioFormat};
use crate::error::{RelayError, RelayResult};
use crate::relay::call::CallFlag;

/// A source of captured audio frames.
pub trait CaptureSource {
    /// Start capturing. Returns false (and stays stopped) when no call is active.
    fn start(&mut self) -> bool;

    /// Stop capturing. Stopping an already stopped source is fine.
    fn stop(&mut self) -> RelayResult<()>;

    fn is_running(&self) -> bool;

    /// Pass a captured frame through the gate.
    ///
    /// ## Returns:
    /// - **Ok(Some(frame))**: Forward the frame to the remote session
    /// - **Ok(None)**: Drop the frame silently (capture stopped or call inactive)
    /// - **Err(...)**: The frame is malformed
    fn accept(&self, frame: Vec<u8>) -> RelayResult<Option<Vec<u8>>>;

    /// Stop and start again (used when a response completes).
    fn restart(&mut self) -> bool {
        if let Err(e) = self.stop() {
            tracing::warn!("Failed to stop capture before restart: {}", e);
        }
        self.start()
    }
}

/// Capture fed by binary frames from the client connection.
#[derive(Debug)]
pub struct ClientCapture {
    running: bool,
    call: CallFlag,
    format: AudioFormat,
}

impl ClientCapture {
    pub fn new(call: CallFlag, format: AudioFormat) -> Self {
        Self {
            running: false,
            call,
            format,
        }
    }
}

impl CaptureSource for ClientCapture {
    fn start(&mut self) -> bool {
        if !self.call.is_active() {
            tracing::info!("Call is not active; ignoring mic start");
            return false;
        }
        self.running = true;
        true
    }

    fn stop(&mut self) -> RelayResult<()> {
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn accept(&self, frame: Vec<u8>) -> RelayResult<Option<Vec<u8>>> {
        self.format
            .validate_chunk(&frame)
            .map_err(RelayError::Device)?;

        if !self.running || !self.call.is_active() {
            return Ok(None);
        }

        tracing::trace!(
            "Captured {} bytes (peak {:.2})",
            frame.len(),
            peak_level(&frame)
        );
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(call: &CallFlag) -> ClientCapture {
        ClientCapture::new(call.clone(), AudioFormat::default())
    }

    #[test]
    fn test_start_requires_active_call() {
        let call = CallFlag::new();
        let mut capture = capture(&call);

        assert!(!capture.start());
        assert!(!capture.is_running());

        call.start();
        assert!(capture.start());
        assert!(capture.is_running());
    }

    #[test]
    fn test_no_frames_forwarded_while_call_inactive() {
        let call = CallFlag::new();
        let mut capture = capture(&call);
        call.start();
        capture.start();

        assert_eq!(capture.accept(vec![1, 0]).unwrap(), Some(vec![1, 0]));

        // Call stopped while capture is still running
        call.stop();
        assert_eq!(capture.accept(vec![1, 0]).unwrap(), None);
    }

    #[test]
    fn test_no_frames_forwarded_while_stopped() {
        let call = CallFlag::new();
        call.start();
        let mut capture = capture(&call);

        assert_eq!(capture.accept(vec![1, 0]).unwrap(), None);
        capture.start();
        capture.stop().unwrap();
        assert_eq!(capture.accept(vec![1, 0]).unwrap(), None);
    }

    #[test]
    fn test_malformed_frames_rejected() {
        let call = CallFlag::new();
        call.start();
        let mut capture = capture(&call);
        capture.start();

        assert!(capture.accept(vec![]).is_err());
        assert!(capture.accept(vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_restart_keeps_running_when_call_active() {
        let call = CallFlag::new();
        call.start();
        let mut capture = capture(&call);
        capture.start();

        assert!(capture.restart());
        assert!(capture.is_running());

        call.stop();
        assert!(!capture.restart());
        assert!(!capture.is_running());
    }
}
