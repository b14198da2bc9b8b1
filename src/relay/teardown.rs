//! Session teardown: stop capture, close playback, close the remote connection.

use crate::audio::capture::CaptureSource;
use crate::audio::playback::PlaybackDevice;
use crate::error::{RelayError, RelayResult};
use crate::realtime::client::RemoteLink;
use tracing::{error, info};

/// Outcome of each teardown step. `None` means the step did not apply.
#[derive(Debug)]
pub struct TeardownReport {
    pub capture: RelayResult<()>,
    pub playback: Option<RelayResult<()>>,
    pub remote: Option<RelayResult<()>>,
}

impl TeardownReport {
    pub fn failures(&self) -> Vec<&RelayError> {
        let mut failures = Vec::new();
        if let Err(e) = &self.capture {
            failures.push(e);
        }
        if let Some(Err(e)) = &self.playback {
            failures.push(e);
        }
        if let Some(Err(e)) = &self.remote {
            failures.push(e);
        }
        failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }
}

/// Release everything a session holds.
///
/// All three steps are attempted even if an earlier one fails:
/// 1. Stop the capture source
/// 2. Close the playback device, if one is open
/// 3. Close the remote connection, if it is still open
pub fn teardown(
    capture: &mut dyn CaptureSource,
    playback: Option<Box<dyn PlaybackDevice>>,
    remote: Option<&mut dyn RemoteLink>,
) -> TeardownReport {
    let capture_result = capture.stop();
    if let Err(e) = &capture_result {
        error!("Failed to stop capture: {}", e);
    }

    let playback_result = playback.map(|mut device| {
        let result = device.close();
        if let Err(e) = &result {
            error!("Failed to close playback device: {}", e);
        }
        result
    });

    let remote_result = remote.filter(|link| link.is_open()).map(|link| {
        let result = link.close();
        if let Err(e) = &result {
            error!("Failed to close realtime connection: {}", e);
        }
        result
    });

    let report = TeardownReport {
        capture: capture_result,
        playback: playback_result,
        remote: remote_result,
    };

    if report.is_clean() {
        info!("Session resources released");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sequencer::Fragment;
    use crate::realtime::messages::ClientCommand;
    use futures_util::future::{FutureExt, LocalBoxFuture};
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeCapture {
        fail: bool,
        stopped: Rc<Cell<bool>>,
    }

    impl CaptureSource for FakeCapture {
        fn start(&mut self) -> bool {
            true
        }

        fn stop(&mut self) -> RelayResult<()> {
            self.stopped.set(true);
            if self.fail {
                Err(RelayError::Device("mic stuck".to_string()))
            } else {
                Ok(())
            }
        }

        fn is_running(&self) -> bool {
            !self.stopped.get()
        }

        fn accept(&self, frame: Vec<u8>) -> RelayResult<Option<Vec<u8>>> {
            Ok(Some(frame))
        }
    }

    struct FakeDevice {
        fail: bool,
        closed: Rc<Cell<bool>>,
    }

    impl PlaybackDevice for FakeDevice {
        fn render(&mut self, fragment: Fragment) -> LocalBoxFuture<'static, RelayResult<usize>> {
            let len = fragment.data.len();
            async move { Ok(len) }.boxed_local()
        }

        fn close(&mut self) -> RelayResult<()> {
            self.closed.set(true);
            if self.fail {
                Err(RelayError::Device("speaker busy".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FakeLink {
        open: bool,
        fail: bool,
        close_calls: Rc<Cell<u32>>,
    }

    impl RemoteLink for FakeLink {
        fn send(&self, _command: ClientCommand) -> RelayResult<()> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) -> RelayResult<()> {
            self.close_calls.set(self.close_calls.get() + 1);
            self.open = false;
            if self.fail {
                Err(RelayError::Transport("reset by peer".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_every_step_attempted_when_all_fail() {
        let stopped = Rc::new(Cell::new(false));
        let closed = Rc::new(Cell::new(false));
        let close_calls = Rc::new(Cell::new(0));

        let mut capture = FakeCapture { fail: true, stopped: stopped.clone() };
        let device: Box<dyn PlaybackDevice> = Box::new(FakeDevice { fail: true, closed: closed.clone() });
        let mut link = FakeLink { open: true, fail: true, close_calls: close_calls.clone() };

        let report = teardown(&mut capture, Some(device), Some(&mut link));

        assert!(stopped.get());
        assert!(closed.get());
        assert_eq!(close_calls.get(), 1);
        assert_eq!(report.failures().len(), 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_capture_failure_does_not_skip_remote() {
        let close_calls = Rc::new(Cell::new(0));
        let mut capture = FakeCapture { fail: true, stopped: Rc::new(Cell::new(false)) };
        let mut link = FakeLink { open: true, fail: false, close_calls: close_calls.clone() };

        let report = teardown(&mut capture, None, Some(&mut link));

        assert_eq!(close_calls.get(), 1);
        assert!(report.playback.is_none());
        assert_eq!(report.remote, Some(Ok(())));
    }

    #[test]
    fn test_closed_remote_is_not_closed_again() {
        let close_calls = Rc::new(Cell::new(0));
        let mut capture = FakeCapture { fail: false, stopped: Rc::new(Cell::new(false)) };
        let mut link = FakeLink { open: false, fail: false, close_calls: close_calls.clone() };

        let report = teardown(&mut capture, None, Some(&mut link));

        assert_eq!(close_calls.get(), 0);
        assert!(report.remote.is_none());
        assert!(report.is_clean());
    }
}
