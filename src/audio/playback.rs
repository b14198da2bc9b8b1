//! # Playback Device
//!
//! Renders sequenced fragments for the listener. In this server the "speaker" is
//! the browser: rendering pushes the fragment to the client as a binary frame and
//! then holds the device for the fragment's real-time duration, so the next
//! fragment is not sent before the current one would have finished playing.
//!
//! ## Lifecycle:
//! 1. **Open**: `PlaybackOutput::open` creates a device lazily on the first fragment
//! 2. **Render**: One fragment at a time, driven by the session actor
//! 3. **Close**: On interruption or teardown; a closed device refuses to render

use crate::audio::pcm::AudioFormat;
use crate::audio::sequencer::Fragment;
use crate::error::{RelayError, RelayResult};

use actix::prelude::*;
use futures_util::future::{FutureExt, LocalBoxFuture};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Something that can render PCM fragments.
pub trait PlaybackDevice {
    /// Render one fragment to completion.
    ///
    /// Resolves to the number of bytes played once the fragment's duration has
    /// elapsed. Dropping the future abandons the render.
    fn render(&mut self, fragment: Fragment) -> LocalBoxFuture<'static, RelayResult<usize>>;

    /// Stop and release the device.
    fn close(&mut self) -> RelayResult<()>;
}

/// Factory for playback devices.
pub trait PlaybackOutput {
    fn open(&self) -> RelayResult<Box<dyn PlaybackDevice>>;
}

/// A fragment on its way to the client connection.
#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub struct PlaybackFrame {
    pub epoch: u64,
    pub data: Vec<u8>,
}

/// Opens devices that write to a client connection.
pub struct ClientPlaybackOutput {
    frames: Recipient<PlaybackFrame>,
    format: AudioFormat,
}

impl ClientPlaybackOutput {
    pub fn new(frames: Recipient<PlaybackFrame>, format: AudioFormat) -> Self {
        Self { frames, format }
    }
}

impl PlaybackOutput for ClientPlaybackOutput {
    fn open(&self) -> RelayResult<Box<dyn PlaybackDevice>> {
        tracing::debug!("Opening client playback device");
        Ok(Box::new(ClientPlayback {
            frames: self.frames.clone(),
            format: self.format,
            closed: Rc::new(Cell::new(false)),
        }))
    }
}

/// Paced playback into a client connection.
pub struct ClientPlayback {
    frames: Recipient<PlaybackFrame>,
    format: AudioFormat,
    closed: Rc<Cell<bool>>,
}

impl PlaybackDevice for ClientPlayback {
    fn render(&mut self, fragment: Fragment) -> LocalBoxFuture<'static, RelayResult<usize>> {
        if self.closed.get() {
            return async { Err(RelayError::Device("Playback device is closed".to_string())) }
                .boxed_local();
        }

        let bytes = fragment.data.len();
        let duration = Duration::from_secs_f64(self.format.duration_ms(bytes) / 1000.0);
        let closed = self.closed.clone();

        self.frames.do_send(PlaybackFrame {
            epoch: fragment.epoch,
            data: fragment.data,
        });

        async move {
            tokio::time::sleep(duration).await;
            if closed.get() {
                return Err(RelayError::Device("Playback device closed mid-render".to_string()));
            }
            Ok(bytes)
        }
        .boxed_local()
    }

    fn close(&mut self) -> RelayResult<()> {
        if self.closed.replace(true) {
            return Err(RelayError::Device("Playback device already closed".to_string()));
        }
        tracing::debug!("Closed client playback device");
        Ok(())
    }
}
