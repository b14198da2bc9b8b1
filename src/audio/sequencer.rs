//! # Audio Playback Sequencer
//!
//! Buffers audio fragments received from the realtime API and hands them to the
//! playback device strictly in arrival order, one fragment at a time.
//!
//! ## Key Features:
//! - **FIFO queue**: Append at the tail, consume from the head
//! - **Lazy playback**: The first fragment enqueued while idle starts playback
//! - **Played-duration tracking**: Only fully rendered fragments count
//! - **Epochs**: Each interruption starts a new epoch so late completions from
//!   a torn-down device are ignored
//!
//! ## Ownership:
//! The sequencer never renders anything itself. It returns the next `Fragment`
//! to render and the session actor drives the device, then reports back through
//! `finish`. That keeps it a plain struct with no locks or async code.

use crate::audio::pcm::AudioFormat;
use std::collections::VecDeque;

/// A chunk of PCM audio handed to the playback device.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Playback epoch the fragment was started under
    pub epoch: u64,
    /// Raw 16-bit little-endian PCM bytes
    pub data: Vec<u8>,
}

/// Ordered playback queue with a single playback cursor.
#[derive(Debug)]
pub struct PlaybackSequencer {
    /// Fragments waiting to be rendered (head = next to play)
    queue: VecDeque<Vec<u8>>,
    /// True while a fragment is being rendered
    playing: bool,
    /// Advanced on every interruption
    epoch: u64,
    /// Cumulative duration of fully rendered fragments (milliseconds)
    played_ms: f64,
    format: AudioFormat,
}

impl PlaybackSequencer {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            queue: VecDeque::new(),
            playing: false,
            epoch: 0,
            played_ms: 0.0,
            format,
        }
    }

    /// Append a fragment to the tail of the queue.
    ///
    /// Returns the fragment to render when the sequencer was idle; otherwise the
    /// data waits for the current fragment to finish.
    pub fn enqueue(&mut self, data: Vec<u8>) -> Option<Fragment> {
        self.queue.push_back(data);
        if self.playing {
            None
        } else {
            self.play_next()
        }
    }

    /// Pop the head of the queue and mark it as playing.
    ///
    /// An empty queue marks the sequencer idle and returns `None`.
    pub fn play_next(&mut self) -> Option<Fragment> {
        match self.queue.pop_front() {
            Some(data) => {
                self.playing = true;
                Some(Fragment { epoch: self.epoch, data })
            }
            None => {
                self.playing = false;
                None
            }
        }
    }

    /// Record the end of a render started under `epoch`.
    ///
    /// ## Parameters:
    /// - **epoch**: The epoch carried by the finished fragment
    /// - **played_bytes**: Bytes actually rendered (0 when the device failed)
    ///
    /// ## Returns:
    /// The next fragment to render, if any. Completions from an older epoch are
    /// ignored entirely: no duration accrues and the queue does not advance.
    pub fn finish(&mut self, epoch: u64, played_bytes: usize) -> Option<Fragment> {
        if epoch != self.epoch || !self.playing {
            tracing::debug!(
                "Ignoring stale playback completion (epoch {}, current {})",
                epoch,
                self.epoch
            );
            return None;
        }

        self.played_ms += self.format.duration_ms(played_bytes);
        self.play_next()
    }

    /// Discard everything queued and stop the playback cursor.
    ///
    /// The whole queue is replaced with an empty one in a single step, the epoch
    /// advances and the played-duration counter returns to zero.
    ///
    /// ## Returns:
    /// Number of fragments that were discarded.
    pub fn interrupt(&mut self) -> usize {
        let discarded = std::mem::take(&mut self.queue);
        self.playing = false;
        self.epoch += 1;
        self.played_ms = 0.0;
        discarded.len()
    }

    /// Reset the played-duration counter without touching the queue.
    pub fn reset_played(&mut self) {
        self.played_ms = 0.0;
    }

    /// Cumulative played duration in (fractional) milliseconds.
    pub fn played_ms(&self) -> f64 {
        self.played_ms
    }

    /// Played duration rounded down to whole milliseconds, as used for truncation.
    pub fn played_ms_floor(&self) -> u64 {
        self.played_ms.floor() as u64
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer() -> PlaybackSequencer {
        PlaybackSequencer::new(AudioFormat::default())
    }

    #[test]
    fn test_first_enqueue_starts_playback() {
        let mut seq = sequencer();
        let first = seq.enqueue(vec![1, 0]).unwrap();
        assert_eq!(first.data, vec![1, 0]);
        assert!(seq.is_playing());

        // Second fragment waits behind the first
        assert!(seq.enqueue(vec![2, 0]).is_none());
        assert_eq!(seq.queued(), 1);
    }

    #[test]
    fn test_fragments_play_in_arrival_order() {
        let mut seq = sequencer();
        let first = seq.enqueue(vec![1, 0]).unwrap();
        seq.enqueue(vec![2, 0]);
        seq.enqueue(vec![3, 0]);

        let mut played = vec![first.data[0]];
        let mut current = first;
        while let Some(next) = seq.finish(current.epoch, current.data.len()) {
            played.push(next.data[0]);
            current = next;
        }

        assert_eq!(played, vec![1, 2, 3]);
        assert!(!seq.is_playing());
    }

    #[test]
    fn test_played_duration_accrues_on_completion() {
        let mut seq = sequencer();
        let fragment = seq.enqueue(vec![0; 4800]).unwrap();
        // Nothing counts until the render finishes
        assert_eq!(seq.played_ms(), 0.0);

        seq.finish(fragment.epoch, fragment.data.len());
        assert_eq!(seq.played_ms(), 100.0);
    }

    #[test]
    fn test_failed_render_advances_without_accrual() {
        let mut seq = sequencer();
        let first = seq.enqueue(vec![0; 4800]).unwrap();
        seq.enqueue(vec![0; 4800]);

        let next = seq.finish(first.epoch, 0);
        assert!(next.is_some());
        assert_eq!(seq.played_ms(), 0.0);
    }

    #[test]
    fn test_interrupt_clears_everything() {
        let mut seq = sequencer();
        let first = seq.enqueue(vec![0; 4800]).unwrap();
        seq.enqueue(vec![0; 4800]);
        seq.enqueue(vec![0; 4800]);
        seq.finish(first.epoch, first.data.len());

        let discarded = seq.interrupt();
        assert_eq!(discarded, 1);
        assert_eq!(seq.queued(), 0);
        assert_eq!(seq.played_ms(), 0.0);
        assert!(!seq.is_playing());
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut seq = sequencer();
        let old = seq.enqueue(vec![0; 4800]).unwrap();
        seq.interrupt();

        // New audio after the interruption
        let fresh = seq.enqueue(vec![0; 2400]).unwrap();
        seq.enqueue(vec![0; 2400]);

        // The torn-down render reports late
        assert!(seq.finish(old.epoch, old.data.len()).is_none());
        assert_eq!(seq.played_ms(), 0.0);
        assert_eq!(seq.queued(), 1);

        // The current render still advances normally
        assert!(seq.finish(fresh.epoch, fresh.data.len()).is_some());
        assert_eq!(seq.played_ms(), 50.0);
    }

    #[test]
    fn test_played_ms_floor() {
        let mut seq = sequencer();
        // 100 bytes = 2.083ms, three of them = 6.25ms
        for _ in 0..3 {
            let fragment = seq.enqueue(vec![0; 100]).unwrap();
            seq.finish(fragment.epoch, fragment.data.len());
        }
        assert_eq!(seq.played_ms_floor(), 6);
    }
}
