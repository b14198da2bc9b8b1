//! # PCM Format Helpers
//!
//! Duration math and frame validation for 16-bit little-endian mono PCM, the
//! only format the relay speaks in both directions.
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 24kHz by default (configurable)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

use crate::config::AudioConfig;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// The PCM format used for captured and played audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            bit_depth: 16,
        }
    }
}

impl From<&AudioConfig> for AudioFormat {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bit_depth: config.bit_depth,
        }
    }
}

impl AudioFormat {
    /// Playback duration of `bytes` of audio in milliseconds.
    ///
    /// ## Calculation:
    /// bytes / 2 / sample_rate * 1000
    ///
    /// ## Example:
    /// 48,000 bytes at 24kHz = 24,000 samples = 1000ms
    ///
    /// The result is fractional on purpose; callers accumulate it and floor only
    /// when a whole number of milliseconds is needed.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        let samples = bytes as f64 / BYTES_PER_SAMPLE as f64;
        samples / self.sample_rate as f64 * 1000.0
    }

    /// Check that a captured frame holds whole 16-bit samples.
    ///
    /// ## Validation Checks:
    /// 1. **Data length**: Must not be empty
    /// 2. **Alignment**: Must be even (for 16-bit samples)
    pub fn validate_chunk(&self, data: &[u8]) -> Result<(), String> {
        if data.is_empty() {
            return Err("Audio data is empty".to_string());
        }

        if data.len() % BYTES_PER_SAMPLE != 0 {
            return Err("Audio data length must be even for 16-bit samples".to_string());
        }

        Ok(())
    }
}

/// Peak absolute sample value of a PCM frame, normalized to 0.0 - 1.0.
///
/// Used for the debug-level input level logging on captured frames.
pub fn peak_level(data: &[u8]) -> f32 {
    let mut cursor = Cursor::new(data);
    let mut peak: i32 = 0;

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        peak = peak.max((sample as i32).abs());
    }

    peak as f32 / i16::MAX as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_one_second() {
        let format = AudioFormat::default();
        // 24,000 samples * 2 bytes = 1 second at 24kHz
        assert_eq!(format.duration_ms(48_000), 1000.0);
        assert_eq!(format.duration_ms(0), 0.0);
    }

    #[test]
    fn test_duration_is_fractional() {
        let format = AudioFormat::default();
        // 100 bytes = 50 samples = 2.0833... ms
        let ms = format.duration_ms(100);
        assert!(ms > 2.08 && ms < 2.09);
    }

    #[test]
    fn test_validate_chunk() {
        let format = AudioFormat::default();
        assert!(format.validate_chunk(&[0, 0, 1, 0]).is_ok());
        assert!(format.validate_chunk(&[]).is_err());
        assert!(format.validate_chunk(&[0, 0, 1]).is_err());
    }

    #[test]
    fn test_peak_level() {
        // Samples: 0, 16384, -32767
        let data = [0x00, 0x00, 0x00, 0x40, 0x01, 0x80];
        assert_eq!(peak_level(&data), 1.0);
        assert_eq!(peak_level(&[0, 0, 0, 0]), 0.0);
    }
}
