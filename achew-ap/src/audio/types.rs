//! Core audio data types
//!
//! A decoded segment is held entirely in RAM as interleaved stereo f32 at
//! the output device rate, so seeking is a frame index change.

/// Single stereo frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFrame {
    pub left: f32,
    pub right: f32,
}

impl AudioFrame {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// SegmentBuffer holds decoded and resampled audio ready for playback.
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Stereo interleaved: [L, R, L, R, ...]
/// - Sample rate matches the output device
#[derive(Debug, Clone)]
pub struct SegmentBuffer {
    /// PCM audio samples (interleaved stereo)
    pub samples: Vec<f32>,

    pub sample_rate: u32,

    /// Number of stereo frames (samples.len() / 2)
    pub frame_count: usize,
}

impl SegmentBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let frame_count = samples.len() / 2;
        Self {
            samples,
            sample_rate,
            frame_count,
        }
    }

    /// Get duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Get audio frame at specific frame index
    pub fn get_frame(&self, frame_index: usize) -> Option<AudioFrame> {
        let sample_index = frame_index * 2;
        if sample_index + 1 < self.samples.len() {
            Some(AudioFrame {
                left: self.samples[sample_index],
                right: self.samples[sample_index + 1],
            })
        } else {
            None
        }
    }

    /// Frame index for a position in seconds, clamped to the buffer
    pub fn frame_at(&self, seconds: f64) -> usize {
        let frame = (seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        frame.min(self.frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_buffer_duration() {
        let buffer = SegmentBuffer::new(vec![0.0; 44100 * 2 * 3], 44100);
        assert_eq!(buffer.frame_count, 44100 * 3);
        assert_eq!(buffer.duration_seconds(), 3.0);
    }

    #[test]
    fn test_get_frame() {
        let buffer = SegmentBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 48000);
        assert_eq!(buffer.get_frame(1), Some(AudioFrame { left: 0.3, right: 0.4 }));
        assert_eq!(buffer.get_frame(2), None);
    }

    #[test]
    fn test_frame_at_clamps() {
        let buffer = SegmentBuffer::new(vec![0.0; 200], 100);
        assert_eq!(buffer.frame_at(0.5), 50);
        assert_eq!(buffer.frame_at(-1.0), 0);
        assert_eq!(buffer.frame_at(60.0), 100);
    }
}
