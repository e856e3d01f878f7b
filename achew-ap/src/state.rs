//! Observable playback state
//!
//! The arbiter publishes immutable snapshots through a `watch` channel;
//! derived values are computed from a snapshot, never stored.

use serde::Serialize;

/// Snapshot of preview playback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    /// Segment the current request is for
    pub current_segment_id: Option<String>,
    pub is_playing: bool,
    pub loading: bool,
    /// Position in seconds
    pub current_time: f64,
    /// Duration in seconds, 0 when unknown
    pub duration: f64,
    pub volume: f32,
    /// Real playback failure, distinct from session errors
    pub error: Option<String>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_segment_id: None,
            is_playing: false,
            loading: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            error: None,
        }
    }
}

impl PlaybackState {
    /// Playback progress in percent, 0 when duration is unknown
    pub fn progress_percent(&self) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        (self.current_time / self.duration * 100.0).clamp(0.0, 100.0)
    }

    /// Whether `segment_id` is the one currently playing
    pub fn is_playing_segment(&self, segment_id: &str) -> bool {
        self.is_playing && self.current_segment_id.as_deref() == Some(segment_id)
    }
}
