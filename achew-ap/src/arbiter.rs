//! Playback request arbiter
//!
//! `PlaybackManager` owns the single media device and serializes every
//! preview operation against it. Each `play` allocates a strictly
//! increasing generation token before doing anything else; a completion
//! whose token is no longer current is a zombie and must not touch shared
//! state. `stop` and `clear_segment_cache` invalidate the token too.
//!
//! Cancellation is cooperative: superseded device calls are told to stop
//! (pause or a new source), and their completions still check the token.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::device::MediaDevice;
use crate::error::MediaError;
use crate::segment_cache::SegmentUrlCache;
use crate::state::PlaybackState;

/// Bound on the metadata wait before seeking
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// How a `play` call ended
#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    /// Playback started and state reflects it
    Started,
    /// A newer request (or stop) took over; state untouched
    Superseded,
    /// Benign interruption; loading cleared, no error
    Interrupted,
    /// Real failure, surfaced in `PlaybackState::error`
    Failed(String),
}

enum WaitError {
    Superseded,
    Timeout,
    Media(MediaError),
}

pub struct PlaybackManager<D: MediaDevice> {
    device: Arc<D>,
    generation: watch::Sender<u64>,
    state: watch::Sender<PlaybackState>,
    cache: Mutex<SegmentUrlCache>,
    metadata_timeout: Duration,
}

impl<D: MediaDevice> PlaybackManager<D> {
    /// `server_url` is the normalized backend URL segments are served from
    pub fn new(device: Arc<D>, server_url: &str) -> Self {
        let (generation, _) = watch::channel(0);
        let (state, _) = watch::channel(PlaybackState::default());
        Self {
            device,
            generation,
            state,
            cache: Mutex::new(SegmentUrlCache::new(server_url)),
            metadata_timeout: METADATA_TIMEOUT,
        }
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    /// Subscribe to playback snapshots
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    /// Current generation token
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn next_generation(&self) -> u64 {
        let mut token = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            token = *g;
        });
        token
    }

    fn is_current(&self, token: u64) -> bool {
        *self.generation.borrow() == token
    }

    /// Play `segment_id`, optionally starting at `offset` seconds.
    ///
    /// Only the most recent request may change the loading flag, the
    /// playing flag or the current segment.
    pub async fn play(&self, segment_id: &str, offset: Option<f64>) -> PlayOutcome {
        let token = self.next_generation();
        debug!(segment_id, ?offset, generation = token, "Play requested");

        // Silence and reset whatever was playing
        self.device.pause();
        self.device.set_current_time(0.0);

        self.state.send_modify(|s| {
            s.current_segment_id = Some(segment_id.to_string());
            s.is_playing = false;
            s.loading = true;
            s.current_time = 0.0;
            s.duration = 0.0;
            s.error = None;
        });

        let url = match self.cache.lock() {
            Ok(mut cache) => cache.url_for(segment_id),
            Err(poisoned) => poisoned.into_inner().url_for(segment_id),
        };
        self.device.set_source(&url);

        if let Some(offset) = offset {
            match self.wait_for_metadata(token).await {
                Ok(_) if !self.is_current(token) => return PlayOutcome::Superseded,
                Ok(duration) => {
                    let target = offset.max(0.0).min(duration);
                    self.device.set_current_time(target);
                    self.state.send_modify(|s| {
                        s.duration = duration;
                        s.current_time = target;
                    });
                }
                Err(WaitError::Superseded) => {
                    debug!(segment_id, generation = token, "Metadata wait superseded");
                    return PlayOutcome::Superseded;
                }
                Err(WaitError::Timeout) => {
                    if !self.is_current(token) {
                        return PlayOutcome::Superseded;
                    }
                    let message = format!(
                        "Timed out after {}s waiting for audio metadata",
                        self.metadata_timeout.as_secs()
                    );
                    warn!(segment_id, "{}", message);
                    self.device.pause();
                    return self.fail(message);
                }
                Err(WaitError::Media(err)) => return self.settle_error(token, segment_id, err),
            }
        }

        let result = self.device.play().await;

        if !self.is_current(token) {
            debug!(segment_id, generation = token, "Discarding superseded play completion");
            return PlayOutcome::Superseded;
        }

        match result {
            Ok(()) => {
                let duration = self.device.duration().unwrap_or(0.0);
                let current_time = self.device.current_time();
                self.state.send_modify(|s| {
                    s.is_playing = true;
                    s.loading = false;
                    s.duration = duration;
                    s.current_time = current_time;
                });
                info!(segment_id, generation = token, "Preview playing");
                PlayOutcome::Started
            }
            Err(err) => self.settle_error(token, segment_id, err),
        }
    }

    async fn wait_for_metadata(&self, token: u64) -> Result<f64, WaitError> {
        let superseded = wait_until_superseded(self.generation.subscribe(), token);
        tokio::select! {
            result = self.device.wait_for_metadata() => result.map_err(WaitError::Media),
            _ = superseded => Err(WaitError::Superseded),
            _ = tokio::time::sleep(self.metadata_timeout) => Err(WaitError::Timeout),
        }
    }

    fn settle_error(&self, token: u64, segment_id: &str, err: MediaError) -> PlayOutcome {
        if !self.is_current(token) {
            return PlayOutcome::Superseded;
        }
        if err.is_interruption() {
            debug!(segment_id, error = %err, "Playback interrupted");
            self.state.send_modify(|s| {
                s.loading = false;
                s.is_playing = false;
            });
            return PlayOutcome::Interrupted;
        }
        warn!(segment_id, error = %err, "Playback failed");
        self.fail(err.to_string())
    }

    fn fail(&self, message: String) -> PlayOutcome {
        self.state.send_modify(|s| {
            s.loading = false;
            s.is_playing = false;
            s.current_segment_id = None;
            s.error = Some(message.clone());
        });
        PlayOutcome::Failed(message)
    }

    /// Stop playback and rewind to the start.
    ///
    /// Always invalidates any in-flight request.
    pub fn stop(&self) {
        let token = self.next_generation();
        debug!(generation = token, "Stop");
        self.device.pause();
        self.device.set_current_time(0.0);
        self.state.send_modify(|s| {
            s.is_playing = false;
            s.loading = false;
            s.current_time = 0.0;
            s.current_segment_id = None;
        });
    }

    /// Seek the live device; the generation token is untouched
    pub fn seek(&self, seconds: f64) {
        let target = match self.device.duration() {
            Some(duration) => seconds.clamp(0.0, duration.max(0.0)),
            None => seconds.max(0.0),
        };
        self.device.set_current_time(target);
        self.state.send_modify(|s| s.current_time = target);
    }

    /// Seek to a percentage of the current source; no-op until duration is known
    pub fn seek_percent(&self, percent: f64) {
        if let Some(duration) = self.device.duration() {
            self.seek(duration * percent.clamp(0.0, 100.0) / 100.0);
        }
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.device.set_volume(volume);
        self.state.send_modify(|s| s.volume = volume);
    }

    /// Dismiss the playback error
    pub fn clear_error(&self) {
        self.state.send_modify(|s| s.error = None);
    }

    /// Stop playback and forget every cached segment URL.
    ///
    /// Called whenever the chapter list structurally changes.
    pub fn clear_segment_cache(&self) {
        self.stop();
        let epoch = match self.cache.lock() {
            Ok(mut cache) => {
                cache.clear();
                cache.epoch()
            }
            Err(poisoned) => {
                let mut cache = poisoned.into_inner();
                cache.clear();
                cache.epoch()
            }
        };
        debug!(epoch, "Segment cache cleared");
    }

    /// Mirror device position into the snapshot; clears `is_playing` at end of segment
    pub fn refresh_position(&self) {
        let current_time = self.device.current_time();
        let duration = self.device.duration();
        let ended = self.device.is_ended();
        self.state.send_modify(|s| {
            if !s.is_playing {
                return;
            }
            s.current_time = current_time;
            if let Some(duration) = duration {
                s.duration = duration;
            }
            if ended {
                s.is_playing = false;
            }
        });
    }

    /// Periodically mirror the device position until the manager is dropped
    pub fn spawn_position_ticker(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(manager) => manager.refresh_position(),
                    None => break,
                }
            }
        })
    }
}

/// Resolve once the generation moves past `token`
async fn wait_until_superseded(mut rx: watch::Receiver<u64>, token: u64) {
    loop {
        let current = *rx.borrow_and_update();
        if current != token {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nothing can supersede this request anymore
            std::future::pending::<()>().await;
        }
    }
}
