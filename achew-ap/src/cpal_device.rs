//! `MediaDevice` backed by a cpal output stream
//!
//! Segments are fetched whole over HTTP, decoded and resampled off the
//! async threads, then rendered from RAM by the cpal callback. The cpal
//! stream lives on a dedicated audio thread for the device's lifetime.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, AudioOutput, Resampler, SegmentBuffer, SegmentDecoder};
use crate::device::MediaDevice;
use crate::error::{MediaError, Result};

#[derive(Debug, Clone)]
enum LoadState {
    Empty,
    Loading { epoch: u64 },
    Ready { epoch: u64, duration: f64 },
    Failed { epoch: u64, error: MediaError },
}

/// State shared with the audio callback
struct Shared {
    buffer: Mutex<Option<Arc<SegmentBuffer>>>,
    position: AtomicUsize,
    playing: AtomicBool,
    pending_seek: Mutex<Option<f64>>,
}

impl Shared {
    fn next_frame(&self) -> AudioFrame {
        if !self.playing.load(Ordering::Acquire) {
            return AudioFrame::zero();
        }
        // Never block the audio thread
        let Ok(guard) = self.buffer.try_lock() else {
            return AudioFrame::zero();
        };
        let Some(buffer) = guard.as_ref() else {
            return AudioFrame::zero();
        };
        let pos = self.position.fetch_add(1, Ordering::AcqRel);
        match buffer.get_frame(pos) {
            Some(frame) => frame,
            None => {
                self.playing.store(false, Ordering::Release);
                self.position.store(buffer.frame_count, Ordering::Release);
                AudioFrame::zero()
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CpalMediaDevice {
    client: reqwest::Client,
    runtime: Handle,
    shared: Arc<Shared>,
    volume: Arc<Mutex<f32>>,
    load: Arc<watch::Sender<LoadState>>,
    interrupts: watch::Sender<u64>,
    source_epoch: Arc<AtomicU64>,
    output_rate: u32,
    shutdown: Mutex<mpsc::Sender<()>>,
}

impl CpalMediaDevice {
    /// Open the output device and start its audio thread.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(device_name: Option<String>, request_timeout: Duration) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| MediaError::Device(format!("No async runtime available: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| MediaError::Device(format!("Failed to build HTTP client: {}", e)))?;

        let shared = Arc::new(Shared {
            buffer: Mutex::new(None),
            position: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
            pending_seek: Mutex::new(None),
        });
        let volume = Arc::new(Mutex::new(1.0f32));

        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_shared = Arc::clone(&shared);
        let thread_volume = Arc::clone(&volume);
        std::thread::Builder::new()
            .name("achew-audio".to_string())
            .spawn(move || {
                let mut output = match AudioOutput::new_with_volume(device_name.as_deref(), thread_volume) {
                    Ok(output) => output,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let rate = output.sample_rate();
                if let Err(e) = output.start(move || thread_shared.next_frame()) {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                let _ = ready_tx.send(Ok(rate));

                let mut reported = false;
                loop {
                    match shutdown_rx.recv_timeout(Duration::from_secs(1)) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            if output.has_error() && !reported {
                                warn!("Audio stream reported an error; output may be silent");
                                reported = true;
                            }
                        }
                    }
                }
                output.stop();
                debug!("Audio thread exiting");
            })
            .map_err(|e| MediaError::Device(format!("Failed to spawn audio thread: {}", e)))?;

        let output_rate = ready_rx
            .recv()
            .map_err(|_| MediaError::Device("Audio thread exited during startup".to_string()))??;
        info!(output_rate, "Preview audio device ready");

        let (load, _) = watch::channel(LoadState::Empty);
        let load = Arc::new(load);
        let (interrupts, _) = watch::channel(0u64);

        Ok(Self {
            client,
            runtime,
            shared,
            volume,
            load,
            interrupts,
            source_epoch: Arc::new(AtomicU64::new(0)),
            output_rate,
            shutdown: Mutex::new(shutdown_tx),
        })
    }

    fn interrupt(&self) {
        self.interrupts.send_modify(|n| *n += 1);
    }

    async fn wait_loaded(&self) -> Result<f64> {
        let epoch = self.source_epoch.load(Ordering::Acquire);
        let mut rx = self.load.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                LoadState::Ready { epoch: e, duration } if e == epoch => return Ok(duration),
                LoadState::Failed { epoch: e, error } if e == epoch => return Err(error),
                LoadState::Loading { epoch: e } if e == epoch => {}
                LoadState::Empty => {
                    return Err(MediaError::Aborted("No media source assigned".to_string()));
                }
                _ => {
                    return Err(MediaError::Aborted(
                        "Media source detached by a newer source".to_string(),
                    ));
                }
            }
            if rx.changed().await.is_err() {
                return Err(MediaError::Device("Device closed".to_string()));
            }
        }
    }
}

/// Fetch, decode and resample one segment
async fn load_segment(client: reqwest::Client, url: String, output_rate: u32) -> Result<SegmentBuffer> {
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| MediaError::SourceUnavailable(format!("Failed to fetch segment: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::SourceUnavailable(format!(
            "Segment request returned HTTP {}",
            status.as_u16()
        )));
    }

    let extension = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(extension_for_mime)
        .map(str::to_string);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| MediaError::SourceUnavailable(format!("Failed to read segment: {}", e)))?;

    tokio::task::spawn_blocking(move || {
        let decoded = SegmentDecoder::decode_bytes(bytes.to_vec(), extension.as_deref())?;
        let samples = Resampler::resample(&decoded.samples, decoded.sample_rate, output_rate, 2)?;
        Ok(SegmentBuffer::new(samples, output_rate))
    })
    .await
    .map_err(|e| MediaError::Decode(format!("Decode task failed: {}", e)))?
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or("").trim();
    match essence {
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/ogg" | "audio/vorbis" => Some("ogg"),
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" | "audio/aac" => Some("m4a"),
        _ => None,
    }
}

#[async_trait]
impl MediaDevice for CpalMediaDevice {
    fn set_source(&self, url: &str) {
        let epoch = self.source_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.playing.store(false, Ordering::Release);
        *lock(&self.shared.buffer) = None;
        *lock(&self.shared.pending_seek) = None;
        self.shared.position.store(0, Ordering::Release);
        self.load.send_replace(LoadState::Loading { epoch });
        self.interrupt();

        debug!(url, epoch, "Loading preview source");

        let client = self.client.clone();
        let url = url.to_string();
        let output_rate = self.output_rate;
        let shared = Arc::clone(&self.shared);
        let source_epoch = Arc::clone(&self.source_epoch);
        let load = Arc::clone(&self.load);

        self.runtime.spawn(async move {
            let result = load_segment(client, url, output_rate).await;
            if source_epoch.load(Ordering::Acquire) != epoch {
                debug!(epoch, "Dropping load for detached source");
                return;
            }
            match result {
                Ok(buffer) => {
                    let duration = buffer.duration_seconds();
                    let start = lock(&shared.pending_seek)
                        .take()
                        .map(|secs| buffer.frame_at(secs))
                        .unwrap_or(0);
                    shared.position.store(start, Ordering::Release);
                    *lock(&shared.buffer) = Some(Arc::new(buffer));
                    load.send_replace(LoadState::Ready { epoch, duration });
                }
                Err(error) => {
                    warn!(error = %error, "Preview source failed to load");
                    load.send_replace(LoadState::Failed { epoch, error });
                }
            }
        });
    }

    async fn wait_for_metadata(&self) -> Result<f64> {
        self.wait_loaded().await
    }

    async fn play(&self) -> Result<()> {
        let interrupt = *self.interrupts.borrow();
        let mut interrupts = self.interrupts.subscribe();

        let interrupted = async move {
            loop {
                let current = *interrupts.borrow_and_update();
                if current != interrupt || interrupts.changed().await.is_err() {
                    return;
                }
            }
        };

        tokio::select! {
            result = self.wait_loaded() => { result?; }
            _ = interrupted => {
                return Err(MediaError::Aborted(
                    "play() request was interrupted by a call to pause()".to_string(),
                ));
            }
        }

        if *self.interrupts.borrow() != interrupt {
            return Err(MediaError::Aborted(
                "play() request was interrupted by a call to pause()".to_string(),
            ));
        }

        if self.is_ended() {
            self.shared.position.store(0, Ordering::Release);
        }
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) {
        self.shared.playing.store(false, Ordering::Release);
        self.interrupt();
    }

    fn set_current_time(&self, seconds: f64) {
        let guard = lock(&self.shared.buffer);
        match guard.as_ref() {
            Some(buffer) => self.shared.position.store(buffer.frame_at(seconds), Ordering::Release),
            None => *lock(&self.shared.pending_seek) = Some(seconds.max(0.0)),
        }
    }

    fn current_time(&self) -> f64 {
        let position = self.shared.position.load(Ordering::Acquire);
        if lock(&self.shared.buffer).is_none() {
            return lock(&self.shared.pending_seek).unwrap_or(0.0);
        }
        position as f64 / self.output_rate as f64
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.shared.buffer).as_ref().map(|b| b.duration_seconds())
    }

    fn is_ended(&self) -> bool {
        match lock(&self.shared.buffer).as_ref() {
            Some(buffer) => self.shared.position.load(Ordering::Acquire) >= buffer.frame_count,
            None => false,
        }
    }

    fn set_volume(&self, volume: f32) {
        *lock(&self.volume) = volume.clamp(0.0, 1.0);
    }
}

impl Drop for CpalMediaDevice {
    fn drop(&mut self) {
        let _ = lock(&self.shutdown).send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("audio/wav"), Some("wav"));
        assert_eq!(extension_for_mime("audio/mpeg; charset=binary"), Some("mp3"));
        assert_eq!(extension_for_mime("application/octet-stream"), None);
    }

    #[test]
    fn test_callback_stops_at_end_of_buffer() {
        let shared = Shared {
            buffer: Mutex::new(Some(Arc::new(SegmentBuffer::new(vec![0.5, -0.5], 44100)))),
            position: AtomicUsize::new(0),
            playing: AtomicBool::new(true),
            pending_seek: Mutex::new(None),
        };
        assert_eq!(shared.next_frame(), AudioFrame { left: 0.5, right: -0.5 });
        assert_eq!(shared.next_frame(), AudioFrame::zero());
        assert!(!shared.playing.load(Ordering::Acquire));
        assert_eq!(shared.position.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_callback_silent_when_paused() {
        let shared = Shared {
            buffer: Mutex::new(Some(Arc::new(SegmentBuffer::new(vec![0.5, 0.5], 44100)))),
            position: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
            pending_seek: Mutex::new(None),
        };
        assert_eq!(shared.next_frame(), AudioFrame::zero());
        assert_eq!(shared.position.load(Ordering::Acquire), 0);
    }
}
