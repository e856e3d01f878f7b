//! Scriptable in-memory media device
//!
//! Each segment id gets a `SourceBehavior`. Loads marked `Manual` stay
//! pending until the test resolves or fails them. Follows the device
//! contract: a new source detaches pending waits and `pause` aborts an
//! in-flight `play`.

use std::collections::HashMap;
use std::sync::Mutex;

use achew_ap::{MediaDevice, MediaError};
use async_trait::async_trait;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub enum SourceBehavior {
    /// Metadata available immediately with this duration
    Ready(f64),
    /// Stays loading until `resolve` or `fail_current`
    Manual,
    /// Fetch fails as if the server were unreachable
    Unreachable,
}

#[derive(Default)]
struct Inner {
    behaviors: HashMap<String, SourceBehavior>,
    source_segment: Option<String>,
    source_epoch: u64,
    resolved: HashMap<u64, Result<f64, MediaError>>,
    interrupts: u64,
    playing: bool,
    time: f64,
    ended: bool,
    volume: f32,
    urls: Vec<String>,
    play_calls: usize,
}

pub struct FakeMediaDevice {
    inner: Mutex<Inner>,
    changes: watch::Sender<u64>,
}

fn segment_of(url: &str) -> String {
    url.rsplit("/segment/")
        .next()
        .and_then(|rest| rest.split('?').next())
        .unwrap_or(url)
        .to_string()
}

impl FakeMediaDevice {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                volume: 1.0,
                ..Inner::default()
            }),
            changes,
        }
    }

    pub fn with_behavior(self, segment_id: &str, behavior: SourceBehavior) -> Self {
        self.inner
            .lock()
            .unwrap()
            .behaviors
            .insert(segment_id.to_string(), behavior);
        self
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n += 1);
    }

    /// Resolve the current source's metadata if it is `segment_id`
    pub fn resolve(&self, segment_id: &str, duration: f64) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.source_segment.as_deref() == Some(segment_id) {
                let epoch = inner.source_epoch;
                inner.resolved.insert(epoch, Ok(duration));
            }
        }
        self.notify();
    }

    /// Fail the load of the current source
    pub fn fail_current(&self, error: MediaError) {
        {
            let mut inner = self.inner.lock().unwrap();
            let epoch = inner.source_epoch;
            inner.resolved.insert(epoch, Err(error));
        }
        self.notify();
    }

    /// Simulate playback reaching the end of the segment
    pub fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(Ok(duration)) = inner.resolved.get(&inner.source_epoch).cloned() {
            inner.time = duration;
        }
        inner.ended = true;
        inner.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().unwrap().playing
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().unwrap().volume
    }

    pub fn source_urls(&self) -> Vec<String> {
        self.inner.lock().unwrap().urls.clone()
    }

    pub fn current_segment(&self) -> Option<String> {
        self.inner.lock().unwrap().source_segment.clone()
    }

    pub fn play_calls(&self) -> usize {
        self.inner.lock().unwrap().play_calls
    }

    fn load_result(&self, epoch: u64) -> Option<Result<f64, MediaError>> {
        let inner = self.inner.lock().unwrap();
        if inner.source_epoch != epoch {
            return Some(Err(MediaError::Aborted(
                "media element detached by a new source".to_string(),
            )));
        }
        inner.resolved.get(&epoch).cloned()
    }
}

#[async_trait]
impl MediaDevice for FakeMediaDevice {
    fn set_source(&self, url: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            let segment = segment_of(url);
            inner.source_epoch += 1;
            inner.interrupts += 1;
            inner.playing = false;
            inner.ended = false;
            inner.urls.push(url.to_string());
            let epoch = inner.source_epoch;
            match inner.behaviors.get(&segment).cloned() {
                Some(SourceBehavior::Ready(duration)) => {
                    inner.resolved.insert(epoch, Ok(duration));
                }
                Some(SourceBehavior::Unreachable) => {
                    inner.resolved.insert(
                        epoch,
                        Err(MediaError::SourceUnavailable("connection refused".to_string())),
                    );
                }
                Some(SourceBehavior::Manual) | None => {}
            }
            inner.source_segment = Some(segment);
        }
        self.notify();
    }

    async fn wait_for_metadata(&self) -> achew_ap::Result<f64> {
        let epoch = self.inner.lock().unwrap().source_epoch;
        let mut rx = self.changes.subscribe();
        loop {
            if let Some(result) = self.load_result(epoch) {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(MediaError::Device("closed".to_string()));
            }
        }
    }

    async fn play(&self) -> achew_ap::Result<()> {
        let (epoch, interrupts) = {
            let mut inner = self.inner.lock().unwrap();
            inner.play_calls += 1;
            (inner.source_epoch, inner.interrupts)
        };
        let mut rx = self.changes.subscribe();
        loop {
            if self.inner.lock().unwrap().interrupts != interrupts {
                return Err(MediaError::Aborted(
                    "The play() request was interrupted by a call to pause()".to_string(),
                ));
            }
            if let Some(result) = self.load_result(epoch) {
                result?;
                let mut inner = self.inner.lock().unwrap();
                inner.playing = true;
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return Err(MediaError::Device("closed".to_string()));
            }
        }
    }

    fn pause(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.playing = false;
            inner.interrupts += 1;
        }
        self.notify();
    }

    fn set_current_time(&self, seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.time = seconds;
        inner.ended = false;
    }

    fn current_time(&self) -> f64 {
        self.inner.lock().unwrap().time
    }

    fn duration(&self) -> Option<f64> {
        let inner = self.inner.lock().unwrap();
        match inner.resolved.get(&inner.source_epoch) {
            Some(Ok(duration)) => Some(*duration),
            _ => None,
        }
    }

    fn is_ended(&self) -> bool {
        self.inner.lock().unwrap().ended
    }

    fn set_volume(&self, volume: f32) {
        self.inner.lock().unwrap().volume = volume;
    }
}
