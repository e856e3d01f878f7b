//! Media device seam
//!
//! The arbiter is the only caller of a `MediaDevice`. Implementations own
//! exactly one audio output and one current source at a time.

use async_trait::async_trait;

use crate::error::Result;

/// One addressable audio output with a single current source
///
/// Semantics every implementation must honor:
/// - `set_source` detaches any previous source; pending waits on the old
///   source fail with `MediaError::Aborted`.
/// - `pause` makes an in-flight `play` fail with `MediaError::Aborted`.
/// - `set_current_time` before metadata is known is clamped once it is.
#[async_trait]
pub trait MediaDevice: Send + Sync + 'static {
    /// Assign a new source URL and begin loading it
    fn set_source(&self, url: &str);

    /// Resolve with the source duration in seconds once metadata is known
    async fn wait_for_metadata(&self) -> Result<f64>;

    /// Start playback of the current source
    async fn play(&self) -> Result<()>;

    fn pause(&self);

    fn set_current_time(&self, seconds: f64);

    fn current_time(&self) -> f64;

    /// Duration of the current source, `None` until metadata is known
    fn duration(&self) -> Option<f64>;

    fn is_ended(&self) -> bool;

    /// Output gain, 0.0..=1.0
    fn set_volume(&self, volume: f32);
}
