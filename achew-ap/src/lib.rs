//! # achew preview player (achew-ap)
//!
//! Owns the single audio output used for chapter segment previews.
//!
//! **Purpose:** Serialize play/seek/stop/cache invalidation against one
//! media device, discarding superseded requests via generation tokens.
//!
//! **Architecture:** `PlaybackManager` (arbiter) over a `MediaDevice`;
//! the shipped device is reqwest + symphonia + rubato + cpal.

pub mod arbiter;
pub mod audio;
pub mod cpal_device;
pub mod device;
pub mod error;
pub mod segment_cache;
pub mod state;

pub use arbiter::{PlayOutcome, PlaybackManager, METADATA_TIMEOUT};
pub use cpal_device::CpalMediaDevice;
pub use device::MediaDevice;
pub use error::{MediaError, Result};
pub use state::PlaybackState;
