//! Audio pipeline for segment previews
//!
//! fetch (reqwest) → decode (symphonia) → resample (rubato) → output (cpal)

pub mod decoder;
pub mod output;
pub mod resampler;
pub mod types;

pub use decoder::{DecodedAudio, SegmentDecoder};
pub use output::AudioOutput;
pub use resampler::Resampler;
pub use types::{AudioFrame, SegmentBuffer};
