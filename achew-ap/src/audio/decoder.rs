//! Audio decoder using symphonia
//!
//! Segments arrive as complete encoded files over HTTP; they are decoded
//! from memory to interleaved stereo f32.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{MediaError, Result};

/// Decoded PCM before resampling
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved stereo f32 samples
    pub samples: Vec<f32>,
    /// Original sample rate (before resampling)
    pub sample_rate: u32,
    /// Channel count of the source
    pub source_channels: u16,
}

pub struct SegmentDecoder;

impl SegmentDecoder {
    /// Decode an entire encoded segment held in memory.
    ///
    /// `extension` (e.g. from the response MIME type) helps the probe.
    /// Mono is duplicated to both channels; channels beyond two are dropped.
    pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| MediaError::Decode(format!("Failed to probe format: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| MediaError::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| MediaError::Decode("Sample rate not found".to_string()))?;
        let source_channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| MediaError::Decode("Channel count not found".to_string()))?;

        debug!(sample_rate, channels = source_channels, "Decoding segment");

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| MediaError::Decode(format!("Failed to create decoder: {}", e)))?;

        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    warn!("Error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    push_stereo(buf.samples(), spec.channels.count(), &mut samples);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(MediaError::Decode(format!("Decoder failed: {}", e)));
                }
            }
        }

        if samples.is_empty() {
            return Err(MediaError::Decode("Segment contained no audio".to_string()));
        }

        Ok(DecodedAudio {
            samples,
            sample_rate,
            source_channels,
        })
    }
}

/// Append interleaved `channels`-wide samples as interleaved stereo
fn push_stereo(interleaved: &[f32], channels: usize, output: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            for &s in interleaved {
                output.push(s);
                output.push(s);
            }
        }
        n => {
            for frame in interleaved.chunks_exact(n) {
                output.push(frame[0]);
                output.push(frame[1]);
            }
        }
    }
}
