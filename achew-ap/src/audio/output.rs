//! Audio output using cpal
//!
//! Manages the output device with callback-based playback. A cpal
//! `Stream` is not `Send`; an `AudioOutput` must stay on the thread that
//! created it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tracing::{debug, error, info, warn};

use crate::audio::AudioFrame;
use crate::error::{MediaError, Result};

/// Preferred output rate when the device supports it
pub const PREFERRED_SAMPLE_RATE: u32 = 44100;

/// Audio output manager using cpal.
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    volume: Arc<Mutex<f32>>,
    /// Stream error flag - set by audio callback on error
    error_flag: Arc<AtomicBool>,
}

impl AudioOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| MediaError::Device(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device with shared volume control.
    ///
    /// Falls back to the default device when `device_name` is not found.
    pub fn new_with_volume(device_name: Option<&str>, volume: Arc<Mutex<f32>>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| MediaError::Device(format!("Failed to enumerate devices: {}", e)))?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("Found requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                        host.default_output_device().ok_or_else(|| {
                            MediaError::Device(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| MediaError::Device("No default output device found".to_string()))?,
        };

        let (config, sample_format) = Self::get_best_config(&device)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            volume,
            error_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Prefer 44.1kHz stereo f32, else the device default.
    fn get_best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut supported_configs = device
            .supported_output_configs()
            .map_err(|e| MediaError::Device(format!("Failed to get device configs: {}", e)))?;

        let preferred = supported_configs.find(|config| {
            config.channels() == 2
                && config.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
                && config.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
                && config.sample_format() == SampleFormat::F32
        });

        if let Some(supported_config) = preferred {
            let sample_format = supported_config.sample_format();
            let config = supported_config
                .with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE))
                .config();
            return Ok((config, sample_format));
        }

        let supported_config = device
            .default_output_config()
            .map_err(|e| MediaError::Device(format!("Failed to get default config: {}", e)))?;
        Ok((supported_config.config(), supported_config.sample_format()))
    }

    /// Start the stream; `callback` is invoked on the audio thread per frame.
    ///
    /// The callback must not block. Volume is applied after it.
    pub fn start<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut() -> AudioFrame + Send + 'static,
    {
        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32, F>(callback)?,
            SampleFormat::I16 => self.build_stream::<i16, F>(callback)?,
            SampleFormat::U16 => self.build_stream::<u16, F>(callback)?,
            sample_format => {
                return Err(MediaError::Device(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| MediaError::Device(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);
        info!("Audio stream started");
        Ok(())
    }

    fn build_stream<T, F>(&self, mut callback: F) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
        F: FnMut() -> AudioFrame + Send + 'static,
    {
        let channels = self.config.channels as usize;
        let volume = Arc::clone(&self.volume);
        let error_flag = Arc::clone(&self.error_flag);

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let gain = volume.lock().map(|v| *v).unwrap_or(1.0);
                    for frame in data.chunks_mut(channels) {
                        let audio = callback();
                        let left = (audio.left * gain).clamp(-1.0, 1.0);
                        let right = (audio.right * gain).clamp(-1.0, 1.0);
                        for (idx, sample) in frame.iter_mut().enumerate() {
                            let value = match idx {
                                0 => left,
                                1 => right,
                                _ => 0.0,
                            };
                            *sample = T::from_sample(value);
                        }
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| MediaError::Device(format!("Failed to build stream: {}", e)))
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause stream: {}", e);
            }
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
