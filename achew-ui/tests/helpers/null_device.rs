//! Media device that loads instantly and never makes a sound

use std::sync::Mutex;

use achew_ap::MediaDevice;
use async_trait::async_trait;

#[derive(Default)]
pub struct NullDevice {
    time: Mutex<f64>,
}

#[async_trait]
impl MediaDevice for NullDevice {
    fn set_source(&self, _url: &str) {}

    async fn wait_for_metadata(&self) -> achew_ap::Result<f64> {
        Ok(30.0)
    }

    async fn play(&self) -> achew_ap::Result<()> {
        Ok(())
    }

    fn pause(&self) {}

    fn set_current_time(&self, seconds: f64) {
        *self.time.lock().unwrap() = seconds;
    }

    fn current_time(&self) -> f64 {
        *self.time.lock().unwrap()
    }

    fn duration(&self) -> Option<f64> {
        Some(30.0)
    }

    fn is_ended(&self) -> bool {
        false
    }

    fn set_volume(&self, _volume: f32) {}
}
