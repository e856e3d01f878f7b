//! Test helper modules for achew-ap integration tests
//!
//! Provides reusable test infrastructure components:
//! - FakeMediaDevice: scriptable in-memory `MediaDevice`
//! - settle: drive spawned tasks until a condition holds

pub mod fake_device;

pub use fake_device::{FakeMediaDevice, SourceBehavior};

/// Yield to the runtime until `condition` holds (bounded)
pub async fn settle<F: Fn() -> bool>(condition: F) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
