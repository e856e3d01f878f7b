//! Test helper modules for achew-ui integration tests
//!
//! Provides reusable test infrastructure components:
//! - MockApi: scriptable in-memory `SessionApi`
//! - FakeEvents: push source driven directly by the test
//! - NullDevice: silent `MediaDevice` for wiring tests
//! - settle / wait_until: drive spawned tasks until a condition holds

#![allow(dead_code)]

pub mod fake_events;
pub mod mock_api;
pub mod null_device;

use std::sync::Arc;

use achew_ui::SessionManager;

pub use fake_events::FakeEvents;
pub use mock_api::{book, chapter, chapter_list, snapshot, status, MockApi};
pub use null_device::NullDevice;

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

/// Poll `condition` on wall-clock time; for multi-threaded runtimes
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..5000 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Manager over a mock API and a connected fake channel
pub fn manager(api: MockApi) -> (Arc<SessionManager<MockApi>>, Arc<MockApi>, Arc<FakeEvents>) {
    manager_with(api, FakeEvents::connected())
}

pub fn manager_with(
    api: MockApi,
    events: FakeEvents,
) -> (Arc<SessionManager<MockApi>>, Arc<MockApi>, Arc<FakeEvents>) {
    let api = Arc::new(api);
    let events = Arc::new(events);
    let session = SessionManager::new(
        Arc::clone(&api),
        Arc::clone(&events) as Arc<dyn achew_ui::EventSource>,
    );
    (session, api, events)
}
