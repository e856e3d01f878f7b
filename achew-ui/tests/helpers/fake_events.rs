//! In-process `EventSource`: tests push events straight into the registry

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use achew_common::PushEvent;
use achew_ui::{EventSource, HandlerRegistry};

pub struct FakeEvents {
    registry: HandlerRegistry,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
}

impl FakeEvents {
    pub fn connected() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            connected: AtomicBool::new(true),
            connect_calls: AtomicUsize::new(0),
        }
    }

    pub fn disconnected() -> Self {
        let events = Self::connected();
        events.set_connected(false);
        events
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Deliver an event as the socket task would
    pub fn push(&self, event: PushEvent) -> usize {
        self.registry.dispatch(&event)
    }

    /// Deliver a raw wire frame
    pub fn push_text(&self, text: &str) {
        achew_ui::channel::handle_text(&self.registry, text);
    }
}

impl EventSource for FakeEvents {
    fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    fn ensure_connected(&self) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
