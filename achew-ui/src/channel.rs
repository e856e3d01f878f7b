//! Push event channel
//!
//! One WebSocket connection to `<server>/ws`, re-established with bounded
//! exponential backoff. Parsed events are fanned out through a
//! `HandlerRegistry`; handlers run synchronously on the channel task in
//! arrival order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use achew_common::config::ChannelConfig;
use achew_common::{Error, EventKind, PushEvent, Result};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

type Handler = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Handle returned by `HandlerRegistry::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    kind: EventKind,
    seq: u64,
}

impl SubscriptionId {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Per-event-type subscriber lists
#[derive(Default)]
pub struct HandlerRegistry {
    next_seq: AtomicU64,
    handlers: Mutex<BTreeMap<EventKind, Vec<(u64, Handler)>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers)
            .entry(kind)
            .or_default()
            .push((seq, Arc::new(handler)));
        SubscriptionId { kind, seq }
    }

    /// Remove a handler. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = lock(&self.handlers);
        let Some(list) = handlers.get_mut(&id.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(seq, _)| *seq != id.seq);
        before != list.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        lock(&self.handlers).get(&kind).map_or(0, Vec::len)
    }

    /// Deliver an event to every handler of its kind, in subscription order.
    ///
    /// The list is snapshotted first so handlers may (un)subscribe.
    pub fn dispatch(&self, event: &PushEvent) -> usize {
        let targets: Vec<Handler> = lock(&self.handlers)
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &targets {
            handler(event);
        }
        targets.len()
    }
}

/// Observable connection status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Gave up after too many consecutive failures
    Abandoned { reason: String },
}

impl ChannelStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelStatus::Connected)
    }
}

/// Push source the session synchronizer depends on
pub trait EventSource: Send + Sync + 'static {
    fn registry(&self) -> &HandlerRegistry;

    /// Start the connection if it is not already running
    fn ensure_connected(&self);

    fn is_connected(&self) -> bool;
}

struct Shared {
    url: String,
    config: ChannelConfig,
    registry: HandlerRegistry,
    status: watch::Sender<ChannelStatus>,
    /// Successful connections so far; a bump after the first is a reconnect
    connections: watch::Sender<u64>,
}

impl Shared {
    fn set_status(&self, status: ChannelStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

/// WebSocket-backed `EventSource`
pub struct EventChannel {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventChannel {
    pub fn new(url: impl Into<String>, config: ChannelConfig) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        let (connections, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                config,
                registry: HandlerRegistry::new(),
                status,
                connections,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscribe_connections(&self) -> watch::Receiver<u64> {
        self.shared.connections.subscribe()
    }

    /// Stop the connection task; a later `ensure_connected` starts afresh
    pub fn disconnect(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        self.shared.set_status(ChannelStatus::Disconnected);
        info!(url = %self.shared.url, "Event channel disconnected");
    }
}

impl EventSource for EventChannel {
    fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    fn ensure_connected(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(run(shared)));
    }

    fn is_connected(&self) -> bool {
        self.shared.status.borrow().is_connected()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

async fn run(shared: Arc<Shared>) {
    let max_attempts = shared.config.max_reconnect_attempts;
    let mut failures: u32 = 0;

    loop {
        if *shared.connections.borrow() == 0 && failures == 0 {
            shared.set_status(ChannelStatus::Connecting);
        } else {
            shared.set_status(ChannelStatus::Reconnecting {
                attempt: failures + 1,
            });
        }

        let last_error = match tokio_tungstenite::connect_async(shared.url.as_str()).await {
            Ok((stream, _)) => {
                failures = 0;
                shared.set_status(ChannelStatus::Connected);
                shared.connections.send_modify(|n| *n += 1);
                info!(url = %shared.url, "Event channel connected");

                match pump(&shared, stream).await {
                    Ok(()) => info!("Event channel closed by server"),
                    Err(e) => warn!(error = %e, "Event channel dropped"),
                }
                None
            }
            Err(e) => {
                failures += 1;
                warn!(url = %shared.url, attempt = failures, error = %e, "Event channel connect failed");
                Some(e.to_string())
            }
        };

        if max_attempts > 0 && failures >= max_attempts {
            let reason = last_error.unwrap_or_else(|| "connection lost".to_string());
            error!(attempts = failures, reason = %reason, "Giving up on event channel");
            shared.set_status(ChannelStatus::Abandoned { reason });
            return;
        }

        let delay = shared.config.backoff(failures.max(1));
        debug!(delay_ms = delay.as_millis() as u64, "Event channel reconnect scheduled");
        tokio::time::sleep(delay).await;
    }
}

async fn pump<S>(shared: &Shared, mut stream: S) -> Result<()>
where
    S: futures_util::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| Error::Channel(e.to_string()))?;
        match message {
            Message::Text(text) => handle_text(&shared.registry, &text),
            Message::Close(frame) => {
                debug!(frame = ?frame, "Close frame received");
                return Ok(());
            }
            // Pings are answered by tungstenite itself
            _ => {}
        }
    }
    Ok(())
}

/// Parse one text frame and dispatch it
pub fn handle_text(registry: &HandlerRegistry, text: &str) {
    match PushEvent::parse(text) {
        Ok(Some(event)) => {
            let delivered = registry.dispatch(&event);
            debug!(event_type = event.event_type(), handlers = delivered, "Push event dispatched");
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Malformed push event"),
    }
}
