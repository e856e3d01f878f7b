//! Per-key settle timers for user edits
//!
//! Each `schedule` for a key cancels that key's pending timer and starts a
//! new one, so only the settled value reaches the sink. `flush` sends every
//! pending value immediately.
//!
//! Timers run on the runtime captured at construction, or the caller's
//! runtime. Without either a value is held until the next `flush`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Sink<K, V> = Arc<dyn Fn(K, V) -> BoxFuture<'static, ()> + Send + Sync>;

struct Pending<V> {
    value: V,
    token: u64,
    task: Option<JoinHandle<()>>,
}

impl<V> Pending<V> {
    fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

type PendingMap<K, V> = Arc<Mutex<HashMap<K, Pending<V>>>>;

pub struct Debouncer<K, V> {
    delay: Duration,
    pending: PendingMap<K, V>,
    next_token: Mutex<u64>,
    sink: Sink<K, V>,
    runtime: Option<Handle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
    V: Clone + Send + 'static,
{
    pub fn new<F>(delay: Duration, sink: F) -> Self
    where
        F: Fn(K, V) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: Mutex::new(0),
            sink: Arc::new(sink),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace any pending value for `key` and restart its timer
    pub fn schedule(&self, key: K, value: V) {
        let token = {
            let mut next = lock(&self.next_token);
            *next += 1;
            *next
        };

        let pending = Arc::clone(&self.pending);
        let sink = Arc::clone(&self.sink);
        let delay = self.delay;
        let timer_key = key.clone();

        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!(key = ?key, "No runtime for settle timer; holding value until flush");
            if let Some(previous) = lock(&self.pending).insert(key, Pending { value, token, task: None }) {
                previous.abort();
            }
            return;
        };

        let mut map = lock(&self.pending);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let settled = {
                let mut map = lock(&pending);
                match map.get(&timer_key) {
                    Some(entry) if entry.token == token => map.remove(&timer_key).map(|e| e.value),
                    _ => None,
                }
            };
            if let Some(value) = settled {
                debug!(key = ?timer_key, "Edit settled");
                sink(timer_key, value).await;
            }
        });

        let entry = Pending {
            value,
            token,
            task: Some(task),
        };
        if let Some(previous) = map.insert(key, entry) {
            previous.abort();
        }
    }

    /// Send every pending value now, in no particular order
    pub async fn flush(&self) {
        let drained: Vec<(K, V)> = {
            let mut map = lock(&self.pending);
            map.drain()
                .map(|(key, entry)| {
                    entry.abort();
                    (key, entry.value)
                })
                .collect()
        };
        for (key, value) in drained {
            (self.sink)(key, value).await;
        }
    }

    /// Drop every pending value without sending
    pub fn cancel_all(&self) {
        let mut map = lock(&self.pending);
        for (_, entry) in map.drain() {
            entry.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.pending).contains_key(key)
    }
}

impl<K, V> Drop for Debouncer<K, V> {
    fn drop(&mut self) {
        let mut map = lock(&self.pending);
        for (_, entry) in map.drain() {
            entry.abort();
        }
    }
}
