//! Application wiring
//!
//! Builds the API client, push channel and session manager from resolved
//! configuration, and runs the background tasks that connect them:
//! channel status mirroring with resync on reconnect, and segment cache
//! invalidation whenever the chapter list changes shape.

use std::sync::Arc;
use std::time::Duration;

use achew_ap::{CpalMediaDevice, MediaDevice, PlaybackManager};
use achew_common::config::{websocket_url, TomlConfig};
use achew_common::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{ApiClient, SessionApi};
use crate::channel::{ChannelStatus, EventChannel};
use crate::session::{SessionManager, SessionState};

const POSITION_TICK: Duration = Duration::from_millis(250);

pub struct App {
    pub server_url: String,
    pub session: Arc<SessionManager<ApiClient>>,
    pub channel: Arc<EventChannel>,
    request_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    pub fn new(server_url: &str, config: &TomlConfig) -> Result<Self> {
        let api = Arc::new(ApiClient::new(server_url, config.request_timeout())?);
        let channel = Arc::new(EventChannel::new(
            websocket_url(server_url),
            config.channel.clone(),
        ));
        let session = SessionManager::with_edit_debounce(
            api,
            Arc::clone(&channel) as Arc<dyn crate::channel::EventSource>,
            config.edit_debounce(),
        );

        let monitor = spawn_channel_monitor(
            channel.subscribe_status(),
            channel.subscribe_connections(),
            Arc::clone(&session),
        );

        info!(server = %server_url, ws = %channel.url(), "Client initialized");

        Ok(Self {
            server_url: server_url.to_string(),
            session,
            channel,
            request_timeout: config.request_timeout(),
            tasks: vec![monitor],
        })
    }

    /// Open the default (or named) audio output for segment previews
    pub fn start_preview(
        &mut self,
        device_name: Option<String>,
    ) -> Result<Arc<PlaybackManager<CpalMediaDevice>>> {
        let device = CpalMediaDevice::new(device_name, self.request_timeout)?;
        let playback = Arc::new(PlaybackManager::new(Arc::new(device), &self.server_url));

        self.tasks.push(spawn_cache_invalidator(
            self.session.subscribe(),
            Arc::clone(&playback),
        ));
        self.tasks.push(playback.spawn_position_ticker(POSITION_TICK));
        Ok(playback)
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.channel.disconnect();
    }
}

impl Drop for App {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Mirror channel status into the session and resync after reconnects.
///
/// Events pushed while the socket was down are lost, so every connection
/// after the first triggers a full reload.
pub fn spawn_channel_monitor<A: SessionApi>(
    mut status: watch::Receiver<ChannelStatus>,
    mut connections: watch::Receiver<u64>,
    session: Arc<SessionManager<A>>,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(&session);
    drop(session);

    tokio::spawn(async move {
        let mut seen = *connections.borrow_and_update();
        match weak.upgrade() {
            Some(session) => session.set_channel_status(status.borrow_and_update().clone()),
            None => return,
        }

        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    let Some(session) = weak.upgrade() else { break };
                    session.set_channel_status(current);
                }
                changed = connections.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let count = *connections.borrow_and_update();
                    let reconnected = seen > 0 && count > seen;
                    seen = count;
                    if reconnected {
                        let Some(session) = weak.upgrade() else { break };
                        info!(connections = count, "Event channel reconnected; resyncing");
                        let _ = session.load_active_session().await;
                    }
                }
            }
        }
        debug!("Channel monitor stopped");
    })
}

/// Clear cached segment URLs whenever the ordered chapter ids change
pub fn spawn_cache_invalidator<D: MediaDevice>(
    mut session: watch::Receiver<SessionState>,
    playback: Arc<PlaybackManager<D>>,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(&playback);
    drop(playback);

    tokio::spawn(async move {
        let mut previous = chapter_ids(&session.borrow_and_update());
        while session.changed().await.is_ok() {
            let current = chapter_ids(&session.borrow_and_update());
            if current == previous {
                continue;
            }
            previous = current;
            let Some(playback) = weak.upgrade() else { break };
            debug!(chapters = previous.len(), "Chapter list changed shape; clearing segment cache");
            playback.clear_segment_cache();
        }
    })
}

fn chapter_ids(state: &SessionState) -> Vec<String> {
    state.chapter_ids().into_iter().map(str::to_string).collect()
}
