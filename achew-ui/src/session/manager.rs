//! Session state synchronizer
//!
//! `SessionManager` is the only writer of `SessionState`. It merges full
//! pulls issued by its own operations with push events delivered through
//! an `EventSource`, and exposes the imperative operations the interface
//! drives. State is published through a `watch` channel; every update is
//! a single `send_modify`, so observers never see a half-applied merge.
//!
//! Race rule: once the channel is connected the push stream owns `step`.
//! Each applied step push bumps `step_epoch`; a pull remembers the epoch it
//! was issued under and keeps the local step if the epoch moved meanwhile.
//! Epochs are only bumped and compared inside the watch write closure, so
//! the write lock orders them with the state they guard.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use achew_common::models::{
    AiCleanupOptions, AsrAction, AsrOptions, CreateSessionRequest, EditorSettings, ExportDocument,
    LlmProviderConfig, SmartDetectConfig, SourceType, Step,
};
use achew_common::time::parse_timestamp;
use achew_common::{Error, EventKind, PushEvent, RequestCategory, Result};
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::reconcile::{apply_chapter_list, apply_push, apply_snapshot, PushOutcome};
use super::state::{source_type_for, SessionError, SessionState};
use crate::api::SessionApi;
use crate::channel::{ChannelStatus, EventSource, SubscriptionId};
use crate::debounce::Debouncer;

/// Default settle delay for title edits
pub const EDIT_DEBOUNCE: Duration = Duration::from_millis(600);

const HANDLED_EVENTS: [EventKind; 6] = [
    EventKind::ProgressUpdate,
    EventKind::StepChange,
    EventKind::ChapterUpdate,
    EventKind::HistoryUpdate,
    EventKind::Status,
    EventKind::Error,
];

pub struct SessionManager<A: SessionApi> {
    api: Arc<A>,
    events: Arc<dyn EventSource>,
    state: watch::Sender<SessionState>,
    /// Bumped by every applied step push
    step_epoch: AtomicU64,
    /// Bumped by every local reset; pulls issued before one are dropped
    reset_epoch: AtomicU64,
    /// In-flight session loads; `loading` is true while any is pending
    loads: AtomicUsize,
    /// In-flight configuration round trips
    config_requests: AtomicUsize,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    edits: Debouncer<String, String>,
    weak: Weak<Self>,
}

impl<A: SessionApi> SessionManager<A> {
    pub fn new(api: Arc<A>, events: Arc<dyn EventSource>) -> Arc<Self> {
        Self::with_edit_debounce(api, events, EDIT_DEBOUNCE)
    }

    pub fn with_edit_debounce(
        api: Arc<A>,
        events: Arc<dyn EventSource>,
        edit_debounce: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let sink_owner = weak.clone();
            let edits = Debouncer::new(edit_debounce, move |chapter_id: String, title: String| {
                let owner = sink_owner.clone();
                async move {
                    if let Some(manager) = owner.upgrade() {
                        // Failures are already recorded in the session error
                        let _ = manager.update_title(&chapter_id, &title).await;
                    }
                }
                .boxed()
            });

            let (state, _) = watch::channel(SessionState::default());
            Self {
                api,
                events,
                state,
                step_epoch: AtomicU64::new(0),
                reset_epoch: AtomicU64::new(0),
                loads: AtomicUsize::new(0),
                config_requests: AtomicUsize::new(0),
                subscriptions: Mutex::new(Vec::new()),
                edits,
                weak: weak.clone(),
            }
        })
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Subscribe to state snapshots
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn step_epoch(&self) -> u64 {
        self.step_epoch.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Push handling
    // ------------------------------------------------------------------

    /// Register this manager's push handlers (idempotent)
    pub fn attach_handlers(&self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !subscriptions.is_empty() {
            return;
        }
        let registry = self.events.registry();
        for kind in HANDLED_EVENTS {
            let owner = self.weak.clone();
            subscriptions.push(registry.subscribe(kind, move |event| {
                if let Some(manager) = owner.upgrade() {
                    manager.handle_push(event);
                }
            }));
        }
        debug!(handlers = subscriptions.len(), "Session push handlers attached");
    }

    pub fn detach_handlers(&self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let registry = self.events.registry();
        for id in subscriptions.drain(..) {
            registry.unsubscribe(id);
        }
    }

    /// Apply one push event
    pub fn handle_push(&self, event: &PushEvent) {
        let mut outcome = PushOutcome::Ignored;
        self.state.send_if_modified(|state| {
            outcome = apply_push(state, event);
            match outcome {
                PushOutcome::StepChanged => {
                    self.step_epoch.fetch_add(1, Ordering::SeqCst);
                }
                PushOutcome::ResetToIdle => {
                    self.step_epoch.fetch_add(1, Ordering::SeqCst);
                    self.reset_epoch.fetch_add(1, Ordering::SeqCst);
                    self.restore_flags(state);
                }
                _ => {}
            }
            outcome != PushOutcome::Ignored
        });

        match outcome {
            PushOutcome::StepChanged => {
                debug!(step = %self.state.borrow().step, "Step pushed");
            }
            PushOutcome::ResetToIdle => {
                self.edits.cancel_all();
                info!("Server returned to idle; session cleared");
            }
            PushOutcome::NeedsReload => self.spawn_reload(),
            PushOutcome::Applied | PushOutcome::Ignored => {}
        }
    }

    fn spawn_reload(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available for session reload");
            return;
        };
        let owner = self.weak.clone();
        handle.spawn(async move {
            if let Some(manager) = owner.upgrade() {
                let _ = manager.load_session().await;
            }
        });
    }

    /// Mirror the push channel's status; abandonment surfaces as an error
    pub fn set_channel_status(&self, status: ChannelStatus) {
        self.state.send_modify(|state| {
            if let ChannelStatus::Abandoned { reason } = &status {
                let err = Error::Channel(reason.clone());
                state.error = Some(SessionError::from(&err));
            }
            state.channel = status;
        });
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(error = %e, "Session operation failed");
            let session_error = SessionError::from(e);
            self.state.send_modify(|state| state.error = Some(session_error));
        }
        result
    }

    fn reject<T>(&self, message: impl Into<String>) -> Result<T> {
        self.record(Err(Error::Validation(message.into())))
    }

    /// Count one in-flight operation against `flag` until the guard drops
    fn track(&self, flag: Busy) -> InFlight<'_, A> {
        self.state.send_modify(|state| {
            self.counter(flag).fetch_add(1, Ordering::SeqCst);
            self.restore_flags(state);
        });
        InFlight { manager: self, flag }
    }

    fn counter(&self, flag: Busy) -> &AtomicUsize {
        match flag {
            Busy::Session => &self.loads,
            Busy::Config => &self.config_requests,
        }
    }

    /// Re-derive the busy flags from the in-flight counters
    fn restore_flags(&self, state: &mut SessionState) {
        state.loading = self.loads.load(Ordering::SeqCst) > 0;
        state.config_loading = self.config_requests.load(Ordering::SeqCst) > 0;
    }

    /// Reset to idle and start a new reset epoch, atomically with the state
    fn reset_local(&self, source_mode: Option<SourceType>, step: Option<Step>) {
        self.state.send_modify(|state| {
            self.reset_epoch.fetch_add(1, Ordering::SeqCst);
            state.reset_to_idle(source_mode);
            if let Some(step) = step {
                state.step = step;
            }
            self.restore_flags(state);
        });
    }

    async fn with_config_loading<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let busy = self.track(Busy::Config);
        let result = request.await;
        drop(busy);
        self.record(result)
    }

    fn connect_events(&self) {
        self.attach_handlers();
        self.events.ensure_connected();
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Start a new session for an ABS or local item
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<()> {
        let item_id = match request.resolve_item() {
            Ok(id) => id,
            Err(e) => return self.record(Err(e)),
        };
        if self.state.borrow().has_session() {
            return self.reject("A session is already active; delete it before starting another");
        }

        // Handlers must be listening before the server starts pushing
        self.connect_events();

        let busy = self.track(Busy::Session);
        self.state.send_modify(|state| {
            state.item_id = Some(item_id.clone());
            state.source_type = Some(request.source_type);
            state.local_media_layout = request.local_layout.clone();
            state.error = None;
        });

        if let Err(e) = self.api.create_pipeline(&request).await {
            self.state.send_modify(|state| {
                state.item_id = None;
                state.source_type = None;
                state.local_media_layout = None;
            });
            drop(busy);
            return self.record(Err(e));
        }

        info!(item_id = %item_id, source_type = ?request.source_type, "Session created");
        self.load_session().await
    }

    /// Full refresh of pipeline state and chapters
    ///
    /// Idempotent; with concurrent calls the later resolution wins.
    pub async fn load_session(&self) -> Result<()> {
        let busy = self.track(Busy::Session);
        let result = self.pull().await;
        drop(busy);
        self.record(result)
    }

    /// Epochs as seen under the state lock
    fn epochs(&self) -> (u64, u64) {
        let _state = self.state.borrow();
        (
            self.step_epoch.load(Ordering::SeqCst),
            self.reset_epoch.load(Ordering::SeqCst),
        )
    }

    async fn pull(&self) -> Result<()> {
        let (issued_step, issued_reset) = self.epochs();

        let snapshot = match self.api.pipeline_state().await {
            Ok(snapshot) => snapshot,
            Err(Error::Request {
                category: RequestCategory::NotFound,
                ..
            }) => {
                info!("No pipeline on the server; resetting to idle");
                self.reset_local(None, None);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let chapters = self.api.chapters().await?;

        // Decided under the write lock so no push can land in between
        let applied = self.state.send_if_modified(|state| {
            if self.reset_epoch.load(Ordering::SeqCst) != issued_reset {
                return false;
            }
            let keep_step = self.step_epoch.load(Ordering::SeqCst) != issued_step
                && self.events.is_connected();
            apply_snapshot(state, snapshot, keep_step);
            apply_chapter_list(state, chapters);
            true
        });
        if !applied {
            debug!("Session reset while pull was in flight; dropping result");
        }
        Ok(())
    }

    /// Probe the server and load whatever session it holds
    pub async fn load_active_session(&self) -> Result<()> {
        self.connect_events();
        let busy = self.track(Busy::Session);
        let status = match self.api.status().await {
            Ok(status) => status,
            Err(e) => {
                drop(busy);
                return self.record(Err(e));
            }
        };

        let source_mode = source_type_for(status.source_mode);
        if !status.has_pipeline {
            drop(busy);
            self.reset_local(source_mode, Some(status.step));
            debug!(step = %status.step, "No active session");
            return Ok(());
        }

        if source_mode.is_some() {
            self.state.send_modify(|state| state.source_mode = source_mode);
        }
        self.load_session().await
    }

    /// Drop the session locally, then ask the server to delete it.
    ///
    /// The local reset stands even if the request fails.
    pub async fn delete_session(&self, source_mode: Option<SourceType>) -> Result<()> {
        self.edits.cancel_all();
        self.reset_local(source_mode, None);

        let result = self.api.delete_pipeline().await;
        if result.is_ok() {
            info!("Session deleted");
        }
        self.record(result)
    }

    /// Roll the pipeline back to `step`; idle is a delete
    pub async fn restart_session(&self, step: Step) -> Result<()> {
        if step == Step::Idle {
            return self.delete_session(None).await;
        }
        if !step.is_restart_target() {
            return self.reject(format!("Cannot restart at step {}", step));
        }

        self.edits.cancel_all();
        let busy = self.track(Busy::Session);
        if let Err(e) = self.api.restart(step).await {
            drop(busy);
            return self.record(Err(e));
        }
        info!(step = %step, "Pipeline restarted");
        self.load_session().await
    }

    /// Restart at the nearest restart option; no-op without one
    pub async fn go_back_to_previous_step(&self) -> Result<()> {
        let target = self.state.borrow().restart_options.first().copied();
        match target {
            Some(step) => self.restart_session(step).await,
            None => {
                debug!("No previous step to go back to");
                Ok(())
            }
        }
    }

    /// Write chapters back to the source
    pub async fn submit(&self, create_backup: bool) -> Result<()> {
        self.edits.flush().await;
        let result = self.api.submit(create_backup).await;
        self.record(result)
    }

    /// Cancel the running step; the server picks where to return to
    pub async fn cancel_step(&self) -> Result<()> {
        let result = self.api.cancel().await;
        self.record(result)
    }

    pub async fn goto_review(&self) -> Result<()> {
        self.edits.flush().await;
        let result = self.api.goto_review().await;
        self.record(result)
    }

    // ------------------------------------------------------------------
    // Step-driving requests
    // ------------------------------------------------------------------

    pub async fn select_cue_source(&self, option: &str) -> Result<()> {
        if option.trim().is_empty() {
            return self.reject("A cue source option is required");
        }
        let result = self.api.select_cue_source(option).await;
        self.record(result)
    }

    pub async fn realign_chapters(&self, source_id: &str, dramatized: bool) -> Result<()> {
        if source_id.trim().is_empty() {
            return self.reject("A cue source id is required");
        }
        let result = self.api.realign(source_id, dramatized).await;
        self.record(result)
    }

    /// Choose the cue timestamps to build chapters from
    pub async fn select_cue_set(&self, timestamps: &[f64], include_unaligned: &[String]) -> Result<()> {
        if timestamps.is_empty() {
            return self.reject("At least one timestamp is required");
        }
        if timestamps.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return self.reject("Cue timestamps must be non-negative seconds");
        }
        let result = self.api.select_cue_set(timestamps, include_unaligned).await;
        self.record(result)
    }

    pub async fn configure_asr(&self, action: AsrAction) -> Result<()> {
        let result = self.api.configure_asr(action).await;
        self.record(result)
    }

    // ------------------------------------------------------------------
    // Chapters
    // ------------------------------------------------------------------

    /// Pull the chapter list
    pub async fn load_chapters(&self) -> Result<()> {
        let (_, issued_reset) = self.epochs();
        let list = match self.api.chapters().await {
            Ok(list) => list,
            Err(e) => return self.record(Err(e)),
        };
        self.state.send_if_modified(|state| {
            if self.reset_epoch.load(Ordering::SeqCst) != issued_reset {
                return false;
            }
            apply_chapter_list(state, list);
            true
        });
        Ok(())
    }

    pub async fn update_title(&self, chapter_id: &str, title: &str) -> Result<()> {
        if title.trim().is_empty() {
            return self.reject("Chapter title cannot be empty");
        }
        let result = self.api.update_title(chapter_id, title).await;
        self.record(result)
    }

    /// Parse user text (`H:MM:SS.mmm`, `M:SS` or seconds) and send it
    pub async fn update_timestamp(&self, chapter_id: &str, text: &str) -> Result<()> {
        let seconds = match parse_timestamp(text) {
            Ok(seconds) => seconds,
            Err(e) => return self.record(Err(e)),
        };
        let result = self.api.update_timestamp(chapter_id, seconds).await;
        self.record(result)
    }

    pub async fn toggle_selection(&self, chapter_id: &str) -> Result<()> {
        let selected = self.state.borrow().chapter(chapter_id).map(|c| c.selected);
        let Some(selected) = selected else {
            return self.reject(format!("Unknown chapter: {}", chapter_id));
        };
        let result = self.api.set_selected(chapter_id, !selected).await;
        self.record(result)
    }

    pub async fn delete_chapter(&self, chapter_id: &str) -> Result<()> {
        let result = self.api.delete_chapter(chapter_id).await;
        self.record(result)
    }

    pub async fn undo(&self) -> Result<()> {
        let result = self.api.undo().await;
        self.record(result)
    }

    pub async fn redo(&self) -> Result<()> {
        let result = self.api.redo().await;
        self.record(result)
    }

    pub async fn select_all(&self) -> Result<()> {
        let result = self.api.select_all().await;
        self.record(result)
    }

    pub async fn deselect_all(&self) -> Result<()> {
        let result = self.api.deselect_all().await;
        self.record(result)
    }

    pub async fn process_selected_with_ai(&self, options: &AiCleanupOptions) -> Result<()> {
        if options.provider_id.trim().is_empty() || options.model_id.trim().is_empty() {
            return self.reject("An LLM provider and model are required");
        }
        self.edits.flush().await;
        let result = self.api.process_selected(options).await;
        self.record(result)
    }

    pub async fn export_chapters(&self, format: &str) -> Result<ExportDocument> {
        if format.trim().is_empty() {
            return self.reject("An export format is required");
        }
        self.edits.flush().await;
        let result = self.api.export(format).await;
        self.record(result)
    }

    /// Schedule a debounced title save; each keystroke restarts the timer.
    ///
    /// Timers run on the runtime the manager was built in. Outside any
    /// runtime the edit waits for the next flush.
    pub fn edit_title(&self, chapter_id: &str, text: &str) {
        self.edits.schedule(chapter_id.to_string(), text.to_string());
    }

    /// Send every pending title edit now
    pub async fn flush_edits(&self) {
        self.edits.flush().await;
    }

    pub fn pending_edits(&self) -> usize {
        self.edits.pending_count()
    }

    // ------------------------------------------------------------------
    // Configuration round trips
    // ------------------------------------------------------------------

    pub async fn smart_detect_config(&self) -> Result<SmartDetectConfig> {
        self.with_config_loading(self.api.smart_detect_config()).await
    }

    pub async fn set_smart_detect_config(&self, config: SmartDetectConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            return self.record(Err(e));
        }
        self.with_config_loading(self.api.set_smart_detect_config(&config))
            .await
    }

    pub async fn asr_options(&self) -> Result<AsrOptions> {
        self.with_config_loading(self.api.asr_options()).await
    }

    pub async fn set_asr_options(&self, options: AsrOptions) -> Result<()> {
        if options.use_bias_words && options.bias_words.trim().is_empty() {
            return self.reject("Bias words are enabled but empty");
        }
        self.with_config_loading(self.api.set_asr_options(&options)).await
    }

    pub async fn editor_settings(&self) -> Result<EditorSettings> {
        self.with_config_loading(self.api.editor_settings()).await
    }

    /// Partial update; returns the merged settings
    pub async fn update_editor_settings(&self, changes: EditorSettings) -> Result<EditorSettings> {
        self.with_config_loading(self.api.update_editor_settings(&changes))
            .await
    }

    pub async fn llm_provider_config(&self, provider_id: &str) -> Result<LlmProviderConfig> {
        if provider_id.trim().is_empty() {
            return self.reject("A provider id is required");
        }
        self.with_config_loading(self.api.llm_provider_config(provider_id))
            .await
    }

    pub async fn set_llm_provider_config(
        &self,
        provider_id: &str,
        config: LlmProviderConfig,
    ) -> Result<()> {
        if provider_id.trim().is_empty() {
            return self.reject("A provider id is required");
        }
        self.with_config_loading(self.api.set_llm_provider_config(provider_id, &config))
            .await
    }

    pub fn dismiss_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }
}

#[derive(Debug, Clone, Copy)]
enum Busy {
    Session,
    Config,
}

/// Clears its share of a busy flag on drop, including when cancelled
struct InFlight<'a, A: SessionApi> {
    manager: &'a SessionManager<A>,
    flag: Busy,
}

impl<A: SessionApi> Drop for InFlight<'_, A> {
    fn drop(&mut self) {
        let manager = self.manager;
        manager.state.send_modify(|state| {
            manager.counter(self.flag).fetch_sub(1, Ordering::SeqCst);
            manager.restore_flags(state);
        });
    }
}

impl<A: SessionApi> Drop for SessionManager<A> {
    fn drop(&mut self) {
        self.detach_handlers();
    }
}
