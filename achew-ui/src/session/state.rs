//! Observable session snapshot

use achew_common::models::{Book, Chapter, CueSource, Progress, SelectionStats, SourceMode, SourceType, Step};
use achew_common::{Error, RequestCategory};
use serde::Serialize;

use crate::channel::ChannelStatus;

/// Error shown to the user until dismissed or replaced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionError {
    pub message: String,
    /// Present for backend request failures
    pub category: Option<RequestCategory>,
}

impl From<&Error> for SessionError {
    fn from(err: &Error) -> Self {
        let category = match err {
            Error::Request { category, .. } => Some(*category),
            _ => None,
        };
        Self {
            message: err.user_message(),
            category,
        }
    }
}

/// Canonical client-side view of the server session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub step: Step,
    pub item_id: Option<String>,
    pub source_type: Option<SourceType>,
    /// Configured source mode; survives session deletion
    pub source_mode: Option<SourceType>,
    pub local_media_layout: Option<String>,
    pub progress: Progress,
    pub chapters: Vec<Chapter>,
    pub selection_stats: SelectionStats,
    pub can_undo: bool,
    pub can_redo: bool,
    /// Nearest first
    pub restart_options: Vec<Step>,
    pub cue_sources: Vec<CueSource>,
    pub book: Option<Book>,
    pub error: Option<SessionError>,
    pub loading: bool,
    pub config_loading: bool,
    pub channel: ChannelStatus,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle(None)
    }
}

impl SessionState {
    /// Idle baseline with no live session
    pub fn idle(source_mode: Option<SourceType>) -> Self {
        Self {
            step: Step::Idle,
            item_id: None,
            source_type: None,
            source_mode,
            local_media_layout: None,
            progress: Progress::idle(),
            chapters: Vec::new(),
            selection_stats: SelectionStats::default(),
            can_undo: false,
            can_redo: false,
            restart_options: Vec::new(),
            cue_sources: Vec::new(),
            book: None,
            error: None,
            loading: false,
            config_loading: false,
            channel: ChannelStatus::Disconnected,
        }
    }

    /// Reset to the idle baseline in place, keeping client-side context
    pub fn reset_to_idle(&mut self, source_mode: Option<SourceType>) {
        let channel = std::mem::take(&mut self.channel);
        let source_mode = source_mode.or(self.source_mode);
        *self = Self::idle(source_mode);
        self.channel = channel;
    }

    pub fn has_session(&self) -> bool {
        self.item_id.is_some()
    }

    pub fn selected_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.iter().filter(|c| c.selected)
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }

    /// Ordered chapter ids; a change means segment URLs are stale
    pub fn chapter_ids(&self) -> Vec<&str> {
        self.chapters.iter().map(|c| c.id.as_str()).collect()
    }
}

/// Map the status probe's mode onto a source type
pub fn source_type_for(mode: Option<SourceMode>) -> Option<SourceType> {
    match mode {
        Some(SourceMode::Abs) => Some(SourceType::Abs),
        Some(SourceMode::Local) => Some(SourceType::Local),
        Some(SourceMode::Unset) | None => None,
    }
}
