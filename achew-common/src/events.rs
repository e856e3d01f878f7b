//! Push events delivered over the backend WebSocket
//!
//! Every frame is a JSON envelope `{"type": <name>, "data": {...}}`.
//! Events carry no ordering token; consumers apply each one as an
//! independent, idempotent update of a single state slice.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{Book, Chapter, CueSource, SelectionStats, Step};
use crate::Result;

/// Push event types
///
/// Serialized adjacently tagged, matching the backend envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// Progress within the current step
    ProgressUpdate(ProgressData),

    /// Server moved the pipeline to a new step
    ///
    /// May carry sideband data such as newly found cue sources and the
    /// restart options valid from the new step.
    StepChange(StepChangeData),

    /// Full chapter list after any chapter mutation
    ChapterUpdate(ChapterUpdateData),

    /// Undo/redo availability after any history change
    HistoryUpdate(HistoryData),

    /// Generic status, including out-of-band metadata pushes
    Status(StatusData),

    /// Server-side failure message
    Error(ErrorData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    pub step: Step,
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepChangeData {
    pub new_step: Step,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub restart_options: Option<Vec<Step>>,
    #[serde(default)]
    pub cue_sources: Option<Vec<CueSource>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterUpdateData {
    pub chapters: Vec<Chapter>,
    pub total_count: u32,
    pub selected_count: u32,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl ChapterUpdateData {
    /// Selection counts implied by the event, `None` when impossible
    pub fn selection_stats(&self) -> Option<SelectionStats> {
        SelectionStats::from_counts(self.total_count, self.selected_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryData {
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    /// Status subtype; `book_update` carries fresh book metadata
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub step: Option<Step>,
    #[serde(default)]
    pub book: Option<Book>,
}

impl StatusData {
    pub const BOOK_UPDATE: &'static str = "book_update";

    /// Book carried by a `book_update` status, if any
    pub fn book_update(&self) -> Option<&Book> {
        match self.kind.as_deref() {
            Some(Self::BOOK_UPDATE) => self.book.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

/// Event type keys used by handler registries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ProgressUpdate,
    StepChange,
    ChapterUpdate,
    HistoryUpdate,
    Status,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProgressUpdate => "progress_update",
            EventKind::StepChange => "step_change",
            EventKind::ChapterUpdate => "chapter_update",
            EventKind::HistoryUpdate => "history_update",
            EventKind::Status => "status",
            EventKind::Error => "error",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        Some(match name {
            "progress_update" => EventKind::ProgressUpdate,
            "step_change" => EventKind::StepChange,
            "chapter_update" => EventKind::ChapterUpdate,
            "history_update" => EventKind::HistoryUpdate,
            "status" => EventKind::Status,
            "error" => EventKind::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushEvent {
    /// Get the event kind
    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::ProgressUpdate(_) => EventKind::ProgressUpdate,
            PushEvent::StepChange(_) => EventKind::StepChange,
            PushEvent::ChapterUpdate(_) => EventKind::ChapterUpdate,
            PushEvent::HistoryUpdate(_) => EventKind::HistoryUpdate,
            PushEvent::Status(_) => EventKind::Status,
            PushEvent::Error(_) => EventKind::Error,
        }
    }

    /// Get the event type as a wire string
    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Parse a text frame.
    ///
    /// Returns `Ok(None)` for event types this client does not know, so
    /// newer servers can add events without breaking older clients.
    /// A known type with a malformed payload is an error.
    pub fn parse(text: &str) -> Result<Option<PushEvent>> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if EventKind::from_wire(&envelope.kind).is_none() {
            tracing::debug!(event_type = %envelope.kind, "Ignoring unknown push event");
            return Ok(None);
        }
        let event = serde_json::from_value(serde_json::json!({
            "type": envelope.kind,
            "data": envelope.data,
        }))?;
        Ok(Some(event))
    }
}
