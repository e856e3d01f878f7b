//! Wire models shared by the request/response and push channels
//!
//! Every type here mirrors a JSON payload exchanged with the backend.
//! Field names follow the backend's snake_case wire format; unknown fields
//! are ignored so newer servers remain readable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Pipeline step, mirrored from the server state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    SourceSetup,
    AbsSetup,
    LocalSetup,
    LlmSetup,
    Idle,
    Validating,
    Downloading,
    FilePrep,
    SelectCueSource,
    AudioAnalysis,
    VadPrep,
    VadAnalysis,
    PartialScanPrep,
    PartialAudioAnalysis,
    PartialVadAnalysis,
    CueSetSelection,
    AudioExtraction,
    ConfigureAsr,
    Trimming,
    AsrProcessing,
    ChapterEditing,
    AiCleanup,
    Reviewing,
    Completed,
}

impl Step {
    pub const ALL: [Step; 24] = [
        Step::SourceSetup,
        Step::AbsSetup,
        Step::LocalSetup,
        Step::LlmSetup,
        Step::Idle,
        Step::Validating,
        Step::Downloading,
        Step::FilePrep,
        Step::SelectCueSource,
        Step::AudioAnalysis,
        Step::VadPrep,
        Step::VadAnalysis,
        Step::PartialScanPrep,
        Step::PartialAudioAnalysis,
        Step::PartialVadAnalysis,
        Step::CueSetSelection,
        Step::AudioExtraction,
        Step::ConfigureAsr,
        Step::Trimming,
        Step::AsrProcessing,
        Step::ChapterEditing,
        Step::AiCleanup,
        Step::Reviewing,
        Step::Completed,
    ];

    /// Wire name of the step
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::SourceSetup => "source_setup",
            Step::AbsSetup => "abs_setup",
            Step::LocalSetup => "local_setup",
            Step::LlmSetup => "llm_setup",
            Step::Idle => "idle",
            Step::Validating => "validating",
            Step::Downloading => "downloading",
            Step::FilePrep => "file_prep",
            Step::SelectCueSource => "select_cue_source",
            Step::AudioAnalysis => "audio_analysis",
            Step::VadPrep => "vad_prep",
            Step::VadAnalysis => "vad_analysis",
            Step::PartialScanPrep => "partial_scan_prep",
            Step::PartialAudioAnalysis => "partial_audio_analysis",
            Step::PartialVadAnalysis => "partial_vad_analysis",
            Step::CueSetSelection => "cue_set_selection",
            Step::AudioExtraction => "audio_extraction",
            Step::ConfigureAsr => "configure_asr",
            Step::Trimming => "trimming",
            Step::AsrProcessing => "asr_processing",
            Step::ChapterEditing => "chapter_editing",
            Step::AiCleanup => "ai_cleanup",
            Step::Reviewing => "reviewing",
            Step::Completed => "completed",
        }
    }

    /// Steps the server accepts as rollback targets
    pub fn is_restart_target(&self) -> bool {
        matches!(
            self,
            Step::Idle
                | Step::SelectCueSource
                | Step::CueSetSelection
                | Step::ConfigureAsr
                | Step::ChapterEditing
        )
    }

    /// Setup and idle steps exist without a live pipeline
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Step::Idle | Step::SourceSetup | Step::AbsSetup | Step::LocalSetup | Step::LlmSetup
        )
    }

    /// Steps where the server waits for user input
    pub fn is_interactive(&self) -> bool {
        self.is_setup()
            || matches!(
                self,
                Step::SelectCueSource
                    | Step::CueSetSelection
                    | Step::ConfigureAsr
                    | Step::ChapterEditing
                    | Step::Reviewing
                    | Step::Completed
            )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Step::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown step: {}", s)))
    }
}

/// Origin of the audiobook being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Abs,
    Local,
}

/// Configured source mode reported by the status probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Abs,
    Local,
    Unset,
}

/// Progress of the current step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub step: Step,
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl Progress {
    pub fn idle() -> Self {
        Self::at(Step::Idle)
    }

    pub fn at(step: Step) -> Self {
        Self {
            step,
            percent: 0.0,
            message: String::new(),
            details: BTreeMap::new(),
        }
    }
}

/// Realignment metadata attached to a chapter matched against an existing cue source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Realignment {
    pub original_timestamp: f64,
    pub confidence: f64,
    #[serde(default)]
    pub is_guess: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub timestamp: f64,
    #[serde(default)]
    pub current_title: String,
    #[serde(default)]
    pub asr_title: Option<String>,
    #[serde(default = "default_selected")]
    pub selected: bool,
    #[serde(default)]
    pub realignment: Option<Realignment>,
}

fn default_selected() -> bool {
    true
}

/// Selection counts; `unselected = total - selected`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionStats {
    pub total: u32,
    pub selected: u32,
    pub unselected: u32,
}

impl SelectionStats {
    /// Build counts from total and selected, rejecting impossible pairs
    pub fn from_counts(total: u32, selected: u32) -> Option<Self> {
        if selected > total {
            return None;
        }
        Some(Self {
            total,
            selected,
            unselected: total - selected,
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.selected.checked_add(self.unselected) == Some(self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookFile {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub size: u64,
}

/// Book metadata fetched by the server when the pipeline starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, alias = "audio_files")]
    pub files: Vec<BookFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub timestamp: f64,
    #[serde(default)]
    pub title: String,
}

/// Pre-existing chapter cues found for the book (embedded, ABS, file boundaries)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueSource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cues: Vec<Cue>,
    #[serde(default)]
    pub duration: f64,
}

/// Full-state pull response for the live pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub item_id: String,
    #[serde(default = "default_source_type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub local_media_layout: Option<String>,
    pub step: Step,
    pub progress: Progress,
    pub selection_stats: SelectionStats,
    pub can_undo: bool,
    pub can_redo: bool,
    #[serde(default)]
    pub book: Option<Book>,
    #[serde(default)]
    pub cue_sources: Vec<CueSource>,
    #[serde(default)]
    pub restart_options: Vec<Step>,
}

fn default_source_type() -> SourceType {
    SourceType::Abs
}

/// Chapter list pull response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterList {
    pub chapters: Vec<Chapter>,
    pub selection_stats: SelectionStats,
}

/// Status probe response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    pub has_pipeline: bool,
    pub step: Step,
    #[serde(default)]
    pub source_mode: Option<SourceMode>,
    #[serde(default)]
    pub abs_configured: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub total_chapters: Option<u32>,
    #[serde(default)]
    pub selected_chapters: Option<u32>,
}

/// Session creation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_layout: Option<String>,
}

impl CreateSessionRequest {
    pub fn abs(item_id: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Abs,
            item_id: Some(item_id.into()),
            local_item_id: None,
            local_layout: None,
        }
    }

    pub fn local(local_item_id: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Local,
            item_id: None,
            local_item_id: Some(local_item_id.into()),
            local_layout: None,
        }
    }

    /// Resolve the payload to the item id the session will carry
    pub fn resolve_item(&self) -> Result<String> {
        let candidate = match self.source_type {
            SourceType::Abs => self.item_id.as_deref(),
            SourceType::Local => self.local_item_id.as_deref(),
        };
        match candidate.map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(Error::Validation(match self.source_type {
                SourceType::Abs => "item_id is required for ABS sessions".to_string(),
                SourceType::Local => "local_item_id is required for local sessions".to_string(),
            })),
        }
    }
}

/// Smart-detect tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmartDetectConfig {
    pub segment_length: f64,
    pub min_clip_length: f64,
    pub asr_buffer: f64,
}

impl Default for SmartDetectConfig {
    fn default() -> Self {
        Self {
            segment_length: 8.0,
            min_clip_length: 1.0,
            asr_buffer: 0.25,
        }
    }
}

impl SmartDetectConfig {
    /// Same bounds the server enforces, checked before sending
    pub fn validate(&self) -> Result<()> {
        if !(3.0..=30.0).contains(&self.segment_length) {
            return Err(Error::Validation(
                "Segment length must be between 3 and 30 seconds".to_string(),
            ));
        }
        if !(0.5..=5.0).contains(&self.min_clip_length) {
            return Err(Error::Validation(
                "Minimum clip length must be between 0.5 and 5 seconds".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.asr_buffer) {
            return Err(Error::Validation(
                "ASR buffer must be between 0 and 1 seconds".to_string(),
            ));
        }
        if self.segment_length < self.min_clip_length {
            return Err(Error::Validation(
                "Segment length must be at least the minimum clip length".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AsrOptions {
    pub trim: bool,
    #[serde(default)]
    pub use_bias_words: bool,
    #[serde(default)]
    pub bias_words: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrAction {
    Transcribe,
    Skip,
}

/// Editor display preferences, PATCH semantics
pub type EditorSettings = BTreeMap<String, serde_json::Value>;

/// Opaque per-provider LLM settings
pub type LlmProviderConfig = BTreeMap<String, serde_json::Value>;

/// Options for the AI title cleanup batch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCleanupOptions {
    #[serde(default)]
    pub infer_opening_credits: bool,
    #[serde(default)]
    pub infer_end_credits: bool,
    #[serde(default)]
    pub deselect_non_chapters: bool,
    #[serde(default)]
    pub keep_deselected_titles: bool,
    #[serde(default)]
    pub use_preferred_titles: bool,
    #[serde(default)]
    pub preferred_titles_source: String,
    #[serde(default)]
    pub additional_instructions: Vec<String>,
    pub provider_id: String,
    pub model_id: String,
}

/// Exported chapter document
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDocument {
    pub filename: String,
    pub mime_type: String,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wire_names_round_trip_through_from_str() {
        for step in Step::ALL {
            assert_eq!(step.as_str().parse::<Step>().unwrap(), step);
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{}\"", step.as_str()));
        }
        assert!("bogus".parse::<Step>().is_err());
    }

    #[test]
    fn test_restart_targets() {
        let targets: Vec<Step> = Step::ALL
            .iter()
            .copied()
            .filter(Step::is_restart_target)
            .collect();
        assert_eq!(
            targets,
            vec![
                Step::Idle,
                Step::SelectCueSource,
                Step::CueSetSelection,
                Step::ConfigureAsr,
                Step::ChapterEditing
            ]
        );
    }

    #[test]
    fn test_selection_stats_counts() {
        let stats = SelectionStats::from_counts(10, 7).unwrap();
        assert_eq!(stats.unselected, 3);
        assert!(stats.is_consistent());
        assert!(SelectionStats::from_counts(3, 4).is_none());

        let bad = SelectionStats { total: 5, selected: 3, unselected: 1 };
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_chapter_defaults() {
        let ch: Chapter = serde_json::from_str(r#"{"id":"a","timestamp":12.5}"#).unwrap();
        assert!(ch.selected);
        assert_eq!(ch.current_title, "");
        assert!(ch.asr_title.is_none());
        assert!(ch.realignment.is_none());
    }

    #[test]
    fn test_snapshot_parses_backend_payload() {
        let json = r#"{
            "item_id": "li_1",
            "step": "chapter_editing",
            "progress": {"step": "chapter_editing", "percent": 100, "message": "done", "details": {}},
            "selection_stats": {"total": 4, "selected": 3, "unselected": 1},
            "can_undo": true,
            "can_redo": false,
            "book": {"title": "Dune", "duration": 3600.0, "files": []},
            "cue_sources": [],
            "restart_options": ["cue_set_selection", "select_cue_source", "idle"]
        }"#;
        let snap: PipelineSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.source_type, SourceType::Abs);
        assert_eq!(snap.step, Step::ChapterEditing);
        assert_eq!(snap.restart_options[0], Step::CueSetSelection);
        assert_eq!(snap.book.unwrap().title, "Dune");
    }

    #[test]
    fn test_create_request_resolution() {
        assert_eq!(CreateSessionRequest::abs("li_1").resolve_item().unwrap(), "li_1");
        assert_eq!(CreateSessionRequest::local("x").resolve_item().unwrap(), "x");
        assert!(CreateSessionRequest::abs("  ").resolve_item().is_err());

        let mut req = CreateSessionRequest::local("x");
        req.source_type = SourceType::Abs;
        assert!(req.resolve_item().is_err());
    }

    #[test]
    fn test_smart_detect_validation() {
        assert!(SmartDetectConfig::default().validate().is_ok());

        let mut cfg = SmartDetectConfig::default();
        cfg.segment_length = 2.0;
        assert!(cfg.validate().is_err());

        let cfg = SmartDetectConfig { segment_length: 3.0, min_clip_length: 5.0, asr_buffer: 0.0 };
        assert!(cfg.validate().is_err());

        let cfg = SmartDetectConfig { segment_length: 8.0, min_clip_length: 1.0, asr_buffer: 1.5 };
        assert!(cfg.validate().is_err());
    }
}
