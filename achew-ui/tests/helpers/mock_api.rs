//! Scriptable in-memory `SessionApi`
//!
//! Records every call as a short string (`name` or `name:args`), serves
//! scripted pull responses, and can fail named operations or hold the next
//! call of an operation until the test releases it.

use std::collections::HashMap;
use std::sync::Mutex;

use achew_common::models::{
    AiCleanupOptions, AppStatus, AsrAction, AsrOptions, Book, Chapter, ChapterList,
    CreateSessionRequest, EditorSettings, ExportDocument, LlmProviderConfig, PipelineSnapshot,
    Progress, SelectionStats, SmartDetectConfig, SourceMode, SourceType, Step,
};
use achew_common::{Error, Result};
use achew_ui::SessionApi;
use async_trait::async_trait;
use tokio::sync::oneshot;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Script {
    status: Option<AppStatus>,
    snapshot: Option<PipelineSnapshot>,
    chapters: Option<ChapterList>,
    failures: HashMap<&'static str, (u16, String)>,
    gates: HashMap<&'static str, oneshot::Receiver<()>>,
    on_create: Option<Hook>,
    smart_detect: SmartDetectConfig,
}

#[derive(Default)]
pub struct MockApi {
    calls: Mutex<Vec<String>>,
    script: Mutex<Script>,
}

pub fn chapter(id: &str, timestamp: f64, selected: bool) -> Chapter {
    Chapter {
        id: id.to_string(),
        timestamp,
        current_title: format!("Chapter {}", id),
        asr_title: None,
        selected,
        realignment: None,
    }
}

pub fn book(title: &str) -> Book {
    Book {
        id: Some("li_1".to_string()),
        title: title.to_string(),
        author: None,
        duration: 3600.0,
        files: Vec::new(),
    }
}

pub fn snapshot(step: Step) -> PipelineSnapshot {
    PipelineSnapshot {
        item_id: "li_1".to_string(),
        source_type: SourceType::Abs,
        local_media_layout: None,
        step,
        progress: Progress::at(step),
        selection_stats: SelectionStats::from_counts(2, 1).unwrap(),
        can_undo: false,
        can_redo: false,
        book: Some(book("Dune")),
        cue_sources: Vec::new(),
        restart_options: vec![Step::ConfigureAsr, Step::SelectCueSource],
    }
}

pub fn chapter_list() -> ChapterList {
    ChapterList {
        chapters: vec![chapter("a", 0.0, true), chapter("b", 60.0, false)],
        selection_stats: SelectionStats::from_counts(2, 1).unwrap(),
    }
}

pub fn status(has_pipeline: bool, step: Step) -> AppStatus {
    AppStatus {
        has_pipeline,
        step,
        source_mode: Some(SourceMode::Local),
        abs_configured: false,
        version: Some("1.0.0".to_string()),
        item_id: None,
        total_chapters: None,
        selected_chapters: None,
    }
}

impl MockApi {
    /// Server holding a session at `step`
    pub fn with_session(step: Step) -> Self {
        let api = Self::default();
        {
            let mut script = api.script.lock().unwrap();
            script.status = Some(status(true, step));
            script.snapshot = Some(snapshot(step));
            script.chapters = Some(chapter_list());
        }
        api
    }

    pub fn set_status(&self, status: AppStatus) {
        self.script.lock().unwrap().status = Some(status);
    }

    pub fn set_snapshot(&self, snapshot: PipelineSnapshot) {
        self.script.lock().unwrap().snapshot = Some(snapshot);
    }

    pub fn clear_snapshot(&self) {
        self.script.lock().unwrap().snapshot = None;
    }

    /// Make `operation` answer with an error response
    pub fn fail(&self, operation: &'static str, status: u16, detail: &str) {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert(operation, (status, detail.to_string()));
    }

    /// Hold the next pipeline pull until the returned sender fires
    pub fn gate_next_pull(&self) -> oneshot::Sender<()> {
        self.gate_next("pipeline_state")
    }

    /// Hold the next call of `operation` (after it is recorded)
    pub fn gate_next(&self, operation: &'static str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().gates.insert(operation, rx);
        tx
    }

    async fn hold(&self, operation: &'static str) {
        let gate = self.script.lock().unwrap().gates.remove(operation);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }

    /// Run `hook` when the create request arrives
    pub fn on_create<F: FnOnce() + Send + 'static>(&self, hook: F) {
        self.script.lock().unwrap().on_create = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.as_str() == name || c.starts_with(&format!("{}:", name)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: impl Into<String>, operation: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call.into());
        match self.script.lock().unwrap().failures.get(operation) {
            Some((status, detail)) => Err(Error::from_response(
                *status,
                &serde_json::json!({ "detail": detail }).to_string(),
            )),
            None => Ok(()),
        }
    }

    fn not_found() -> Error {
        Error::from_response(404, r#"{"detail":"Pipeline not found"}"#)
    }
}

#[async_trait]
impl SessionApi for MockApi {
    async fn status(&self) -> Result<AppStatus> {
        self.record("status", "status")?;
        Ok(self
            .script
            .lock()
            .unwrap()
            .status
            .clone()
            .unwrap_or_else(|| status(false, Step::Idle)))
    }

    async fn create_pipeline(&self, request: &CreateSessionRequest) -> Result<()> {
        let hook = self.script.lock().unwrap().on_create.take();
        if let Some(hook) = hook {
            hook();
        }
        let item = request.resolve_item().unwrap_or_default();
        self.record(format!("create_pipeline:{}", item), "create_pipeline")
    }

    async fn pipeline_state(&self) -> Result<PipelineSnapshot> {
        self.record("pipeline_state", "pipeline_state")?;
        let snapshot_now = self.script.lock().unwrap().snapshot.clone();
        self.hold("pipeline_state").await;
        snapshot_now.ok_or_else(Self::not_found)
    }

    async fn delete_pipeline(&self) -> Result<()> {
        self.record("delete_pipeline", "delete_pipeline")
    }

    async fn submit(&self, create_backup: bool) -> Result<()> {
        self.record(format!("submit:{}", create_backup), "submit")
    }

    async fn restart(&self, step: Step) -> Result<()> {
        self.record(format!("restart:{}", step), "restart")
    }

    async fn cancel(&self) -> Result<()> {
        self.record("cancel", "cancel")
    }

    async fn goto_review(&self) -> Result<()> {
        self.record("goto_review", "goto_review")
    }

    async fn select_cue_source(&self, option: &str) -> Result<()> {
        self.record(format!("select_cue_source:{}", option), "select_cue_source")
    }

    async fn realign(&self, source_id: &str, dramatized: bool) -> Result<()> {
        self.record(format!("realign:{}:{}", source_id, dramatized), "realign")
    }

    async fn select_cue_set(&self, timestamps: &[f64], include_unaligned: &[String]) -> Result<()> {
        self.record(
            format!("select_cue_set:{}:{}", timestamps.len(), include_unaligned.join(",")),
            "select_cue_set",
        )
    }

    async fn configure_asr(&self, action: AsrAction) -> Result<()> {
        self.record(format!("configure_asr:{:?}", action), "configure_asr")
    }

    async fn smart_detect_config(&self) -> Result<SmartDetectConfig> {
        self.record("smart_detect_config", "smart_detect_config")?;
        self.hold("smart_detect_config").await;
        Ok(self.script.lock().unwrap().smart_detect)
    }

    async fn set_smart_detect_config(&self, config: &SmartDetectConfig) -> Result<()> {
        self.record("set_smart_detect_config", "set_smart_detect_config")?;
        self.script.lock().unwrap().smart_detect = *config;
        Ok(())
    }

    async fn asr_options(&self) -> Result<AsrOptions> {
        self.record("asr_options", "asr_options")?;
        Ok(AsrOptions::default())
    }

    async fn set_asr_options(&self, _options: &AsrOptions) -> Result<()> {
        self.record("set_asr_options", "set_asr_options")
    }

    async fn chapters(&self) -> Result<ChapterList> {
        self.record("chapters", "chapters")?;
        self.script
            .lock()
            .unwrap()
            .chapters
            .clone()
            .ok_or_else(Self::not_found)
    }

    async fn update_title(&self, chapter_id: &str, title: &str) -> Result<()> {
        self.record(format!("update_title:{}:{}", chapter_id, title), "update_title")
    }

    async fn update_timestamp(&self, chapter_id: &str, timestamp: f64) -> Result<()> {
        self.record(
            format!("update_timestamp:{}:{}", chapter_id, timestamp),
            "update_timestamp",
        )
    }

    async fn set_selected(&self, chapter_id: &str, selected: bool) -> Result<()> {
        self.record(format!("set_selected:{}:{}", chapter_id, selected), "set_selected")
    }

    async fn delete_chapter(&self, chapter_id: &str) -> Result<()> {
        self.record(format!("delete_chapter:{}", chapter_id), "delete_chapter")
    }

    async fn undo(&self) -> Result<()> {
        self.record("undo", "undo")
    }

    async fn redo(&self) -> Result<()> {
        self.record("redo", "redo")
    }

    async fn select_all(&self) -> Result<()> {
        self.record("select_all", "select_all")
    }

    async fn deselect_all(&self) -> Result<()> {
        self.record("deselect_all", "deselect_all")
    }

    async fn process_selected(&self, options: &AiCleanupOptions) -> Result<()> {
        self.record(format!("process_selected:{}", options.provider_id), "process_selected")
    }

    async fn export(&self, format: &str) -> Result<ExportDocument> {
        self.record(format!("export:{}", format), "export")?;
        Ok(ExportDocument {
            filename: format!("Dune.{}", format),
            mime_type: "text/plain".to_string(),
            body: b"00:00:00 Chapter a\n".to_vec(),
        })
    }

    async fn editor_settings(&self) -> Result<EditorSettings> {
        self.record("editor_settings", "editor_settings")?;
        Ok(EditorSettings::new())
    }

    async fn update_editor_settings(&self, changes: &EditorSettings) -> Result<EditorSettings> {
        self.record("update_editor_settings", "update_editor_settings")?;
        Ok(changes.clone())
    }

    async fn llm_provider_config(&self, provider_id: &str) -> Result<LlmProviderConfig> {
        self.record(format!("llm_provider_config:{}", provider_id), "llm_provider_config")?;
        Ok(LlmProviderConfig::new())
    }

    async fn set_llm_provider_config(
        &self,
        provider_id: &str,
        _config: &LlmProviderConfig,
    ) -> Result<()> {
        self.record(
            format!("set_llm_provider_config:{}", provider_id),
            "set_llm_provider_config",
        )
    }
}
