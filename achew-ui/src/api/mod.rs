//! Request/response contract with the achew backend
//!
//! `SessionApi` is the seam between the session synchronizer and the
//! transport. `ApiClient` speaks HTTP JSON; tests substitute an in-memory
//! implementation.

pub mod client;

use achew_common::models::{
    AiCleanupOptions, AppStatus, AsrAction, AsrOptions, ChapterList, CreateSessionRequest,
    EditorSettings, ExportDocument, LlmProviderConfig, PipelineSnapshot, SmartDetectConfig, Step,
};
use achew_common::Result;
use async_trait::async_trait;

pub use client::ApiClient;

/// Every backend operation the client issues
///
/// Step-driving and chapter mutation calls return as soon as the server
/// accepts the request; their effect arrives later as push events.
#[async_trait]
pub trait SessionApi: Send + Sync + 'static {
    async fn status(&self) -> Result<AppStatus>;

    // Pipeline lifecycle
    async fn create_pipeline(&self, request: &CreateSessionRequest) -> Result<()>;
    async fn pipeline_state(&self) -> Result<PipelineSnapshot>;
    async fn delete_pipeline(&self) -> Result<()>;
    async fn submit(&self, create_backup: bool) -> Result<()>;
    async fn restart(&self, step: Step) -> Result<()>;
    async fn cancel(&self) -> Result<()>;
    async fn goto_review(&self) -> Result<()>;

    // Step-driving requests
    async fn select_cue_source(&self, option: &str) -> Result<()>;
    async fn realign(&self, source_id: &str, dramatized: bool) -> Result<()>;
    async fn select_cue_set(&self, timestamps: &[f64], include_unaligned: &[String]) -> Result<()>;
    async fn configure_asr(&self, action: AsrAction) -> Result<()>;

    // Pipeline tuning
    async fn smart_detect_config(&self) -> Result<SmartDetectConfig>;
    async fn set_smart_detect_config(&self, config: &SmartDetectConfig) -> Result<()>;
    async fn asr_options(&self) -> Result<AsrOptions>;
    async fn set_asr_options(&self, options: &AsrOptions) -> Result<()>;

    // Chapters
    async fn chapters(&self) -> Result<ChapterList>;
    async fn update_title(&self, chapter_id: &str, title: &str) -> Result<()>;
    async fn update_timestamp(&self, chapter_id: &str, timestamp: f64) -> Result<()>;
    async fn set_selected(&self, chapter_id: &str, selected: bool) -> Result<()>;
    async fn delete_chapter(&self, chapter_id: &str) -> Result<()>;
    async fn undo(&self) -> Result<()>;
    async fn redo(&self) -> Result<()>;
    async fn select_all(&self) -> Result<()>;
    async fn deselect_all(&self) -> Result<()>;
    async fn process_selected(&self, options: &AiCleanupOptions) -> Result<()>;
    async fn export(&self, format: &str) -> Result<ExportDocument>;

    // Preferences
    async fn editor_settings(&self) -> Result<EditorSettings>;
    async fn update_editor_settings(&self, changes: &EditorSettings) -> Result<EditorSettings>;
    async fn llm_provider_config(&self, provider_id: &str) -> Result<LlmProviderConfig>;
    async fn set_llm_provider_config(
        &self,
        provider_id: &str,
        config: &LlmProviderConfig,
    ) -> Result<()>;
}
