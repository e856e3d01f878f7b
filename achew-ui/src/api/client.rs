//! HTTP JSON client for the achew backend
//!
//! All paths live under `<server>/api`. Non-success responses are mapped
//! through `Error::from_response` so callers see the backend's `detail`.

use std::time::Duration;

use achew_common::models::{
    AiCleanupOptions, AppStatus, AsrAction, AsrOptions, ChapterList, CreateSessionRequest,
    EditorSettings, ExportDocument, LlmProviderConfig, PipelineSnapshot, SmartDetectConfig, Step,
};
use achew_common::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::SessionApi;

const USER_AGENT: &str = concat!("achew-ui/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed `SessionApi`
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ConfigEnvelope<T> {
    config: T,
}

#[derive(Deserialize)]
struct OptionsEnvelope<T> {
    options: T,
}

#[derive(Deserialize)]
struct EditorSettingsEnvelope {
    editor_settings: EditorSettings,
}

impl ApiClient {
    /// Create a client for a normalized server URL
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: format!("{}/api", server_url.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, method: Method, path: &str, body: Option<serde_json::Value>) -> Result<Response> {
        self.send_with_query(method, path, &[], body).await
    }

    async fn send_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let url = self.url(path);
        tracing::debug!(method = %method, url = %url, "Backend request");

        let mut request = self.http_client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let err = Error::from_response(status.as_u16(), &error_text);
            tracing::debug!(url = %url, status = status.as_u16(), error = %err, "Backend request failed");
            return Err(err);
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_json<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: &B) -> Result<Response> {
        self.send(method, path, Some(serde_json::to_value(body)?)).await
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        self.send(Method::POST, path, None).await?;
        Ok(())
    }
}

fn chapter_path(chapter_id: &str, suffix: &str) -> String {
    format!("/chapters/{}{}", urlencoding::encode(chapter_id), suffix)
}

fn provider_config_path(provider_id: &str) -> String {
    format!("/llm/providers/{}/config", urlencoding::encode(provider_id))
}

/// Pull the filename out of a Content-Disposition header value.
///
/// Handles `filename="x"`, bare `filename=x` and RFC 5987 `filename*=`.
pub fn disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    for part in disposition_params(value) {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'value; only the value is kept
            let raw = encoded.rsplit('\'').next().unwrap_or(encoded);
            let decoded = urlencoding::decode_binary(unquote(raw).as_bytes()).into_owned();
            return Some(String::from_utf8_lossy(&decoded).into_owned());
        }
        if let Some(name) = part.strip_prefix("filename=") {
            plain = Some(unquote(name));
        }
    }
    plain.filter(|name| !name.is_empty())
}

/// Split header parameters on `;` outside quoted strings
fn disposition_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

fn export_metadata(headers: &HeaderMap, format: &str) -> (String, String) {
    let filename = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_filename)
        .unwrap_or_else(|| format!("chapters.{}", format));
    let mime_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".to_string());
    (filename, mime_type)
}

#[async_trait]
impl SessionApi for ApiClient {
    async fn status(&self) -> Result<AppStatus> {
        self.get_json("/status").await
    }

    async fn create_pipeline(&self, request: &CreateSessionRequest) -> Result<()> {
        self.send_json(Method::POST, "/pipeline", request).await?;
        tracing::info!(source_type = ?request.source_type, "Pipeline created");
        Ok(())
    }

    async fn pipeline_state(&self) -> Result<PipelineSnapshot> {
        self.get_json("/pipeline/state").await
    }

    async fn delete_pipeline(&self) -> Result<()> {
        self.send(Method::DELETE, "/pipeline", None).await?;
        Ok(())
    }

    async fn submit(&self, create_backup: bool) -> Result<()> {
        self.send_json(Method::POST, "/pipeline/submit", &json!({ "create_backup": create_backup }))
            .await?;
        Ok(())
    }

    async fn restart(&self, step: Step) -> Result<()> {
        self.send_json(Method::POST, "/pipeline/restart", &json!({ "restart_step": step }))
            .await?;
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        self.post_empty("/pipeline/cancel").await
    }

    async fn goto_review(&self) -> Result<()> {
        self.post_empty("/pipeline/goto-review").await
    }

    async fn select_cue_source(&self, option: &str) -> Result<()> {
        self.send_json(Method::POST, "/pipeline/cue-source", &json!({ "option": option }))
            .await?;
        Ok(())
    }

    async fn realign(&self, source_id: &str, dramatized: bool) -> Result<()> {
        let body = json!({ "source_id": source_id, "dramatized": dramatized });
        self.send_json(Method::POST, "/pipeline/realign", &body).await?;
        Ok(())
    }

    async fn select_cue_set(&self, timestamps: &[f64], include_unaligned: &[String]) -> Result<()> {
        let body = json!({ "timestamps": timestamps, "include_unaligned": include_unaligned });
        self.send_json(Method::POST, "/pipeline/select-cue-set", &body).await?;
        Ok(())
    }

    async fn configure_asr(&self, action: AsrAction) -> Result<()> {
        self.send_json(Method::POST, "/pipeline/configure-asr", &json!({ "action": action }))
            .await?;
        Ok(())
    }

    async fn smart_detect_config(&self) -> Result<SmartDetectConfig> {
        let envelope: ConfigEnvelope<SmartDetectConfig> =
            self.get_json("/pipeline/smart-detect-config").await?;
        Ok(envelope.config)
    }

    async fn set_smart_detect_config(&self, config: &SmartDetectConfig) -> Result<()> {
        self.send_json(Method::PUT, "/pipeline/smart-detect-config", config)
            .await?;
        Ok(())
    }

    async fn asr_options(&self) -> Result<AsrOptions> {
        let envelope: OptionsEnvelope<AsrOptions> = self.get_json("/pipeline/asr-options").await?;
        Ok(envelope.options)
    }

    async fn set_asr_options(&self, options: &AsrOptions) -> Result<()> {
        self.send_json(Method::PUT, "/pipeline/asr-options", options).await?;
        Ok(())
    }

    async fn chapters(&self) -> Result<ChapterList> {
        self.get_json("/chapters").await
    }

    async fn update_title(&self, chapter_id: &str, title: &str) -> Result<()> {
        let path = chapter_path(chapter_id, "/title");
        self.send_json(Method::PUT, &path, &json!({ "title": title })).await?;
        Ok(())
    }

    async fn update_timestamp(&self, chapter_id: &str, timestamp: f64) -> Result<()> {
        let path = chapter_path(chapter_id, "/timestamp");
        self.send_json(Method::PUT, &path, &json!({ "timestamp": timestamp }))
            .await?;
        Ok(())
    }

    async fn set_selected(&self, chapter_id: &str, selected: bool) -> Result<()> {
        let path = chapter_path(chapter_id, "/select");
        self.send_json(Method::PUT, &path, &json!({ "selected": selected }))
            .await?;
        Ok(())
    }

    async fn delete_chapter(&self, chapter_id: &str) -> Result<()> {
        self.send(Method::DELETE, &chapter_path(chapter_id, ""), None).await?;
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        self.post_empty("/chapters/undo").await
    }

    async fn redo(&self) -> Result<()> {
        self.post_empty("/chapters/redo").await
    }

    async fn select_all(&self) -> Result<()> {
        self.post_empty("/chapters/select-all").await
    }

    async fn deselect_all(&self) -> Result<()> {
        self.post_empty("/chapters/deselect-all").await
    }

    async fn process_selected(&self, options: &AiCleanupOptions) -> Result<()> {
        self.send_json(Method::POST, "/chapters/process-selected", options)
            .await?;
        Ok(())
    }

    async fn export(&self, format: &str) -> Result<ExportDocument> {
        let response = self
            .send_with_query(Method::GET, "/chapters/export", &[("format", format)], None)
            .await?;
        let (filename, mime_type) = export_metadata(response.headers(), format);
        let body = response.bytes().await?.to_vec();

        tracing::info!(filename = %filename, bytes = body.len(), "Exported chapters");

        Ok(ExportDocument {
            filename,
            mime_type,
            body,
        })
    }

    async fn editor_settings(&self) -> Result<EditorSettings> {
        self.get_json("/config/editor-settings").await
    }

    async fn update_editor_settings(&self, changes: &EditorSettings) -> Result<EditorSettings> {
        let response = self
            .send_json(Method::PATCH, "/config/editor-settings", changes)
            .await?;
        let bytes = response.bytes().await?;
        let envelope: EditorSettingsEnvelope = serde_json::from_slice(&bytes)?;
        Ok(envelope.editor_settings)
    }

    async fn llm_provider_config(&self, provider_id: &str) -> Result<LlmProviderConfig> {
        let envelope: ConfigEnvelope<LlmProviderConfig> = self
            .get_json(&provider_config_path(provider_id))
            .await?;
        Ok(envelope.config)
    }

    async fn set_llm_provider_config(
        &self,
        provider_id: &str,
        config: &LlmProviderConfig,
    ) -> Result<()> {
        let path = provider_config_path(provider_id);
        self.send_json(Method::POST, &path, &json!({ "config": config }))
            .await?;
        Ok(())
    }
}
