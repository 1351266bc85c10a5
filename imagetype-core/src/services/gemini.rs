//! Gemini REST client: Files API uploads/deletes and `generateContent`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{check_status, GenerateRequest, InferenceProvider};
use crate::error::UpstreamError;
use crate::processed::FileRef;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_KEY_HEADER: &str = "x-goog-api-key";
const SERVICE: &str = "Gemini API";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Model id, with or without the `models/` prefix.
    pub model: String,
    pub base_url: String,
    pub connect_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn model_path(&self) -> String {
        let model = self.model.trim_start_matches("models/");
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    name: String,
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: Vec<Content<'a>>,
    generation_config: WireGenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    FileData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        #[serde(rename = "fileUri")]
        file_uri: &'a str,
    },
    Text(&'a str),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig<'a> {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    response_mime_type: &'a str,
    response_schema: &'a Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Deserialize)]
struct TextPart {
    #[serde(default)]
    text: Option<String>,
}

fn request_body(request: &GenerateRequest) -> GenerateContentBody<'_> {
    let mut parts: Vec<Part<'_>> = request
        .files
        .iter()
        .map(|f| Part::FileData {
            mime_type: &f.mime_type,
            file_uri: &f.uri,
        })
        .collect();
    parts.push(Part::Text(&request.prompt));

    GenerateContentBody {
        contents: vec![Content { role: "user", parts }],
        generation_config: WireGenerationConfig {
            temperature: request.config.temperature,
            top_k: request.config.top_k,
            top_p: request.config.top_p,
            response_mime_type: &request.config.response_mime_type,
            response_schema: &request.config.response_schema,
        },
    }
}

/// Concatenated text of the first candidate.
fn response_text(response: GenerateContentResponse) -> Result<String, UpstreamError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let feedback = response
            .prompt_feedback
            .map(|f| f.to_string())
            .unwrap_or_else(|| "none".to_string());
        return Err(UpstreamError::decode(format!(
            "no candidates returned (prompt feedback: {feedback})"
        )));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(UpstreamError::decode(format!(
            "empty candidate (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }
    Ok(text)
}

#[async_trait]
impl InferenceProvider for GeminiClient {
    #[instrument(level = "debug", skip(self, bytes), fields(bytes = bytes.len()))]
    async fn upload_file(&self, bytes: Vec<u8>, mime_type: &str) -> Result<FileRef, UpstreamError> {
        let url = format!("{}/upload/v1beta/files", self.config.base_url);
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header("X-Goog-Upload-Protocol", "raw")
            .header(header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::decode(format!("upload response: {e}")))?;

        debug!(name = %uploaded.file.name, "Uploaded file");
        Ok(FileRef {
            name: uploaded.file.name,
            uri: uploaded.file.uri,
            mime_type: uploaded
                .file
                .mime_type
                .unwrap_or_else(|| mime_type.to_string()),
        })
    }

    #[instrument(level = "debug", skip(self), fields(name = %file.name))]
    async fn delete_file(&self, file: &FileRef) -> Result<(), UpstreamError> {
        let url = format!("{}/v1beta/{}", self.config.base_url, file.name);
        let response = self
            .client
            .delete(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;
        check_status(SERVICE, response).await?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.config.model, files = request.files.len()))]
    async fn generate(&self, request: &GenerateRequest) -> Result<String, UpstreamError> {
        let start = Instant::now();
        let response = self
            .client
            .post(self.config.model_path())
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&request_body(request))
            .send()
            .await?;
        let parsed: GenerateContentResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::decode(format!("generateContent response: {e}")))?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Model response received"
        );
        response_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::GenerationConfig;
    use serde_json::json;

    fn file(n: u32) -> FileRef {
        FileRef {
            name: format!("files/f{n}"),
            uri: format!("https://generativelanguage.googleapis.com/v1beta/files/f{n}"),
            mime_type: "image/jpeg".into(),
        }
    }

    #[test]
    fn test_model_path_strips_prefix() {
        let config = GeminiConfig::new("key", "models/gemini-2.0-flash");
        assert_eq!(
            config.model_path(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_request_body_puts_files_before_prompt() {
        let request = GenerateRequest {
            files: vec![file(1), file(2)],
            prompt: "image 1\nimage 2\nClassify.".into(),
            config: GenerationConfig::structured(json!({"type": "ARRAY"})),
        };
        let body = serde_json::to_value(request_body(&request)).unwrap();
        let parts = body["contents"][0]["parts"].as_array().unwrap();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["fileData"]["fileUri"], file(1).uri);
        assert_eq!(parts[1]["fileData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[2]["text"], "image 1\nimage 2\nClassify.");
        assert_eq!(body["generationConfig"]["topK"], 1);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "ARRAY");
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "[{\"type\":"}, {"text": "\"silo\"}]"}]}}]
        }))
        .unwrap();
        assert_eq!(response_text(response).unwrap(), r#"[{"type":"silo"}]"#);
    }

    #[test]
    fn test_response_without_candidates_is_an_error() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        let err = response_text(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_upload_response_shape() {
        let parsed: UploadResponse = serde_json::from_value(json!({
            "file": {"name": "files/abc", "uri": "https://x/files/abc", "mimeType": "image/png"}
        }))
        .unwrap();
        assert_eq!(parsed.file.name, "files/abc");
        assert_eq!(parsed.file.mime_type.as_deref(), Some("image/png"));
    }
}
