use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pdfinsight_core::{
    ArtifactKind, EncodedImage, GenerationConfig, GenerationError, InsightContent, InsightGenerator,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub mod gate;
pub mod prompts;

pub use gate::{ApiKey, ApiKeyGate, KeyPrompt};

pub const TEXT_FALLBACK: &str = "No response generated.";
pub const IMAGE_FALLBACK: &str = "No image was generated.";

const MAX_ERROR_BODY: usize = 500;

/// `InsightGenerator` backed by the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    config: GenerationConfig,
    key: ApiKey,
    agent: ureq::Agent,
}

impl GeminiClient {
    pub fn new(config: GenerationConfig, key: ApiKey) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Self {
            config,
            key,
            agent: builder.build(),
        }
    }

    /// Image model for infographics, text model for everything else.
    pub fn model_for(&self, kind: ArtifactKind) -> &str {
        if kind.is_image() {
            &self.config.image_model
        } else {
            &self.config.text_model
        }
    }

    fn url_for(&self, kind: ArtifactKind) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.model_for(kind)
        )
    }
}

#[async_trait]
impl InsightGenerator for GeminiClient {
    #[instrument(skip(self, image), fields(model = self.model_for(kind), bytes = image.bytes.len()))]
    async fn generate(
        &self,
        image: &EncodedImage,
        kind: ArtifactKind,
    ) -> Result<InsightContent, GenerationError> {
        let key = self.key.get().ok_or(GenerationError::MissingCredential)?;
        let url = self.url_for(kind);
        let body = build_request(image, kind);
        let agent = self.agent.clone();

        let response = tokio::task::spawn_blocking(move || send(&agent, &url, &key, &body))
            .await
            .map_err(|err| GenerationError::Aborted(err.to_string()))??;
        extract_content(kind, response)
    }
}

fn send(
    agent: &ureq::Agent,
    url: &str,
    key: &str,
    body: &GenerateRequest,
) -> Result<GenerateResponse, GenerationError> {
    match agent.post(url).set("x-goog-api-key", key).send_json(body) {
        Ok(response) => response
            .into_json::<GenerateResponse>()
            .map_err(|err| GenerationError::MalformedResponse(err.to_string())),
        Err(ureq::Error::Status(status, response)) => {
            let raw = response.into_string().unwrap_or_default();
            Err(GenerationError::Api {
                status,
                message: api_error_message(&raw),
            })
        }
        Err(ureq::Error::Transport(transport)) => {
            Err(GenerationError::Network(transport.to_string()))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationSettings>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationSettings {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(default, skip_serializing)]
    thought: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn build_request(image: &EncodedImage, kind: ArtifactKind) -> GenerateRequest {
    let parts = vec![
        Part {
            inline_data: Some(InlineData {
                mime_type: image.mime_type.clone(),
                data: BASE64.encode(&image.bytes),
            }),
            ..Part::default()
        },
        Part {
            text: Some(prompts::instruction(kind)),
            ..Part::default()
        },
    ];
    GenerateRequest {
        contents: vec![Content { parts }],
        generation_config: kind.is_image().then(|| GenerationSettings {
            response_modalities: vec!["TEXT", "IMAGE"],
        }),
    }
}

fn extract_content(
    kind: ArtifactKind,
    response: GenerateResponse,
) -> Result<InsightContent, GenerationError> {
    let candidate = response.candidates.into_iter().next();
    if let Some(reason) = candidate.as_ref().and_then(|c| c.finish_reason.as_deref()) {
        debug!(reason, "candidate finished");
    }
    let parts = candidate
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    if kind.is_image() {
        let Some(inline) = parts.into_iter().find_map(|p| p.inline_data) else {
            return Ok(InsightContent::Text(IMAGE_FALLBACK.to_owned()));
        };
        let bytes = BASE64
            .decode(inline.data.as_bytes())
            .map_err(|err| GenerationError::MalformedResponse(format!("bad image data: {err}")))?;
        return Ok(InsightContent::Image(EncodedImage::new(inline.mime_type, bytes)));
    }

    let text: String = parts
        .into_iter()
        .filter(|p| !p.thought.unwrap_or(false))
        .filter_map(|p| p.text)
        .collect();
    if text.trim().is_empty() {
        Ok(InsightContent::Text(TEXT_FALLBACK.to_owned()))
    } else {
        Ok(InsightContent::Text(text))
    }
}

fn api_error_message(raw: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(raw) {
        return envelope.error.message;
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "empty error response".to_owned();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> GenerateResponse {
        serde_json::from_value(value).unwrap()
    }

    fn client() -> GeminiClient {
        GeminiClient::new(GenerationConfig::default(), ApiKey::default())
    }

    #[test]
    fn model_follows_artifact_kind() {
        let client = client();
        assert_eq!(client.model_for(ArtifactKind::Infographic), "gemini-3-pro-image-preview");
        for kind in [ArtifactKind::Explanation, ArtifactKind::Slide, ArtifactKind::Code] {
            assert_eq!(client.model_for(kind), "gemini-3-pro-preview");
        }
        assert_eq!(
            client.url_for(ArtifactKind::Code),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-pro-preview:generateContent"
        );
    }

    #[test]
    fn request_carries_image_then_instruction() {
        let image = EncodedImage::png(vec![1, 2, 3]);
        let body = serde_json::to_value(build_request(&image, ArtifactKind::Slide)).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "AQID");
        assert!(parts[1]["text"].as_str().unwrap().contains("slide"));
        assert!(body.get("generationConfig").is_none());
        assert!(parts[0].get("thought").is_none());
    }

    #[test]
    fn infographic_request_asks_for_image_modality() {
        let image = EncodedImage::png(vec![0]);
        let body = serde_json::to_value(build_request(&image, ArtifactKind::Infographic)).unwrap();
        assert_eq!(
            body["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
    }

    #[test]
    fn text_parts_are_joined_and_thoughts_skipped() {
        let r = response(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "First. "},
                    {"text": "Second."}
                ]},
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(
            extract_content(ArtifactKind::Explanation, r).unwrap(),
            InsightContent::Text("First. Second.".into())
        );
    }

    #[test]
    fn missing_data_yields_fallback_text() {
        assert_eq!(
            extract_content(ArtifactKind::Code, response(json!({}))).unwrap(),
            InsightContent::Text(TEXT_FALLBACK.into())
        );
        let only_text = response(json!({
            "candidates": [{"content": {"parts": [{"text": "I cannot draw that."}]}}]
        }));
        assert_eq!(
            extract_content(ArtifactKind::Infographic, only_text).unwrap(),
            InsightContent::Text(IMAGE_FALLBACK.into())
        );
    }

    #[test]
    fn inline_image_is_decoded() {
        let r = response(json!({
            "candidates": [{"content": {"parts": [
                {"text": "Here you go"},
                {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/"}}
            ]}}]
        }));
        match extract_content(ArtifactKind::Infographic, r).unwrap() {
            InsightContent::Image(image) => {
                assert_eq!(image.mime_type, "image/jpeg");
                assert_eq!(image.bytes, vec![0xff, 0xd8, 0xff]);
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn corrupt_image_data_is_malformed() {
        let r = response(json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "***"}}
            ]}}]
        }));
        assert!(matches!(
            extract_content(ArtifactKind::Infographic, r),
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn api_error_message_prefers_envelope() {
        let raw = r#"{"error":{"code":429,"message":"Resource exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(api_error_message(raw), "Resource exhausted");
        assert_eq!(api_error_message("  gateway timeout "), "gateway timeout");
        assert_eq!(api_error_message(""), "empty error response");
        assert_eq!(api_error_message(&"x".repeat(900)).len(), MAX_ERROR_BODY);
    }

    #[tokio::test]
    async fn generate_without_key_fails_before_network() {
        let err = client()
            .generate(&EncodedImage::png(vec![1]), ArtifactKind::Code)
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::MissingCredential);
    }
}
