use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::client::ApiClient;
use crate::error::ApiError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_MODEL: &str = "gemini-2.5-flash-image";
const MEMORIAL_PROMPT: &str = concat!(
    "Transform this portrait photo into a Korean standard memorial portrait style.\n",
    "IMPORTANT: You MUST generate and return an IMAGE, not text.\n\n",
    "Requirements:\n",
    "- Background: Change to a solid, calm sky blue or gray color\n",
    "- Clothing: Dress in black or dark navy formal suit. Tie is optional\n",
    "- Face and expression: Maintain the original person's facial features and ",
    "expression as much as possible, while making it look natural and dignified\n",
    "- Quality: Generate a high-resolution, clear image\n\n",
    "DO NOT respond with text. ONLY return the transformed image.",
);

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: Option<String>,
}

/// First image-bearing part of a model response: mime type plus raw base64.
#[derive(Debug)]
pub struct GeneratedPortrait {
    pub mime_type: String,
    pub data: String,
}

impl GeneratedPortrait {
    /// `data:<mime>;base64,<data>`, the framing clients render directly.
    pub fn as_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Single request/response call to the generative-image API. No state
/// machine: send the fixed instruction prompt plus the source image, read
/// back the first inline-image part.
#[async_trait]
pub trait PortraitService: Send + Sync {
    async fn generate(&self, bytes: &[u8], mime_type: &str)
    -> Result<GeneratedPortrait, ApiError>;
}

pub struct PortraitGenerator {
    client: ApiClient,
    api_key: String,
    base_url: String,
}

impl PortraitGenerator {
    pub fn new(client: ApiClient, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl PortraitService for PortraitGenerator {
    async fn generate(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<GeneratedPortrait, ApiError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let request = self
            .client
            .http()
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, GEMINI_MODEL
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({
                "contents": [
                    {
                        "parts": [
                            {"text": MEMORIAL_PROMPT},
                            {"inline_data": {"mime_type": mime_type, "data": encoded}}
                        ]
                    }
                ]
            }));
        let response = self.client.send(request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "image generation failed: {status} {text}"
            )));
        }
        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| ApiError::Upstream(format!("malformed model response: {err}")))?;
        extract_portrait(payload)
    }
}

fn extract_portrait(payload: GenerateContentResponse) -> Result<GeneratedPortrait, ApiError> {
    if let Some(message) = payload.error.and_then(|err| err.message) {
        return Err(ApiError::Upstream(format!("model error: {message}")));
    }
    let parts = payload
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts)
        .unwrap_or_default();
    if parts.is_empty() {
        return Err(ApiError::NoImageReturned);
    }
    for part in parts {
        if let Some(text) = part.text {
            tracing::debug!(text, "model returned a text part");
        }
        if let Some(inline) = part.inline_data {
            return Ok(GeneratedPortrait {
                mime_type: inline.mime_type,
                data: inline.data,
            });
        }
    }
    Err(ApiError::NoImageReturned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> GenerateContentResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn picks_the_first_inline_image_part() {
        let payload = parse(
            r#"{
                "candidates": [{
                    "content": {
                        "parts": [
                            {"text": "Here is your portrait."},
                            {"inlineData": {"mimeType": "image/png", "data": "QUJD"}},
                            {"inlineData": {"mimeType": "image/webp", "data": "REVG"}}
                        ]
                    }
                }]
            }"#,
        );
        let portrait = extract_portrait(payload).unwrap();
        assert_eq!(portrait.mime_type, "image/png");
        assert_eq!(portrait.data, "QUJD");
        assert_eq!(portrait.as_data_url(), "data:image/png;base64,QUJD");
    }

    #[test]
    fn text_only_response_is_no_image_returned() {
        let payload = parse(
            r#"{
                "candidates": [{
                    "content": {
                        "parts": [{"text": "I cannot generate images right now."}]
                    }
                }]
            }"#,
        );
        assert!(matches!(
            extract_portrait(payload).unwrap_err(),
            ApiError::NoImageReturned
        ));
    }

    #[test]
    fn empty_or_missing_candidates_are_no_image_returned() {
        assert!(matches!(
            extract_portrait(parse(r#"{"candidates": []}"#)).unwrap_err(),
            ApiError::NoImageReturned
        ));
        assert!(matches!(
            extract_portrait(parse(r#"{}"#)).unwrap_err(),
            ApiError::NoImageReturned
        ));
    }

    #[test]
    fn model_errors_surface_as_upstream_failures() {
        let payload = parse(r#"{"error": {"message": "quota exceeded"}}"#);
        assert!(matches!(
            extract_portrait(payload).unwrap_err(),
            ApiError::Upstream(_)
        ));
    }

    #[test]
    fn snake_case_inline_data_is_also_accepted() {
        let payload = parse(
            r#"{
                "candidates": [{
                    "content": {
                        "parts": [
                            {"inline_data": {"mime_type": "image/webp", "data": "REVG"}}
                        ]
                    }
                }]
            }"#,
        );
        let portrait = extract_portrait(payload).unwrap();
        assert_eq!(portrait.mime_type, "image/webp");
    }
}
