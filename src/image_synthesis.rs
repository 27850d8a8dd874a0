//! One-shot illustration of a finished exercise.
//!
//! Any failure (no key, transport error, a reply without an image part)
//! yields `None`; callers carry on without an image.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::export::to_data_uri;
use crate::grounding::GroundingData;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("API key is missing")]
    MissingCredential,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response carried no inline image")]
    NoImage,
}

pub trait ImageSynthesizer {
    fn synthesize(&self, data: &GroundingData) -> Option<String>;
}

pub fn build_prompt(data: &GroundingData) -> String {
    format!(
        "Create a peaceful, dreamy, artistic illustration in a soft watercolor style.
The image should loosely and abstractly combine the following sensory elements to create a cohesive scene of safety and calm.

Visual Elements: {see}
Auditory Elements (visualize the sound sources): {hear}
Tactile Elements (textures): {touch}
Scent Elements (flowers, rain, food, etc): {smell}
Taste Elements: {taste}

Style Guide:
- Soft, muted colors: sage greens, lavenders, warm creams.
- No harsh lines or jarring contrasts.
- Therapeutic, whimsical, and comforting.
- If abstract concepts are mentioned, interpret them as light or color.
- Do not include text in the image.
",
        see = data.see,
        hear = data.hear,
        touch = data.touch,
        smell = data.smell,
        taste = data.taste,
    )
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

/// First inline image part of the first candidate, as a data URI.
pub fn extract_image(response: &GenerateResponse) -> Option<String> {
    let parts = &response.candidates.first()?.content.as_ref()?.parts;
    parts
        .iter()
        .filter_map(|part| part.inline_data.as_ref())
        .find(|inline| !inline.data.is_empty())
        .map(|inline| to_data_uri(&inline.mime_type, &inline.data))
}

pub struct GeminiImageClient {
    api_key: Option<String>,
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl GeminiImageClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, ImageError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            api_key: config.api_key.clone(),
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.api_base.trim_end_matches('/'),
                config.image_model
            ),
            http,
        })
    }

    pub fn request(&self, data: &GroundingData) -> Result<String, ImageError> {
        let api_key = self.api_key.as_deref().ok_or(ImageError::MissingCredential)?;
        let prompt = build_prompt(data);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: &prompt }],
            }],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ImageError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json()?;
        extract_image(&parsed).ok_or(ImageError::NoImage)
    }
}

impl ImageSynthesizer for GeminiImageClient {
    fn synthesize(&self, data: &GroundingData) -> Option<String> {
        match self.request(data) {
            Ok(uri) => {
                info!(bytes = uri.len(), "grounding image generated");
                Some(uri)
            }
            Err(ImageError::MissingCredential) => {
                warn!("API key is missing; skipping image generation");
                None
            }
            Err(error) => {
                warn!(%error, "image generation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> GroundingData {
        GroundingData {
            see: "blue mug, window".to_string(),
            hear: "rain".to_string(),
            touch: "wool blanket".to_string(),
            smell: "coffee".to_string(),
            taste: "mint".to_string(),
        }
    }

    #[test]
    fn prompt_embeds_every_sense_and_style_rules() {
        let prompt = build_prompt(&sample_data());
        assert!(prompt.contains("Visual Elements: blue mug, window"));
        assert!(prompt.contains("Auditory Elements (visualize the sound sources): rain"));
        assert!(prompt.contains("Tactile Elements (textures): wool blanket"));
        assert!(prompt.contains("Scent Elements (flowers, rain, food, etc): coffee"));
        assert!(prompt.contains("Taste Elements: mint"));
        assert!(prompt.contains("Do not include text in the image."));
        assert!(prompt.contains("sage greens, lavenders, warm creams"));
    }

    #[test]
    fn extracts_first_inline_image() {
        let json = r#"{"candidates":[{"content":{"parts":[
            {"text":"here you go"},
            {"inlineData":{"mimeType":"image/png","data":"iVBORw0K"}},
            {"inlineData":{"mimeType":"image/jpeg","data":"/9j/"}}
        ]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).expect("response should parse");
        assert_eq!(
            extract_image(&response).as_deref(),
            Some("data:image/png;base64,iVBORw0K")
        );
    }

    #[test]
    fn text_only_reply_has_no_image() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"sorry"}]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).expect("response should parse");
        assert!(extract_image(&response).is_none());

        let empty: GenerateResponse = serde_json::from_str("{}").expect("empty response should parse");
        assert!(extract_image(&empty).is_none());
    }

    #[test]
    fn missing_credential_yields_none_without_network() {
        let client = GeminiImageClient::new(&ServiceConfig::default())
            .expect("client should build without a key");
        assert!(matches!(
            client.request(&sample_data()),
            Err(ImageError::MissingCredential)
        ));
        assert!(client.synthesize(&sample_data()).is_none());
    }
}
