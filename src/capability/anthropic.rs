use anyhow::{Result, bail};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use super::{AnalysisRequest, Capability, ImageInput, TextExtractor};
use crate::consts::DEFAULT_MODEL;
use crate::prompts::{self, EXTRACTION_PROMPT};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

/// Thin client for the Anthropic Messages API, shared by every capability.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(model: Option<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: api_key.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a single user turn and return the concatenated text blocks.
    pub async fn complete(&self, content: Vec<ContentBlock>) -> Result<String> {
        let body = build_request(&self.model, content);

        let resp = self
            .http
            .post(API_URL)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic API error ({}): {}", status, text);
        }

        let api_resp: ApiResponse = resp.json().await?;
        if let Some(usage) = &api_resp.usage {
            tracing::debug!(
                model = %self.model,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "anthropic call finished"
            );
        }
        response_text(&api_resp)
    }
}

/// Extracts essay text from an image with a vision-capable model.
pub struct AnthropicExtractor {
    client: AnthropicClient,
}

impl AnthropicExtractor {
    pub fn new(client: AnthropicClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextExtractor for AnthropicExtractor {
    async fn extract(&self, image: &ImageInput) -> Result<String> {
        self.client
            .complete(vec![
                ContentBlock::image(image),
                ContentBlock::Text {
                    text: EXTRACTION_PROMPT.to_string(),
                },
            ])
            .await
    }
}

/// An analysis driven by an instruction template.
pub struct AnthropicAnalyzer {
    name: String,
    client: AnthropicClient,
    template: String,
}

impl AnthropicAnalyzer {
    pub fn new(name: impl Into<String>, client: AnthropicClient, template: String) -> Self {
        Self {
            name: name.into(),
            client,
            template,
        }
    }
}

#[async_trait]
impl Capability for AnthropicAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &AnalysisRequest) -> Result<String> {
        let prompt = prompts::render(&self.template, request);
        tracing::debug!(capability = %self.name, prompt_len = prompt.len(), "invoking analysis");
        self.client
            .complete(vec![ContentBlock::Text { text: prompt }])
            .await
    }
}

fn build_request(model: &str, content: Vec<ContentBlock>) -> ApiRequest<'_> {
    ApiRequest {
        model,
        max_tokens: MAX_TOKENS,
        messages: vec![Message {
            role: "user",
            content,
        }],
    }
}

fn response_text(resp: &ApiResponse) -> Result<String> {
    let text: String = resp
        .content
        .iter()
        .filter_map(|block| {
            if block.content_type == "text" {
                block.text.as_deref()
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        bail!("Anthropic API returned empty response");
    }
    Ok(text)
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

/// One block of a user message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    pub fn image(image: &ImageInput) -> Self {
        ContentBlock::Image {
            source: ImageSource {
                source_type: "base64",
                media_type: image.media_type.clone(),
                data: STANDARD.encode(&image.bytes),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ResponseBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn image_block_is_base64_source() {
        let image = ImageInput::new(vec![1, 2, 3], "image/jpeg");
        let json = serde_json::to_value(ContentBlock::image(&image)).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["source"]["type"], "base64");
        assert_eq!(json["source"]["media_type"], "image/jpeg");
        assert_eq!(json["source"]["data"], "AQID");
    }

    #[test]
    fn request_wraps_content_in_single_user_turn() {
        let body = build_request(
            "m",
            vec![ContentBlock::Text {
                text: "hi".to_string(),
            }],
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["max_tokens"], MAX_TOKENS);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn response_text_joins_text_blocks() {
        let resp = parse(
            r#"{"content": [
                {"type": "text", "text": "one "},
                {"type": "tool_use"},
                {"type": "text", "text": "two"}
            ]}"#,
        );
        assert_eq!(response_text(&resp).unwrap(), "one two");
    }

    #[test]
    fn response_text_rejects_empty() {
        let resp = parse(r#"{"content": [], "usage": {"input_tokens": 1, "output_tokens": 0}}"#);
        let err = response_text(&resp).unwrap_err();
        assert!(err.to_string().contains("empty response"));
    }

    #[test]
    fn client_defaults_model() {
        let client = AnthropicClient::new(None, "key");
        assert_eq!(client.model(), DEFAULT_MODEL);
        let client = AnthropicClient::new(Some("other".to_string()), "key");
        assert_eq!(client.model(), "other");
    }
}
