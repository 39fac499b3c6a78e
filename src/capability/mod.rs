pub mod anthropic;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;

/// Everything an analysis capability may look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// Text extracted from the submitted image.
    pub text: String,
    /// Essay topic the argumentation is judged against.
    pub topic: String,
    /// Supporting texts handed to the writer alongside the topic.
    pub auxiliary_context: Option<String>,
}

/// A submitted image and its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    /// Build an input, guessing the media type from the leading bytes.
    /// Unknown formats are labelled `image/png`.
    pub fn sniff(bytes: Vec<u8>) -> Self {
        let media_type = sniff_media_type(&bytes);
        Self::new(bytes, media_type)
    }
}

fn sniff_media_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}

/// One independently failable analysis of extracted text.
/// Errors are recorded as that stage's failure and never retried here.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    async fn invoke(&self, request: &AnalysisRequest) -> Result<String>;
}

/// Turns an image into text. Runs synchronously ahead of the analyses.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &ImageInput) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_detects_common_formats() {
        assert_eq!(ImageInput::sniff(vec![0xFF, 0xD8, 0xFF, 0xE0]).media_type, "image/jpeg");
        assert_eq!(ImageInput::sniff(b"GIF89a".to_vec()).media_type, "image/gif");
        assert_eq!(
            ImageInput::sniff(b"RIFF\0\0\0\0WEBPVP8 ".to_vec()).media_type,
            "image/webp"
        );
        assert_eq!(
            ImageInput::sniff(b"\x89PNG\r\n\x1a\n".to_vec()).media_type,
            "image/png"
        );
    }

    #[test]
    fn sniff_defaults_to_png() {
        assert_eq!(ImageInput::sniff(Vec::new()).media_type, "image/png");
        assert_eq!(ImageInput::sniff(b"RIFF".to_vec()).media_type, "image/png");
    }
}
