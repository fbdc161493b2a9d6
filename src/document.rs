use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const MAX_DOCUMENT_BYTES_DEFAULT: usize = 10 * 1024 * 1024;

/// Upper bound on accepted document payloads, from `STUDYMAP_MAX_DOCUMENT_BYTES`.
pub fn max_document_bytes() -> usize {
    std::env::var("STUDYMAP_MAX_DOCUMENT_BYTES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(MAX_DOCUMENT_BYTES_DEFAULT)
}

/// Source material handed to the generator. Binary payloads travel as base64 in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Document {
    Text {
        text: String,
    },
    Pdf {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl Document {
    pub fn text(text: impl Into<String>) -> Self {
        Document::Text { text: text.into() }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let limit = max_document_bytes();
        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to read document '{}'", path.display()))?;
        if metadata.len() > limit as u64 {
            bail!(
                "document '{}' is {} bytes; the limit is {} bytes",
                path.display(),
                metadata.len(),
                limit
            );
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let document = match extension.as_str() {
            "txt" | "md" | "markdown" => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read document '{}'", path.display()))?;
                Document::Text { text }
            }
            "pdf" => Document::Pdf {
                data: read_bytes(path)?,
            },
            "png" | "jpg" | "jpeg" | "webp" => Document::Image {
                mime_type: image_mime_type(&extension).to_string(),
                data: read_bytes(path)?,
            },
            other => bail!(
                "unsupported document type '{}' (expected txt, md, pdf, png, jpg or webp)",
                other
            ),
        };

        document.validate(limit)?;
        Ok(document)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Document::Text { .. } => "text",
            Document::Pdf { .. } => "pdf",
            Document::Image { .. } => "image",
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            Document::Text { text } => text.len(),
            Document::Pdf { data } | Document::Image { data, .. } => data.len(),
        }
    }

    /// Rejects empty and oversized documents.
    pub fn validate(&self, limit: usize) -> Result<()> {
        if self.byte_len() > limit {
            bail!(
                "{} document is {} bytes; the limit is {} bytes",
                self.kind(),
                self.byte_len(),
                limit
            );
        }
        match self {
            Document::Text { text } if text.trim().is_empty() => {
                bail!("document text is empty")
            }
            Document::Pdf { data } | Document::Image { data, .. } if data.is_empty() => {
                bail!("{} document is empty", self.kind())
            }
            _ => Ok(()),
        }
    }

    /// The inline text for prompts, or `None` when the backend has to read an attachment.
    pub fn inline_text(&self) -> Option<&str> {
        match self {
            Document::Text { text } => Some(text),
            _ => None,
        }
    }

    /// `(mime type, data URL)` for binary documents.
    pub fn attachment(&self) -> Option<(&str, String)> {
        match self {
            Document::Text { .. } => None,
            Document::Pdf { data } => Some(("application/pdf", data_url("application/pdf", data))),
            Document::Image { mime_type, data } => Some((mime_type.as_str(), data_url(mime_type, data))),
        }
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read document '{}'", path.display()))
}

fn image_mime_type(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

fn data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}
