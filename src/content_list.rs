//! The parser's `<stem>_content_list.json` format.
//!
//! MinerU writes one JSON array per document, each element a block tagged by
//! `"type"`. Only the four block kinds that become nodes are modelled; every
//! other kind deserialises to [`ContentBlock::Other`] and is skipped.

use crate::error::RagError;
use serde::Deserialize;
use std::path::Path;

/// One block of parsed content.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
        #[serde(default)]
        page_idx: u32,
        /// Heading level (1 = title); absent for body text.
        #[serde(default)]
        text_level: Option<u8>,
    },
    Equation {
        #[serde(default)]
        text: String,
        #[serde(default)]
        img_path: String,
        #[serde(default)]
        page_idx: u32,
        #[serde(default)]
        text_format: Option<String>,
    },
    Table {
        /// HTML markup of the table.
        #[serde(default)]
        table_body: String,
        #[serde(default)]
        table_caption: Vec<String>,
        #[serde(default)]
        table_footnote: Vec<String>,
        #[serde(default)]
        img_path: String,
        #[serde(default)]
        page_idx: u32,
    },
    Image {
        #[serde(default)]
        img_path: String,
        #[serde(default)]
        image_caption: Vec<String>,
        #[serde(default)]
        image_footnote: Vec<String>,
        #[serde(default)]
        page_idx: u32,
    },
    #[serde(other)]
    Other,
}

impl ContentBlock {
    pub fn page_idx(&self) -> Option<u32> {
        match self {
            ContentBlock::Text { page_idx, .. }
            | ContentBlock::Equation { page_idx, .. }
            | ContentBlock::Table { page_idx, .. }
            | ContentBlock::Image { page_idx, .. } => Some(*page_idx),
            ContentBlock::Other => None,
        }
    }
}

/// Join captions the way they are embedded: every caption followed by `\n`.
pub fn join_captions(captions: &[String]) -> String {
    captions.iter().map(|c| format!("{c}\n")).collect()
}

/// Parse a content list from JSON text.
pub fn parse_content_list(json: &str, path: &Path) -> Result<Vec<ContentBlock>, RagError> {
    serde_json::from_str(json).map_err(|e| RagError::ContentListMalformed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Read and parse the content list at `path`.
pub async fn read_content_list(path: &Path) -> Result<Vec<ContentBlock>, RagError> {
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RagError::ContentListMissing {
                path: path.to_path_buf(),
            }
        } else {
            RagError::ContentListMalformed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        }
    })?;
    parse_content_list(&json, path)
}
