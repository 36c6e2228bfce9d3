//! Nodes: the unit of embedded document content.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of content a node was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Equation,
    Table,
    Image,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Equation => "equation",
            ContentType::Table => "table",
            ContentType::Image => "image",
        }
    }

    /// Whether the node's text goes into the textual context of an answer.
    /// Image nodes are sent to the model as pictures instead.
    pub fn is_textual(&self) -> bool {
        !matches!(self, ContentType::Image)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata stored with every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub content_type: ContentType,
    /// 0-indexed page the content came from.
    pub page_idx: u32,
    /// Original PDF file name, e.g. `deepseek-r1.pdf`.
    pub source_file: String,
    /// Rendered image of the block; empty for plain text.
    pub image_path: String,
}

/// A unit of parsed document content, ready to be embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub text: String,
    pub metadata: NodeMetadata,
}

impl Node {
    pub fn new(text: impl Into<String>, metadata: NodeMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            metadata,
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.metadata.content_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_serialises_lowercase() {
        let json = serde_json::to_string(&ContentType::Equation).unwrap();
        assert_eq!(json, "\"equation\"");
        let back: ContentType = serde_json::from_str("\"table\"").unwrap();
        assert_eq!(back, ContentType::Table);
    }

    #[test]
    fn only_images_are_non_textual() {
        assert!(ContentType::Text.is_textual());
        assert!(ContentType::Equation.is_textual());
        assert!(ContentType::Table.is_textual());
        assert!(!ContentType::Image.is_textual());
    }

    #[test]
    fn new_nodes_get_distinct_ids() {
        let meta = NodeMetadata {
            content_type: ContentType::Text,
            page_idx: 0,
            source_file: "a.pdf".into(),
            image_path: String::new(),
        };
        let a = Node::new("x", meta.clone());
        let b = Node::new("x", meta);
        assert_ne!(a.id, b.id);
    }
}
