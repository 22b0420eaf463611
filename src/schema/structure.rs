use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reviewer comment anchored to a text range. Extracted once per run by
/// the inspector and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub author: String,
    /// 1-based page number.
    pub page: u32,
    /// The text the annotation is attached to, truncated on extraction.
    pub anchor_text: String,
    /// The reviewer's instruction.
    pub body_text: String,
    pub range_start: usize,
    pub range_end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Annotation {
    pub fn validate(&self) -> Result<(), String> {
        if self.page < 1 {
            return Err(format!("annotation {} has page {} (< 1)", self.id, self.page));
        }
        if self.range_start > self.range_end {
            return Err(format!("annotation {} has inverted range", self.id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    /// 1-9.
    pub level: u8,
    pub text: String,
    pub style: String,
    pub range_start: usize,
    pub range_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleKind {
    Paragraph,
    Character,
    Table,
    List,
}

impl StyleKind {
    /// Map the driver's numeric style-type code. Unknown codes fall back to
    /// paragraph, matching how office drivers report custom styles.
    pub fn from_driver_code(code: i32) -> StyleKind {
        match code {
            2 => StyleKind::Character,
            3 => StyleKind::Table,
            4 => StyleKind::List,
            _ => StyleKind::Paragraph,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StyleKind::Paragraph => "paragraph",
            StyleKind::Character => "character",
            StyleKind::Table => "table",
            StyleKind::List => "list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub name: String,
    pub kind: StyleKind,
    pub built_in: bool,
    pub in_use: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub level: u8,
    pub text: String,
    pub page_number: u32,
    pub range_start: usize,
    pub range_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Web,
    Email,
    File,
    Internal,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Web => "web",
            LinkKind::Email => "email",
            LinkKind::File => "file",
            LinkKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperlink {
    pub text: String,
    pub address: String,
    pub kind: LinkKind,
    pub range_start: usize,
    pub range_end: usize,
}

/// Value-typed snapshot of the document's format-bearing elements at a point
/// in time. Two structures compare by value; the validator diffs them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Structure {
    pub headings: Vec<Heading>,
    pub styles: Vec<Style>,
    pub toc_entries: Vec<TocEntry>,
    pub hyperlinks: Vec<Hyperlink>,
    pub page_count: u32,
    pub word_count: u32,
}

/// Full pre- or post-run capture: structure + annotations + a content
/// checksum of the on-disk file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub timestamp: DateTime<Utc>,
    pub document_path: PathBuf,
    pub structure: Structure,
    pub annotations: Vec<Annotation>,
    pub checksum: String,
}
