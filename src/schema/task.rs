use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Closed set of edit operations. The content subset needs no annotation
/// authorization; the format subset always does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Rewrite,
    Insert,
    Delete,
    RefreshTocNumbers,
    SetParagraphStyle,
    SetHeadingLevel,
    ApplyTemplate,
    ReplaceHyperlink,
    RebuildToc,
    UpdateTocLevels,
}

impl TaskKind {
    /// Format-class tasks require a `source_annotation_id`.
    pub fn requires_authorization(self) -> bool {
        matches!(
            self,
            TaskKind::SetParagraphStyle
                | TaskKind::SetHeadingLevel
                | TaskKind::ApplyTemplate
                | TaskKind::ReplaceHyperlink
                | TaskKind::RebuildToc
                | TaskKind::UpdateTocLevels
        )
    }

    /// Content-class tasks are whitelisted to run without an annotation.
    pub fn allowed_without_annotation(self) -> bool {
        matches!(
            self,
            TaskKind::Rewrite | TaskKind::Insert | TaskKind::Delete | TaskKind::RefreshTocNumbers
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Rewrite => "rewrite",
            TaskKind::Insert => "insert",
            TaskKind::Delete => "delete",
            TaskKind::RefreshTocNumbers => "refresh_toc_numbers",
            TaskKind::SetParagraphStyle => "set_paragraph_style",
            TaskKind::SetHeadingLevel => "set_heading_level",
            TaskKind::ApplyTemplate => "apply_template",
            TaskKind::ReplaceHyperlink => "replace_hyperlink",
            TaskKind::RebuildToc => "rebuild_toc",
            TaskKind::UpdateTocLevels => "update_toc_levels",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Low < Medium < High; the derive order matters for scheduling tie-breaks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Where a task applies in the document. String payloads are non-empty and
/// trimmed by construction (the planner rejects anything else).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Bookmark(String),
    Range { start: usize, end: usize },
    Heading(String),
    Find(String),
}

impl Locator {
    pub fn by_str(&self) -> &'static str {
        match self {
            Locator::Bookmark(_) => "bookmark",
            Locator::Range { .. } => "range",
            Locator::Heading(_) => "heading",
            Locator::Find(_) => "find",
        }
    }

    pub fn value_string(&self) -> String {
        match self {
            Locator::Bookmark(name) => name.clone(),
            Locator::Range { start, end } => format!("{start}-{end}"),
            Locator::Heading(text) => text.clone(),
            Locator::Find(text) => text.clone(),
        }
    }

    /// Parse the wire form. Range values accept `"a-b"`, `"a,len"`, or a
    /// bare position.
    pub fn parse(by: &str, value: &str) -> Result<Locator, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("locator value is empty".to_string());
        }
        match by {
            "bookmark" => Ok(Locator::Bookmark(value.to_string())),
            "heading" => Ok(Locator::Heading(value.to_string())),
            "find" => Ok(Locator::Find(value.to_string())),
            "range" => {
                if let Some((a, b)) = value.split_once('-') {
                    let start: usize = a.trim().parse().map_err(|_| bad_range(value))?;
                    let end: usize = b.trim().parse().map_err(|_| bad_range(value))?;
                    Ok(Locator::Range { start, end })
                } else if let Some((a, len)) = value.split_once(',') {
                    let start: usize = a.trim().parse().map_err(|_| bad_range(value))?;
                    let len: usize = len.trim().parse().map_err(|_| bad_range(value))?;
                    Ok(Locator::Range {
                        start,
                        end: start + len,
                    })
                } else {
                    let start: usize = value.parse().map_err(|_| bad_range(value))?;
                    Ok(Locator::Range {
                        start,
                        end: start + 1,
                    })
                }
            }
            other => Err(format!("unknown locator type: {other}")),
        }
    }
}

fn bad_range(value: &str) -> String {
    format!("malformed range locator value: {value:?}")
}

// Serialize in the wire shape ({"by": ..., "value": ...}) so exported plans
// match what the LLM was asked for.
impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Locator", 2)?;
        s.serialize_field("by", self.by_str())?;
        s.serialize_field("value", &self.value_string())?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            by: String,
            value: String,
        }
        let raw = Raw::deserialize(deserializer)?;
        Locator::parse(&raw.by, &raw.value).map_err(D::Error::custom)
    }
}

/// A typed edit command. The planner is the only producer; everything past
/// Gate L2 can assume the invariants checked by `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_annotation_id: Option<String>,
    pub locator: Locator,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    pub risk: RiskLevel,
    #[serde(default)]
    pub requires_user_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Task {
    pub fn is_format(&self) -> bool {
        self.kind.requires_authorization()
    }

    /// Structural validity independent of any annotation list.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task id is empty".to_string());
        }
        if self.instruction.trim().is_empty() {
            return Err("task instruction is empty".to_string());
        }
        match &self.locator {
            Locator::Bookmark(v) | Locator::Heading(v) | Locator::Find(v) => {
                if v.trim().is_empty() {
                    return Err("locator value is empty".to_string());
                }
            }
            Locator::Range { .. } => {}
        }
        Ok(())
    }
}

/// Ordered, authorized task sequence. Order is execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub total_tasks: usize,
}

impl Plan {
    pub fn new(tasks: Vec<Task>, document_path: Option<PathBuf>) -> Self {
        let total_tasks = tasks.len();
        Self {
            tasks,
            document_path,
            created_at: Utc::now(),
            total_tasks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tasks.len() != self.total_tasks {
            return Err(format!(
                "declared total ({}) does not match task count ({})",
                self.total_tasks,
                self.tasks.len()
            ));
        }
        for task in &self.tasks {
            task.validate().map_err(|e| format!("{}: {e}", task.id))?;
        }
        Ok(())
    }
}
