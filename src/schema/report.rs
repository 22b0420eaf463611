use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskKind;

/// Outcome of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub message: String,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Aggregate outcome of an executor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub task_results: Vec<TaskResult>,
    pub duration_secs: f64,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

impl ExecutionResult {
    pub fn empty() -> Self {
        Self {
            success: true,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            task_results: Vec::new(),
            duration_secs: 0.0,
            cancelled: false,
            error_summary: None,
        }
    }
}

/// The format-affecting difference kinds the validator tracks. Content edits
/// deliberately produce none of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    HeadingLevelChange,
    HeadingStyleChange,
    StyleUsageChange,
    TocStructureChange,
    TocLevelsChange,
    HyperlinkAddressChange,
    HeadingAdded,
    HeadingRemoved,
}

impl ChangeKind {
    /// Task kinds that could have legitimately produced this change.
    pub fn candidate_task_kinds(self) -> &'static [TaskKind] {
        match self {
            ChangeKind::HeadingLevelChange => &[TaskKind::SetHeadingLevel],
            ChangeKind::HeadingStyleChange => {
                &[TaskKind::SetHeadingLevel, TaskKind::SetParagraphStyle]
            }
            ChangeKind::StyleUsageChange => {
                &[TaskKind::SetParagraphStyle, TaskKind::ApplyTemplate]
            }
            ChangeKind::TocStructureChange => &[TaskKind::RebuildToc, TaskKind::UpdateTocLevels],
            ChangeKind::TocLevelsChange => &[TaskKind::UpdateTocLevels],
            ChangeKind::HyperlinkAddressChange => &[TaskKind::ReplaceHyperlink],
            // Promoting a plain paragraph to a heading (or back) shows up as
            // an add/remove, not a level change.
            ChangeKind::HeadingAdded | ChangeKind::HeadingRemoved => &[
                TaskKind::SetHeadingLevel,
                TaskKind::SetParagraphStyle,
                TaskKind::ApplyTemplate,
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::HeadingLevelChange => "heading_level_change",
            ChangeKind::HeadingStyleChange => "heading_style_change",
            ChangeKind::StyleUsageChange => "style_usage_change",
            ChangeKind::TocStructureChange => "toc_structure_change",
            ChangeKind::TocLevelsChange => "toc_levels_change",
            ChangeKind::HyperlinkAddressChange => "hyperlink_address_change",
            ChangeKind::HeadingAdded => "heading_added",
            ChangeKind::HeadingRemoved => "heading_removed",
        }
    }
}

/// One observed difference between two structures, plus its authorization
/// verdict once Gate L4 has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatChange {
    pub kind: ChangeKind,
    pub element_id: String,
    /// Character range of the affected element, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_range: Option<(usize, usize)>,
    /// Display text or name of the affected element, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorizing_annotation_id: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Gate L4 verdict for a full run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub authorized: Vec<FormatChange>,
    pub unauthorized: Vec<FormatChange>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn total_changes(&self) -> usize {
        self.authorized.len() + self.unauthorized.len()
    }

    /// A clean report for runs that never reached validation (dry runs,
    /// empty plans).
    pub fn clean() -> Self {
        Self {
            is_valid: true,
            authorized: Vec::new(),
            unauthorized: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
            validated_at: Utc::now(),
        }
    }
}
