//! Wire types for the LLM response. These mirror the JSON schema sent in the
//! user prompt; the planner converts them into canonical [`Task`] values,
//! skipping malformed elements instead of failing the run.
//!
//! [`Task`]: super::task::Task

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::task::{RiskLevel, TaskKind};

/// Root object the model must return: `{"tasks": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskPlanWire {
    pub tasks: Vec<TaskWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskWire {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub locator: LocatorWire,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_comment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    #[serde(default)]
    pub requires_user_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LocatorWire {
    /// One of `bookmark`, `range`, `heading`, `find`.
    pub by: LocatorBy,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LocatorBy {
    Bookmark,
    Range,
    Heading,
    Find,
}

impl LocatorBy {
    pub fn as_str(self) -> &'static str {
        match self {
            LocatorBy::Bookmark => "bookmark",
            LocatorBy::Range => "range",
            LocatorBy::Heading => "heading",
            LocatorBy::Find => "find",
        }
    }
}

/// The JSON schema embedded in the user prompt.
pub fn task_plan_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(TaskPlanWire);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({}))
}
