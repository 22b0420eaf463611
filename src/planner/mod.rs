//! Turns raw LLM output into an ordered, authorized [`Plan`]: wire parsing,
//! risk defaulting, the Gate L2 authorization filter, dependency resolution,
//! and chunk merging.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::error::{redline_error, Result};
use crate::schema::{Annotation, Locator, Plan, RiskLevel, Task, TaskKind, TaskWire};

/// A task dropped before execution, with the reason recorded for the plan
/// artifact. Drops never propagate as errors.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedTask {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub reason: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub overall: RiskLevel,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub high_ratio: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug)]
pub struct PlanningResult {
    pub plan: Plan,
    /// Element count of the raw `tasks` arrays, before any filtering.
    pub raw_task_count: usize,
    pub accepted_count: usize,
    pub skipped: Vec<SkippedTask>,
    pub warnings: Vec<String>,
    pub risk_report: RiskReport,
    pub llm_secs: f64,
    pub planning_secs: f64,
}

/// Default risk when the model omits it: TOC/template rebuilds are high,
/// other format edits medium, content edits low.
pub fn default_risk(kind: TaskKind) -> RiskLevel {
    match kind {
        TaskKind::ApplyTemplate | TaskKind::RebuildToc | TaskKind::UpdateTocLevels => {
            RiskLevel::High
        }
        TaskKind::SetParagraphStyle | TaskKind::SetHeadingLevel | TaskKind::ReplaceHyperlink => {
            RiskLevel::Medium
        }
        TaskKind::Rewrite | TaskKind::Insert | TaskKind::Delete | TaskKind::RefreshTocNumbers => {
            RiskLevel::Low
        }
    }
}

/// Require a top-level object with a `tasks` array. A malformed root is
/// non-recoverable (`PlanValidation`); malformed elements are handled later,
/// one by one.
pub fn parse_task_array(response: &serde_json::Value) -> Result<Vec<serde_json::Value>> {
    let tasks = response.get("tasks").ok_or_else(|| {
        redline_error::PlanValidationSnafu {
            message: "response has no top-level 'tasks' field".to_string(),
        }
        .build()
    })?;
    let array = tasks.as_array().ok_or_else(|| {
        redline_error::PlanValidationSnafu {
            message: "'tasks' is not an array".to_string(),
        }
        .build()
    })?;
    Ok(array.clone())
}

fn raw_id(value: &serde_json::Value, index: usize) -> String {
    value
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("task_{}", index + 1))
}

/// Convert one chunk's raw elements into typed tasks, skipping anything
/// malformed with a recorded reason.
fn convert_wire_tasks(
    raw: &[serde_json::Value],
) -> (Vec<Task>, Vec<SkippedTask>) {
    let mut tasks = Vec::with_capacity(raw.len());
    let mut skipped = Vec::new();

    for (i, value) in raw.iter().enumerate() {
        let wire: TaskWire = match serde_json::from_value(value.clone()) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!("skipping malformed task element {}: {e}", i + 1);
                skipped.push(SkippedTask {
                    task_id: raw_id(value, i),
                    kind: value
                        .get("type")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    reason: format!("does not match the task schema: {e}"),
                    raw: value.clone(),
                });
                continue;
            }
        };

        let locator = match Locator::parse(wire.locator.by.as_str(), &wire.locator.value) {
            Ok(locator) => locator,
            Err(reason) => {
                tracing::warn!("skipping task {}: {reason}", wire.id);
                skipped.push(SkippedTask {
                    task_id: wire.id.clone(),
                    kind: Some(wire.kind.as_str().to_string()),
                    reason,
                    raw: value.clone(),
                });
                continue;
            }
        };

        let instruction = wire.instruction.trim().to_string();
        if instruction.is_empty() {
            skipped.push(SkippedTask {
                task_id: wire.id.clone(),
                kind: Some(wire.kind.as_str().to_string()),
                reason: "instruction is empty".to_string(),
                raw: value.clone(),
            });
            continue;
        }

        tasks.push(Task {
            id: wire.id,
            kind: wire.kind,
            source_annotation_id: wire.source_comment_id.filter(|s| !s.trim().is_empty()),
            locator,
            instruction,
            dependencies: wire.dependencies,
            risk: wire.risk.unwrap_or_else(|| default_risk(wire.kind)),
            requires_user_review: wire.requires_user_review,
            notes: wire.notes,
        });
    }

    (tasks, skipped)
}

/// Gate L2: drop tasks that violate the authorization invariant. Format
/// tasks must cite an annotation that actually exists; a closed TaskKind
/// makes the whitelist rule structural, but the citation check is real.
pub fn gate_l2(
    tasks: Vec<Task>,
    annotations: &[Annotation],
) -> (Vec<Task>, Vec<SkippedTask>) {
    let known_ids: HashSet<&str> = annotations.iter().map(|a| a.id.as_str()).collect();
    let mut accepted = Vec::with_capacity(tasks.len());
    let mut skipped = Vec::new();

    for task in tasks {
        if task.kind.requires_authorization() {
            match &task.source_annotation_id {
                None => {
                    tracing::warn!(
                        task = %task.id,
                        kind = %task.kind,
                        "dropping unauthorized format task"
                    );
                    skipped.push(skip_for(&task, "format task has no source_comment_id"));
                    continue;
                }
                Some(id) if !known_ids.contains(id.as_str()) => {
                    tracing::warn!(
                        task = %task.id,
                        annotation = %id,
                        "dropping format task citing unknown annotation"
                    );
                    skipped.push(skip_for(
                        &task,
                        &format!("cited annotation '{id}' does not exist"),
                    ));
                    continue;
                }
                Some(_) => {}
            }
        }
        accepted.push(task);
    }

    (accepted, skipped)
}

fn skip_for(task: &Task, reason: &str) -> SkippedTask {
    SkippedTask {
        task_id: task.id.clone(),
        kind: Some(task.kind.as_str().to_string()),
        reason: reason.to_string(),
        raw: serde_json::to_value(task).unwrap_or(serde_json::Value::Null),
    }
}

/// Kahn topological sort over declared dependencies. Equal-rank ties break
/// by (risk ascending, kind lexicographic); unknown dependency ids are
/// warned about and ignored; cycles are broken by appending the residual
/// tasks in their original order.
pub fn resolve_dependencies(tasks: Vec<Task>) -> (Vec<Task>, Vec<String>) {
    let mut warnings = Vec::new();
    let ids: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
    let index_of: HashMap<String, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.clone(), i))
        .collect();

    let mut in_degree: HashMap<String, usize> = HashMap::new();
    for task in &tasks {
        let mut degree = 0;
        for dep in &task.dependencies {
            if ids.contains(dep) {
                degree += 1;
            } else {
                warnings.push(format!(
                    "task {} depends on unknown task {dep}",
                    task.id
                ));
            }
        }
        in_degree.insert(task.id.clone(), degree);
    }

    let mut ready: Vec<&Task> = tasks
        .iter()
        .filter(|t| in_degree[&t.id] == 0)
        .collect();
    let mut ordered: Vec<Task> = Vec::with_capacity(tasks.len());
    let mut done: HashSet<String> = HashSet::new();

    while !ready.is_empty() {
        ready.sort_by_key(|t| (t.risk, t.kind.as_str(), index_of[&t.id]));
        let next = ready.remove(0);
        done.insert(next.id.clone());
        ordered.push(next.clone());

        for task in &tasks {
            if done.contains(&task.id) || ready.iter().any(|t| t.id == task.id) {
                continue;
            }
            if task.dependencies.contains(&next.id) {
                let degree = in_degree.get_mut(&task.id).expect("task registered");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(task);
                }
            }
        }
    }

    if ordered.len() != tasks.len() {
        let residual: Vec<Task> = tasks
            .iter()
            .filter(|t| !done.contains(&t.id))
            .cloned()
            .collect();
        warnings.push(format!(
            "dependency cycle among tasks [{}]; executing them in declared order",
            residual
                .iter()
                .map(|t| t.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        ordered.extend(residual);
    }

    (ordered, warnings)
}

/// Batch risk assessment over the accepted tasks.
pub fn assess_batch_risk(tasks: &[Task]) -> RiskReport {
    let low = tasks.iter().filter(|t| t.risk == RiskLevel::Low).count();
    let medium = tasks.iter().filter(|t| t.risk == RiskLevel::Medium).count();
    let high = tasks.iter().filter(|t| t.risk == RiskLevel::High).count();
    let total = tasks.len();
    let high_ratio = if total > 0 {
        high as f64 / total as f64
    } else {
        0.0
    };

    let overall = if high_ratio > 0.3 {
        RiskLevel::High
    } else if high_ratio > 0.1 || medium as f64 > total as f64 * 0.5 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let mut recommendations = Vec::new();
    if high_ratio > 0.3 {
        recommendations.push("run the low-risk tasks first, in separate batches".to_string());
        recommendations.push("try the high-risk tasks under --dry-run before applying".to_string());
    }
    if high > 0 {
        recommendations.push("keep the pre-run backup until the result is reviewed".to_string());
    }
    if medium > 10 {
        recommendations.push("consider splitting this run; many medium-risk tasks".to_string());
    }

    RiskReport {
        overall,
        low,
        medium,
        high,
        high_ratio,
        recommendations,
    }
}

/// Build a plan from one or more chunk responses. Steps 1-3 run per chunk;
/// the authorized lists are concatenated (ids deduplicated with a
/// `_c<chunk>` suffix) before dependency resolution.
pub fn build_plan(
    chunk_responses: &[serde_json::Value],
    annotations: &[Annotation],
    document_path: Option<&Path>,
    llm_secs: f64,
) -> Result<PlanningResult> {
    let started = Instant::now();
    let mut raw_task_count = 0;
    let mut all_tasks: Vec<Task> = Vec::new();
    let mut skipped: Vec<SkippedTask> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut used_ids: HashSet<String> = HashSet::new();

    for (chunk_index, response) in chunk_responses.iter().enumerate() {
        let raw = parse_task_array(response)?;
        raw_task_count += raw.len();

        let (tasks, wire_skipped) = convert_wire_tasks(&raw);
        skipped.extend(wire_skipped);

        let (mut authorized, l2_skipped) = gate_l2(tasks, annotations);
        skipped.extend(l2_skipped);

        // unique ids across chunks; dependencies inside the chunk follow
        // their renamed targets
        if chunk_responses.len() > 1 {
            let mut renames: HashMap<String, String> = HashMap::new();
            for task in &mut authorized {
                if used_ids.contains(&task.id) {
                    let renamed = format!("{}_c{chunk_index}", task.id);
                    renames.insert(task.id.clone(), renamed.clone());
                    task.id = renamed;
                }
                used_ids.insert(task.id.clone());
            }
            if !renames.is_empty() {
                for task in &mut authorized {
                    for dep in &mut task.dependencies {
                        if let Some(renamed) = renames.get(dep) {
                            *dep = renamed.clone();
                        }
                    }
                }
            }
        } else {
            used_ids.extend(authorized.iter().map(|t| t.id.clone()));
        }

        all_tasks.extend(authorized);
    }

    let (ordered, order_warnings) = resolve_dependencies(all_tasks);
    warnings.extend(order_warnings);

    let risk_report = assess_batch_risk(&ordered);
    tracing::info!(
        accepted = ordered.len(),
        skipped = skipped.len(),
        overall_risk = risk_report.overall.as_str(),
        "plan built"
    );

    let accepted_count = ordered.len();
    let plan = Plan::new(ordered, document_path.map(|p| p.to_path_buf()));

    Ok(PlanningResult {
        plan,
        raw_task_count,
        accepted_count,
        skipped,
        warnings,
        risk_report,
        llm_secs,
        planning_secs: started.elapsed().as_secs_f64(),
    })
}
