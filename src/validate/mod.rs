//! Post-hoc audit (Gate L4): diff two structures, classify every observed
//! format change as authorized or not by matching it to executed tasks and
//! their annotations, and decide whether the run must be rolled back.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::schema::{
    Annotation, ChangeKind, DocumentSnapshot, FormatChange, Locator, Structure, Task,
    ValidationReport,
};

fn change(
    kind: ChangeKind,
    element_id: String,
    element_range: Option<(usize, usize)>,
    element_text: Option<String>,
    old_value: serde_json::Value,
    new_value: serde_json::Value,
) -> FormatChange {
    FormatChange {
        kind,
        element_id,
        element_range,
        element_text,
        old_value,
        new_value,
        authorized: false,
        authorizing_annotation_id: None,
        detected_at: Utc::now(),
    }
}

/// Deterministic structure diff. `diff_structures(s, s)` is empty for any
/// structure.
pub fn diff_structures(before: &Structure, after: &Structure) -> Vec<FormatChange> {
    let mut changes = Vec::new();

    // headings keyed by character range
    let before_headings: HashMap<(usize, usize), &crate::schema::Heading> = before
        .headings
        .iter()
        .map(|h| ((h.range_start, h.range_end), h))
        .collect();
    let after_headings: HashMap<(usize, usize), &crate::schema::Heading> = after
        .headings
        .iter()
        .map(|h| ((h.range_start, h.range_end), h))
        .collect();

    for h in &after.headings {
        let key = (h.range_start, h.range_end);
        match before_headings.get(&key) {
            Some(prev) => {
                if prev.level != h.level {
                    changes.push(change(
                        ChangeKind::HeadingLevelChange,
                        format!("heading_{}_{}", key.0, key.1),
                        Some(key),
                        Some(h.text.clone()),
                        prev.level.into(),
                        h.level.into(),
                    ));
                }
                if prev.style != h.style {
                    changes.push(change(
                        ChangeKind::HeadingStyleChange,
                        format!("heading_{}_{}", key.0, key.1),
                        Some(key),
                        Some(h.text.clone()),
                        prev.style.clone().into(),
                        h.style.clone().into(),
                    ));
                }
            }
            None => changes.push(change(
                ChangeKind::HeadingAdded,
                format!("heading_{}_{}", key.0, key.1),
                Some(key),
                Some(h.text.clone()),
                serde_json::Value::Null,
                h.level.into(),
            )),
        }
    }
    for h in &before.headings {
        let key = (h.range_start, h.range_end);
        if !after_headings.contains_key(&key) {
            changes.push(change(
                ChangeKind::HeadingRemoved,
                format!("heading_{}_{}", key.0, key.1),
                Some(key),
                Some(h.text.clone()),
                h.level.into(),
                serde_json::Value::Null,
            ));
        }
    }

    // styles keyed by name; only the in-use flag is tracked
    let before_styles: HashMap<&str, &crate::schema::Style> =
        before.styles.iter().map(|s| (s.name.as_str(), s)).collect();
    for s in &after.styles {
        if let Some(prev) = before_styles.get(s.name.as_str()) {
            if prev.in_use != s.in_use {
                changes.push(change(
                    ChangeKind::StyleUsageChange,
                    s.name.clone(),
                    None,
                    Some(s.name.clone()),
                    prev.in_use.into(),
                    s.in_use.into(),
                ));
            }
        }
    }

    // TOC: an entry-count change is the structural signal; a shifted
    // per-level distribution at the same count is a levels change. One
    // underlying edit reports as one change, not both.
    if before.toc_entries.len() != after.toc_entries.len() {
        changes.push(change(
            ChangeKind::TocStructureChange,
            "toc_entries".to_string(),
            None,
            None,
            before.toc_entries.len().into(),
            after.toc_entries.len().into(),
        ));
    } else {
        let level_distribution = |entries: &[crate::schema::TocEntry]| {
            let mut dist: BTreeMap<String, usize> = BTreeMap::new();
            for e in entries {
                *dist.entry(e.level.to_string()).or_insert(0) += 1;
            }
            dist
        };
        let before_dist = level_distribution(&before.toc_entries);
        let after_dist = level_distribution(&after.toc_entries);
        if before_dist != after_dist {
            changes.push(change(
                ChangeKind::TocLevelsChange,
                "toc_levels".to_string(),
                None,
                None,
                serde_json::to_value(&before_dist).unwrap_or_default(),
                serde_json::to_value(&after_dist).unwrap_or_default(),
            ));
        }
    }

    // hyperlinks keyed by character range
    let before_links: HashMap<(usize, usize), &crate::schema::Hyperlink> = before
        .hyperlinks
        .iter()
        .map(|h| ((h.range_start, h.range_end), h))
        .collect();
    for link in &after.hyperlinks {
        let key = (link.range_start, link.range_end);
        if let Some(prev) = before_links.get(&key) {
            if prev.address != link.address {
                changes.push(change(
                    ChangeKind::HyperlinkAddressChange,
                    format!("link_{}_{}", key.0, key.1),
                    Some(key),
                    Some(link.text.clone()),
                    prev.address.clone().into(),
                    link.address.clone().into(),
                ));
            }
        }
    }

    changes
}

/// Could this task's declared locator have targeted the changed element?
/// Range overlap for range locators, name equality for bookmark/heading,
/// substring-either-way for find. Changes without an element range (style
/// usage, TOC) are global: the kind match alone decides.
fn locator_plausible(locator: &Locator, change: &FormatChange) -> bool {
    match locator {
        Locator::Range { start, end } => match change.element_range {
            Some((s, e)) => *start < e && s < *end,
            None => true,
        },
        Locator::Bookmark(name) | Locator::Heading(name) => match &change.element_text {
            Some(text) => text.trim() == name.trim(),
            None => true,
        },
        Locator::Find(needle) => match &change.element_text {
            Some(text) => {
                let text = text.to_lowercase();
                let needle = needle.to_lowercase();
                text.contains(&needle) || needle.contains(&text)
            }
            None => true,
        },
    }
}

fn find_authorizing_task<'a>(
    change: &FormatChange,
    executed: &'a [Task],
    annotations: &[Annotation],
) -> Option<&'a Task> {
    let candidates = change.kind.candidate_task_kinds();
    executed.iter().find(|task| {
        candidates.contains(&task.kind)
            && task
                .source_annotation_id
                .as_ref()
                .is_some_and(|id| annotations.iter().any(|a| &a.id == id))
            && locator_plausible(&task.locator, change)
    })
}

/// Gate L4 classifier: stamp every change with its authorization verdict.
/// `executed` must contain only tasks that actually ran and succeeded.
pub fn authorize_changes(
    mut changes: Vec<FormatChange>,
    executed: &[Task],
    annotations: &[Annotation],
) -> Vec<FormatChange> {
    for change in &mut changes {
        match find_authorizing_task(change, executed, annotations) {
            Some(task) => {
                change.authorized = true;
                change.authorizing_annotation_id = task.source_annotation_id.clone();
                tracing::debug!(
                    change = change.kind.as_str(),
                    task = %task.id,
                    "format change authorized"
                );
            }
            None => {
                change.authorized = false;
                tracing::warn!(
                    change = change.kind.as_str(),
                    element = %change.element_id,
                    "unauthorized format change"
                );
            }
        }
    }
    changes
}

fn build_report(changes: Vec<FormatChange>) -> ValidationReport {
    let (authorized, unauthorized): (Vec<_>, Vec<_>) =
        changes.into_iter().partition(|c| c.authorized);

    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();
    if !unauthorized.is_empty() {
        warnings.push(format!(
            "detected {} unauthorized format change(s)",
            unauthorized.len()
        ));
        let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
        for c in &unauthorized {
            *by_kind.entry(c.kind.as_str()).or_insert(0) += 1;
        }
        for (kind, count) in by_kind {
            warnings.push(format!("unauthorized {kind}: {count}"));
        }

        recommendations.push("roll the document back to its pre-run backup".to_string());
        recommendations
            .push("every format task needs an authorizing annotation".to_string());
        if unauthorized
            .iter()
            .any(|c| c.kind == ChangeKind::TocStructureChange)
        {
            recommendations
                .push("TOC rebuilds are high risk; annotate them explicitly".to_string());
        }
        if unauthorized
            .iter()
            .any(|c| c.kind == ChangeKind::HyperlinkAddressChange)
        {
            recommendations
                .push("hyperlink targets must be named in the annotation text".to_string());
        }
    }

    ValidationReport {
        is_valid: unauthorized.is_empty(),
        authorized,
        unauthorized,
        warnings,
        recommendations,
        validated_at: Utc::now(),
    }
}

/// Full Gate L4 pass over a run: diff the pre/post snapshots, classify, and
/// report.
pub fn validate_execution(
    before: &DocumentSnapshot,
    after: &DocumentSnapshot,
    executed: &[Task],
    annotations: &[Annotation],
) -> ValidationReport {
    let changes = diff_structures(&before.structure, &after.structure);
    tracing::info!(changes = changes.len(), "structure diff complete");
    let classified = authorize_changes(changes, executed, annotations);
    build_report(classified)
}

/// Diff + classify without the snapshot wrapper; the executor uses this for
/// its per-task audit.
pub fn validate_structures(
    before: &Structure,
    after: &Structure,
    executed: &[Task],
    annotations: &[Annotation],
) -> ValidationReport {
    let changes = diff_structures(before, after);
    let classified = authorize_changes(changes, executed, annotations);
    build_report(classified)
}

pub fn should_rollback(report: &ValidationReport) -> bool {
    !report.unauthorized.is_empty()
}
