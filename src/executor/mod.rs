//! Ordered task execution with the runtime half of the protection scheme:
//! Gate L3 re-checks authorization against the canonical annotation list,
//! format tasks get a pre/post structure diff, and an unauthorized change
//! restores the backup file before execution resumes.

pub mod extract;
pub mod locate;

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::cancel::CancelToken;
use crate::driver::{DocumentDriver, DocumentSession};
use crate::error::{redline_error, RedlineError, Result};
use crate::inspect;
use crate::schema::{Annotation, ExecutionResult, Structure, Task, TaskKind, TaskResult};
use crate::{snapshot, validate};

use locate::Located;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Normal,
    DryRun,
    /// Normal plus a mandatory pre-run backup and no fuzzy locator
    /// fallback: a miss fails the task instead of resolving to the
    /// sentinel.
    Safe,
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub mode: ExecutionMode,
    pub template_fallback: bool,
}

fn truncate(text: &str, cap: usize) -> String {
    let clean = text.replace('\n', " ");
    if clean.chars().count() <= cap {
        clean
    } else {
        let mut out: String = clean.chars().take(cap).collect();
        out.push_str("...");
        out
    }
}

struct TaskRunner<'a> {
    driver: &'a dyn DocumentDriver,
    document_path: &'a Path,
    session: Box<dyn DocumentSession>,
    annotations: &'a [Annotation],
    backup_path: Option<&'a Path>,
    options: &'a ExecutorOptions,
}

/// Execute the plan's tasks in order against a fresh session. One task's
/// failure never aborts the remainder; only session-level faults (open,
/// save, or a failed rollback restore) escape as errors.
pub fn execute_plan(
    driver: &dyn DocumentDriver,
    document_path: &Path,
    tasks: &[Task],
    annotations: &[Annotation],
    backup_path: Option<&Path>,
    options: &ExecutorOptions,
    cancel: &CancelToken,
) -> Result<ExecutionResult> {
    let started = Instant::now();
    let session = driver
        .open(document_path)
        .map_err(|e| RedlineError::Document {
            path: document_path.to_path_buf(),
            message: format!("cannot open for execution: {e}"),
            location: snafu::Location::default(),
        })?;

    let mut runner = TaskRunner {
        driver,
        document_path,
        session,
        annotations,
        backup_path,
        options,
    };

    let mut task_results: Vec<TaskResult> = Vec::with_capacity(tasks.len());
    let mut cancelled = false;

    for (i, task) in tasks.iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            for pending in &tasks[i..] {
                task_results.push(TaskResult {
                    task_id: pending.id.clone(),
                    success: false,
                    message: "cancelled before start".to_string(),
                    duration_secs: 0.0,
                    error_details: Some("RUN_001".to_string()),
                });
            }
            break;
        }

        tracing::info!(task = %task.id, kind = %task.kind, "executing {}/{}", i + 1, tasks.len());
        let result = runner.execute_one(task)?;
        if !result.success {
            tracing::warn!(task = %task.id, "task failed: {}", result.message);
        }
        task_results.push(result);
    }

    if options.mode != ExecutionMode::DryRun {
        runner
            .session
            .save()
            .map_err(|e| RedlineError::Document {
                path: document_path.to_path_buf(),
                message: format!("cannot save after execution: {e}"),
                location: snafu::Location::default(),
            })?;
    }

    let completed = task_results.iter().filter(|r| r.success).count();
    let failed = task_results.len() - completed;
    Ok(ExecutionResult {
        success: failed == 0 && !cancelled,
        total_tasks: tasks.len(),
        completed_tasks: completed,
        failed_tasks: failed,
        task_results,
        duration_secs: started.elapsed().as_secs_f64(),
        cancelled,
        error_summary: if failed > 0 {
            Some(format!("{failed} task(s) failed"))
        } else {
            None
        },
    })
}

impl<'a> TaskRunner<'a> {
    /// Run one task through gates, location, mutation, and the per-task
    /// audit. Returns `Err` only for session-level faults.
    fn execute_one(&mut self, task: &Task) -> Result<TaskResult> {
        let started = Instant::now();

        // Gate L3: the model may have hallucinated annotation ids; re-check
        // against the canonical list before touching the document.
        if let Err(reason) = self.gate_l3(task) {
            return Ok(failed(task, started, &reason, "FMT_001"));
        }

        let pre_snapshot: Option<Structure> =
            if task.is_format() && self.options.mode != ExecutionMode::DryRun {
                Some(inspect::extract_structure(self.session.as_ref())?)
            } else {
                None
            };

        let allow_fuzzy = self.options.mode != ExecutionMode::Safe;
        let located = match locate::resolve(self.session.as_ref(), &task.locator, allow_fuzzy) {
            Ok(Some(located)) => located,
            Ok(None) => {
                return Ok(failed(
                    task,
                    started,
                    &format!("locator missed (safe mode): {}", task.locator.value_string()),
                    "TASK_001",
                ));
            }
            Err(e) => return Ok(failed(task, started, &e.to_string(), "DRV_001")),
        };

        if self.options.mode == ExecutionMode::DryRun {
            let mut message = format!(
                "[dry run] would {} at range {}-{}",
                task.kind, located.start, located.end
            );
            if let Some(warning) = &located.warning {
                message.push_str(&format!(" ({warning})"));
            }
            return Ok(TaskResult {
                task_id: task.id.clone(),
                success: true,
                message,
                duration_secs: started.elapsed().as_secs_f64(),
                error_details: None,
            });
        }

        let mut message = match self.mutate(task, &located) {
            Ok(message) => message,
            Err(MutationError::Task(reason)) => {
                return Ok(failed(task, started, &reason, "TASK_001"))
            }
            Err(MutationError::Driver(e)) => {
                return Ok(failed(task, started, &e.to_string(), "DRV_001"))
            }
        };
        if let Some(warning) = &located.warning {
            message.push_str(&format!(" [{warning}]"));
        }

        // per-task audit: diff the structure this one task produced and
        // revert the file if the change set is not covered by the task's own
        // annotation
        if let Some(before) = pre_snapshot {
            let after = inspect::extract_structure(self.session.as_ref())?;
            let report = validate::validate_structures(
                &before,
                &after,
                std::slice::from_ref(task),
                self.annotations,
            );
            if !report.is_valid {
                let detail = report
                    .unauthorized
                    .iter()
                    .map(|c| c.kind.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return match self.rollback_to_backup() {
                    Ok(true) => Ok(failed(
                        task,
                        started,
                        &format!("unauthorized change(s) reverted: {detail}"),
                        "FMT_001",
                    )),
                    Ok(false) => Ok(failed(
                        task,
                        started,
                        &format!("unauthorized change(s) with no backup to restore: {detail}"),
                        "FMT_001",
                    )),
                    Err(e) => Err(e),
                };
            }
            if report.total_changes() == 0 {
                tracing::warn!(task = %task.id, "format task had no structural effect");
                message.push_str(" (no structural effect)");
            }
        }

        Ok(TaskResult {
            task_id: task.id.clone(),
            success: true,
            message,
            duration_secs: started.elapsed().as_secs_f64(),
            error_details: None,
        })
    }

    fn gate_l3(&self, task: &Task) -> std::result::Result<(), String> {
        if !task.is_format() {
            return Ok(());
        }
        match &task.source_annotation_id {
            None => Err(format!(
                "format task '{}' blocked: no authorizing annotation",
                task.id
            )),
            Some(id) if !self.annotations.iter().any(|a| &a.id == id) => Err(format!(
                "format task '{}' blocked: annotation '{id}' does not exist",
                task.id
            )),
            Some(_) => Ok(()),
        }
    }

    fn mutate(
        &mut self,
        task: &Task,
        located: &Located,
    ) -> std::result::Result<String, MutationError> {
        let session = self.session.as_mut();
        let (start, end) = (located.start, located.end);

        match task.kind {
            TaskKind::Rewrite => {
                let old = session.text_range(start, end)?;
                let new = extract::payload_text(&task.instruction);
                if old == new {
                    return Ok(format!("rewrite was a no-op: '{}'", truncate(&old, 30)));
                }
                session.replace_range(start, end, &new)?;
                Ok(format!(
                    "rewrote '{}' -> '{}'",
                    truncate(&old, 30),
                    truncate(&new, 30)
                ))
            }
            TaskKind::Insert => {
                let text = extract::payload_text(&task.instruction);
                session.insert_after(end, &format!("\n{text}"))?;
                Ok(format!("inserted '{}'", truncate(&text, 50)))
            }
            TaskKind::Delete => {
                let old = session.text_range(start, end)?;
                session.delete_range(start, end)?;
                Ok(format!("deleted '{}'", truncate(&old, 50)))
            }
            TaskKind::SetParagraphStyle => {
                let style = extract::style_name(&task.instruction);
                let old = session.set_paragraph_style(start, &style)?;
                Ok(format!("style '{old}' -> '{style}'"))
            }
            TaskKind::SetHeadingLevel => {
                let level = extract::heading_level(&task.instruction);
                let style = format!("Heading {level}");
                let old = session.set_paragraph_style(start, &style)?;
                Ok(format!("heading level set: '{old}' -> '{style}'"))
            }
            TaskKind::ReplaceHyperlink => {
                let address = extract::hyperlink_address(&task.instruction);
                match session.set_hyperlink_address(start, end, &address)? {
                    Some(old) => Ok(format!("hyperlink '{old}' -> '{address}'")),
                    None => Ok(format!("created hyperlink '{address}'")),
                }
            }
            TaskKind::ApplyTemplate => {
                let name = extract::template_name(&task.instruction);
                if session.apply_template(&name)? {
                    return Ok(format!("applied template '{name}'"));
                }
                if self.options.template_fallback {
                    session.apply_template("default")?;
                    Ok(format!(
                        "template '{name}' not found; applied default style set"
                    ))
                } else {
                    Err(MutationError::Task(format!("template '{name}' not found")))
                }
            }
            TaskKind::RebuildToc => {
                let removed = session.delete_toc_fields()?;
                let (upper, lower) = extract::toc_levels(&task.instruction);
                session.add_toc_field(start, upper, lower)?;
                Ok(format!(
                    "rebuilt TOC (removed {removed}, levels {upper}-{lower})"
                ))
            }
            TaskKind::UpdateTocLevels => {
                let (upper, lower) = extract::toc_levels(&task.instruction);
                let updated = session.set_toc_levels(upper, lower)?;
                if updated == 0 {
                    Ok("no TOC fields to update".to_string())
                } else {
                    Ok(format!("{updated} TOC field(s) set to levels {upper}-{lower}"))
                }
            }
            TaskKind::RefreshTocNumbers => {
                let refreshed = session.refresh_toc_fields()?;
                if refreshed == 0 {
                    Ok("no TOC fields; nothing to refresh".to_string())
                } else {
                    Ok(format!("refreshed {refreshed} TOC field(s)"))
                }
            }
        }
    }

    /// Restore the backup over the document and reopen the session so the
    /// run continues from clean state. `Ok(false)` means there was no backup
    /// to restore; `Err` means the restore itself failed and the run must
    /// stop.
    fn rollback_to_backup(&mut self) -> Result<bool> {
        let Some(backup) = self.backup_path else {
            return Ok(false);
        };
        snapshot::restore(backup, self.document_path)?;
        self.session = self
            .driver
            .open(self.document_path)
            .context(redline_error::DriverSnafu)?;
        tracing::info!("document reverted to backup mid-run");
        Ok(true)
    }
}

fn failed(task: &Task, started: Instant, reason: &str, code: &str) -> TaskResult {
    TaskResult {
        task_id: task.id.clone(),
        success: false,
        message: reason.to_string(),
        duration_secs: started.elapsed().as_secs_f64(),
        error_details: Some(code.to_string()),
    }
}

enum MutationError {
    Task(String),
    Driver(crate::error::DriverError),
}

impl From<crate::error::DriverError> for MutationError {
    fn from(e: crate::error::DriverError) -> Self {
        MutationError::Driver(e)
    }
}
