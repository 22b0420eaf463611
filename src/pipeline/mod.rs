//! Pipeline orchestrator: drives load -> inspect -> plan -> execute ->
//! validate -> export, emits staged progress, owns cancellation, and turns
//! every run into a terminal [`RunReport`], rolling the document back when
//! the audit or a stage failure demands it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::driver::DocumentDriver;
use crate::error::{redline_error, LlmError, RedlineError, Result};
use crate::executor::{self, ExecutionMode, ExecutorOptions};
use crate::export::Exporter;
use crate::inspect;
use crate::llm::{call_with_json_retry, LlmService, RetryPolicy};
use crate::planner::{self, PlanningResult};
use crate::prompt::{self, PromptContext};
use crate::schema::{
    Annotation, DocumentSnapshot, ExecutionResult, Plan, Task, ValidationReport,
};
use crate::{snapshot, validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Inspect,
    Plan,
    Execute,
    Validate,
    Export,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Inspect => "inspect",
            Stage::Plan => "plan",
            Stage::Execute => "execute",
            Stage::Validate => "validate",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event. Within one stage, `fraction` is non-decreasing.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub stage: Stage,
    pub fraction: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync>;

/// Terminal record of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub success: bool,
    pub document_path: PathBuf,
    pub stages_completed: Vec<Stage>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    pub rollback_performed: bool,
    /// Set when a restore attempt itself failed: the document on disk may
    /// not match any known-good state.
    pub data_at_risk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    pub artifacts: BTreeMap<String, PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub total_secs: f64,
}

#[derive(Default)]
struct RunState {
    stages_completed: Vec<Stage>,
    backup_path: Option<PathBuf>,
    annotations: Vec<Annotation>,
    pre_snapshot: Option<DocumentSnapshot>,
    post_structure: Option<crate::schema::Structure>,
    planning: Option<PlanningResult>,
    execution: Option<ExecutionResult>,
    validation: Option<ValidationReport>,
    rollback_performed: bool,
    data_at_risk: bool,
    cancelled: bool,
    artifacts: BTreeMap<String, PathBuf>,
}

pub struct DocumentPipeline {
    settings: Settings,
    driver: Box<dyn DocumentDriver>,
    llm: Box<dyn LlmService>,
    mode: ExecutionMode,
    callbacks: Vec<ProgressCallback>,
    cancel: CancelToken,
}

impl DocumentPipeline {
    pub fn new(
        settings: Settings,
        driver: Box<dyn DocumentDriver>,
        llm: Box<dyn LlmService>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            settings,
            driver,
            llm,
            mode,
            callbacks: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Token that cancels this run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn add_progress_callback(&mut self, callback: ProgressCallback) {
        self.callbacks.push(callback);
    }

    fn emit(&self, stage: Stage, fraction: f64, message: &str) {
        let progress = Progress {
            stage,
            fraction,
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        tracing::info!("[{stage}] {:.0}% - {message}", fraction * 100.0);
        for callback in &self.callbacks {
            callback(&progress);
        }
    }

    /// Run the full pipeline. `Err` is reserved for pre-flight problems
    /// (configuration); everything after that lands in the RunReport, which
    /// carries `success = false` for failed runs.
    pub fn process(&self, document_path: &Path) -> Result<RunReport> {
        self.preflight(document_path)?;

        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.settings.run_timeout_secs);
        let mut state = RunState::default();

        let outcome = self.run_stages(document_path, deadline, &mut state);

        let (success, error_code, error_message) = match outcome {
            Ok(()) => {
                let valid = state.validation.as_ref().is_none_or(|v| v.is_valid);
                (
                    valid && !state.rollback_performed && !state.cancelled,
                    None,
                    None,
                )
            }
            Err(e) => {
                if matches!(e, RedlineError::Cancelled { .. }) {
                    state.cancelled = true;
                }
                self.rollback_after_failure(document_path, &mut state);
                tracing::error!("pipeline failed: {e}");
                (false, Some(e.code().to_string()), Some(e.to_string()))
            }
        };

        Ok(RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            success,
            document_path: document_path.to_path_buf(),
            stages_completed: state.stages_completed,
            cancelled: state.cancelled,
            plan: state.planning.map(|p| p.plan),
            execution: state.execution,
            validation: state.validation,
            rollback_performed: state.rollback_performed,
            data_at_risk: state.data_at_risk,
            backup_path: state.backup_path,
            artifacts: state.artifacts,
            error_code,
            error_message,
            total_secs: started.elapsed().as_secs_f64(),
        })
    }

    fn preflight(&self, document_path: &Path) -> Result<()> {
        if !self.driver.is_available() {
            return redline_error::ConfigurationSnafu {
                message: format!("document driver '{}' is not available", self.driver.name()),
            }
            .fail();
        }
        let ext = document_path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !self.driver.supports_extension(&ext) {
            return redline_error::ConfigurationSnafu {
                message: format!("unsupported input file type: '.{ext}'"),
            }
            .fail();
        }
        Ok(())
    }

    fn checkpoint(&self, deadline: Instant) -> Result<()> {
        if self.cancel.is_cancelled() {
            return redline_error::CancelledSnafu.fail();
        }
        if Instant::now() >= deadline {
            tracing::error!("run timeout exceeded");
            return redline_error::CancelledSnafu.fail();
        }
        Ok(())
    }

    fn run_stages(
        &self,
        document_path: &Path,
        deadline: Instant,
        state: &mut RunState,
    ) -> Result<()> {
        // -- load --
        self.checkpoint(deadline)?;
        self.emit(Stage::Load, 0.0, "loading document");
        let checksum = snapshot::checksum(document_path)?;
        let wants_backup = self.mode != ExecutionMode::DryRun
            && (self.settings.create_backup || self.mode == ExecutionMode::Safe);
        if wants_backup {
            state.backup_path = Some(snapshot::backup(document_path)?);
            if let Some(dir) = document_path.parent() {
                snapshot::cleanup_old_backups(dir, self.settings.retention_days);
            }
        }
        state.stages_completed.push(Stage::Load);
        self.emit(Stage::Load, 1.0, "document loaded");

        // -- inspect --
        self.checkpoint(deadline)?;
        self.emit(Stage::Inspect, 0.0, "extracting structure and annotations");
        let (annotations, structure) = {
            let session = self
                .driver
                .open(document_path)
                .map_err(|e| RedlineError::Document {
                    path: document_path.to_path_buf(),
                    message: e.to_string(),
                    location: snafu::Location::default(),
                })?;
            (
                inspect::extract_annotations(session.as_ref())?,
                inspect::extract_structure(session.as_ref())?,
            )
        };
        state.annotations = annotations.clone();
        let pre = DocumentSnapshot {
            timestamp: Utc::now(),
            document_path: document_path.to_path_buf(),
            structure: structure.clone(),
            annotations: annotations.clone(),
            checksum,
        };
        state.pre_snapshot = Some(pre.clone());
        state.stages_completed.push(Stage::Inspect);
        self.emit(
            Stage::Inspect,
            1.0,
            &format!("{} annotation(s) extracted", annotations.len()),
        );

        // -- plan --
        self.checkpoint(deadline)?;
        self.emit(Stage::Plan, 0.0, "synthesizing tasks");
        let planning = self.plan_stage(document_path, &structure, &annotations, deadline)?;
        let plan = planning.plan.clone();
        state.planning = Some(planning);
        state.stages_completed.push(Stage::Plan);
        self.emit(
            Stage::Plan,
            1.0,
            &format!("{} task(s) planned", plan.tasks.len()),
        );

        // -- execute --
        self.checkpoint(deadline)?;
        self.emit(Stage::Execute, 0.0, "executing tasks");
        let execution = if plan.is_empty() {
            tracing::info!("empty plan; nothing to execute");
            ExecutionResult::empty()
        } else {
            let options = ExecutorOptions {
                mode: self.mode,
                template_fallback: self.settings.template_fallback,
            };
            executor::execute_plan(
                self.driver.as_ref(),
                document_path,
                &plan.tasks,
                &annotations,
                state.backup_path.as_deref(),
                &options,
                &self.cancel,
            )?
        };
        let executed_ok: Vec<Task> = plan
            .tasks
            .iter()
            .filter(|t| {
                execution
                    .task_results
                    .iter()
                    .any(|r| r.task_id == t.id && r.success)
            })
            .cloned()
            .collect();
        let run_cancelled = execution.cancelled;
        state.execution = Some(execution);
        state.stages_completed.push(Stage::Execute);
        self.emit(Stage::Execute, 1.0, "execution finished");

        if run_cancelled {
            // a cancelled run rolls back only if a format task already
            // landed; rollback_after_failure checks that
            return redline_error::CancelledSnafu.fail();
        }

        // -- validate --
        self.checkpoint(deadline)?;
        self.emit(Stage::Validate, 0.0, "auditing format changes");
        let post_structure = {
            let session = self
                .driver
                .open(document_path)
                .map_err(|e| RedlineError::Document {
                    path: document_path.to_path_buf(),
                    message: e.to_string(),
                    location: snafu::Location::default(),
                })?;
            inspect::extract_structure(session.as_ref())?
        };
        let post = DocumentSnapshot {
            timestamp: Utc::now(),
            document_path: document_path.to_path_buf(),
            structure: post_structure.clone(),
            annotations: annotations.clone(),
            checksum: snapshot::checksum(document_path)?,
        };
        state.post_structure = Some(post_structure);
        let report = validate::validate_execution(&pre, &post, &executed_ok, &annotations);
        let must_rollback = validate::should_rollback(&report);
        state.validation = Some(report);
        state.stages_completed.push(Stage::Validate);
        self.emit(Stage::Validate, 1.0, "audit complete");

        if must_rollback && self.mode != ExecutionMode::DryRun {
            if self.settings.auto_rollback {
                match state.backup_path.as_deref() {
                    Some(backup) => {
                        if let Err(e) = snapshot::restore(backup, document_path) {
                            state.data_at_risk = true;
                            return Err(e);
                        }
                        state.rollback_performed = true;
                        tracing::warn!("unauthorized changes detected; document rolled back");
                    }
                    None => {
                        tracing::error!("unauthorized changes detected but no backup exists");
                    }
                }
            } else {
                tracing::warn!("unauthorized changes detected; auto-rollback is disabled");
            }
        }

        // -- export --
        self.checkpoint(deadline)?;
        self.emit(Stage::Export, 0.0, "writing artifacts");
        self.export_stage(state)?;
        state.stages_completed.push(Stage::Export);
        self.emit(Stage::Export, 1.0, "artifacts written");

        Ok(())
    }

    /// Build the plan, chunking the context when the token estimate exceeds
    /// the budget. An empty annotation list short-circuits without calling
    /// the model.
    fn plan_stage(
        &self,
        document_path: &Path,
        structure: &crate::schema::Structure,
        annotations: &[Annotation],
        deadline: Instant,
    ) -> Result<PlanningResult> {
        if annotations.is_empty() {
            tracing::info!("no annotations; producing an empty plan");
            let empty = serde_json::json!({"tasks": []});
            return planner::build_plan(&[empty], annotations, Some(document_path), 0.0);
        }

        let context = PromptContext {
            structure: structure.clone(),
            annotations: annotations.to_vec(),
        };
        let check = prompt::check_context_length(&context, self.settings.token_budget);
        let chunks = if check.within_budget {
            vec![context]
        } else {
            tracing::warn!(
                estimated = check.estimated_tokens,
                budget = check.budget,
                "context over budget; chunking"
            );
            prompt::split_into_chunks(&context)
        };

        let policy = RetryPolicy::new(
            self.settings.max_json_retries,
            self.settings.backoff_cap_secs,
            self.settings.total_timeout_secs,
        );

        let mut responses = Vec::with_capacity(chunks.len());
        let mut salvage_count = 0u32;
        let llm_started = Instant::now();
        for (i, chunk) in chunks.iter().enumerate() {
            self.checkpoint(deadline)?;
            tracing::info!("requesting plan for chunk {}/{}", i + 1, chunks.len());
            let pair = prompt::build_prompt(chunk);
            let outcome = call_with_json_retry(self.llm.as_ref(), &pair, &policy, &self.cancel)
                .map_err(|e| match e {
                    LlmError::Cancelled { .. } => redline_error::CancelledSnafu.build(),
                    // exhausted retries, transport or parse, surface as a
                    // planning failure at this level
                    LlmError::Format {
                        attempts, message, ..
                    } => redline_error::PlanValidationSnafu {
                        message: format!(
                            "model produced no parseable JSON in {attempts} attempt(s): {message}"
                        ),
                    }
                    .build(),
                    LlmError::Transport { message, .. } => redline_error::PlanValidationSnafu {
                        message: format!("LLM unreachable: {message}"),
                    }
                    .build(),
                    other => RedlineError::Llm {
                        source: other,
                        location: snafu::Location::default(),
                    },
                })?;
            if outcome.salvage_applied {
                salvage_count += 1;
            }
            responses.push(outcome.value);
        }
        let llm_secs = llm_started.elapsed().as_secs_f64();

        let mut planning =
            planner::build_plan(&responses, annotations, Some(document_path), llm_secs)?;
        for _ in 0..salvage_count {
            planning
                .warnings
                .push("response parsed only after JSON salvage fixups".to_string());
        }
        Ok(planning)
    }

    fn export_stage(&self, state: &mut RunState) -> Result<()> {
        let exporter = Exporter::new(&self.settings.output_dir)?;

        if let Some(planning) = &state.planning {
            let path = exporter.export_plan(planning)?;
            state.artifacts.insert("plan".to_string(), path);
        }
        if let Some(execution) = &state.execution {
            let warnings = state
                .planning
                .as_ref()
                .map(|p| p.warnings.clone())
                .unwrap_or_default();
            let path = exporter.export_run_log(execution, &warnings)?;
            state.artifacts.insert("run_log".to_string(), path);
        }
        let path = exporter.export_annotations(&state.annotations)?;
        state.artifacts.insert("comments".to_string(), path);

        if let (Some(pre), Some(post)) = (&state.pre_snapshot, &state.post_structure) {
            let path = exporter.export_diff(&pre.structure, post)?;
            state.artifacts.insert("diff".to_string(), path);
        }
        Ok(())
    }

    /// Best-effort restore after a stage error or cancellation. A plain
    /// stage error always restores (the document state is suspect); a
    /// cancellation restores only when a format task already applied.
    fn rollback_after_failure(&self, document_path: &Path, state: &mut RunState) {
        if state.rollback_performed
            || !self.settings.auto_rollback
            || self.mode == ExecutionMode::DryRun
        {
            return;
        }
        let Some(backup) = state.backup_path.clone() else {
            return;
        };

        if state.cancelled {
            let format_applied = state.execution.as_ref().is_some_and(|exec| {
                state.planning.as_ref().is_some_and(|planning| {
                    exec.task_results.iter().any(|r| {
                        r.success
                            && planning
                                .plan
                                .tasks
                                .iter()
                                .any(|t| t.id == r.task_id && t.is_format())
                    })
                })
            });
            if !format_applied {
                return;
            }
        }

        match snapshot::restore(&backup, document_path) {
            Ok(()) => {
                state.rollback_performed = true;
                tracing::warn!("document restored from backup after failed run");
            }
            Err(e) => {
                state.data_at_risk = true;
                tracing::error!("restore after failure also failed: {e}");
            }
        }
    }
}
