//! On-disk run artifacts: the plan (including filtered tasks), the run log,
//! a human-readable structure diff, and the extracted annotations. All JSON
//! artifacts are UTF-8; every artifact of a run shares one timestamp.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::{RedlineError, Result};
use crate::planner::PlanningResult;
use crate::schema::{Annotation, ExecutionResult, Structure};
use crate::validate;

pub struct Exporter {
    output_dir: PathBuf,
    stamp: String,
}

impl Exporter {
    pub fn new(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir).map_err(|e| RedlineError::Io {
            source: e,
            location: snafu::Location::default(),
        })?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            stamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
        })
    }

    fn write_json(&self, filename: &str, value: &serde_json::Value) -> Result<PathBuf> {
        let path = self.output_dir.join(filename);
        let pretty = serde_json::to_string_pretty(value).map_err(|e| RedlineError::Json {
            source: e,
            location: snafu::Location::default(),
        })?;
        std::fs::write(&path, pretty).map_err(|e| RedlineError::Io {
            source: e,
            location: snafu::Location::default(),
        })?;
        Ok(path)
    }

    /// `plan_<ts>.json`: the accepted plan plus every filtered-out task
    /// with its reason.
    pub fn export_plan(&self, planning: &PlanningResult) -> Result<PathBuf> {
        let value = serde_json::json!({
            "plan": planning.plan,
            "raw_task_count": planning.raw_task_count,
            "accepted_count": planning.accepted_count,
            "filtered_tasks": planning.skipped,
            "warnings": planning.warnings,
            "risk_report": planning.risk_report,
            "llm_secs": planning.llm_secs,
            "planning_secs": planning.planning_secs,
        });
        self.write_json(&format!("plan_{}.json", self.stamp), &value)
    }

    /// `run_log_<ts>.json`: per-task results and timings.
    pub fn export_run_log(
        &self,
        execution: &ExecutionResult,
        warnings: &[String],
    ) -> Result<PathBuf> {
        let value = serde_json::json!({
            "execution": execution,
            "warnings": warnings,
        });
        self.write_json(&format!("run_log_{}.json", self.stamp), &value)
    }

    /// `comments_<ts>.json`: the extracted annotation list.
    pub fn export_annotations(&self, annotations: &[Annotation]) -> Result<PathBuf> {
        let value = serde_json::json!({
            "count": annotations.len(),
            "comments": annotations,
        });
        self.write_json(&format!("comments_{}.json", self.stamp), &value)
    }

    /// `diff_<ts>.md`: readable before/after structure comparison.
    pub fn export_diff(&self, before: &Structure, after: &Structure) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("diff_{}.md", self.stamp));
        let content = diff_markdown(before, after);
        std::fs::write(&path, content).map_err(|e| RedlineError::Io {
            source: e,
            location: snafu::Location::default(),
        })?;
        Ok(path)
    }
}

fn diff_markdown(before: &Structure, after: &Structure) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Document structure diff");
    let _ = writeln!(out);
    let _ = writeln!(out, "Generated: {}", Local::now().to_rfc3339());
    let _ = writeln!(out);
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "| element | before | after |");
    let _ = writeln!(out, "|---------|--------|-------|");
    let _ = writeln!(
        out,
        "| headings | {} | {} |",
        before.headings.len(),
        after.headings.len()
    );
    let in_use = |s: &Structure| s.styles.iter().filter(|st| st.in_use).count();
    let _ = writeln!(out, "| styles in use | {} | {} |", in_use(before), in_use(after));
    let _ = writeln!(
        out,
        "| TOC entries | {} | {} |",
        before.toc_entries.len(),
        after.toc_entries.len()
    );
    let _ = writeln!(
        out,
        "| hyperlinks | {} | {} |",
        before.hyperlinks.len(),
        after.hyperlinks.len()
    );
    let _ = writeln!(
        out,
        "| pages / words | {} / {} | {} / {} |",
        before.page_count, before.word_count, after.page_count, after.word_count
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "## Format changes");
    let _ = writeln!(out);

    let changes = validate::diff_structures(before, after);
    if changes.is_empty() {
        let _ = writeln!(out, "No format-affecting changes detected.");
    } else {
        for change in &changes {
            let _ = writeln!(
                out,
                "- **{}** `{}`: {} -> {}",
                change.kind.as_str(),
                change.element_id,
                change.old_value,
                change.new_value
            );
        }
    }
    out
}
