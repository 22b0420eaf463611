use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use redline::cancel::CancelToken;
use redline::config::Settings;
use redline::driver::{
    AnnotationInfo, DocumentDriver, DocumentSession, HyperlinkInfo, JsonDriver, ParagraphInfo,
    StyleInfo, TocFieldInfo,
};
use redline::error::{DriverError, LlmError};
use redline::executor::ExecutionMode;
use redline::llm::LlmService;
use redline::pipeline::DocumentPipeline;
use redline::prompt::PromptPair;
use redline::snapshot;

// -- scripted LLM --

struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmService for ScriptedLlm {
    fn complete(&self, _: &PromptPair, _: &CancelToken) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Transport {
                message: "scripted service exhausted".to_string(),
                location: snafu::Location::default(),
            })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

// -- fixtures --

fn write_doc(dir: &Path, value: serde_json::Value) -> PathBuf {
    let path = dir.join("doc.json");
    std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    // normalize through the driver so save cycles are byte-stable
    let mut session = JsonDriver::new().open(&path).unwrap();
    session.save().unwrap();
    path
}

fn doc_with_annotation(body: &str) -> serde_json::Value {
    serde_json::json!({
        "paragraphs": [
            {"text": "Introduction", "style": "Heading 1"},
            {"text": "Some body text with foo inside.", "style": "Normal"},
            {"text": "Details", "style": "Heading 2"},
        ],
        "annotations": [
            {"author": "Reviewer", "body": body,
             "anchor_start": 0, "anchor_end": 12, "page": 1},
        ],
    })
}

fn settings(dir: &Path) -> Settings {
    Settings {
        output_dir: dir.join("out"),
        backoff_cap_secs: 0,
        ..Settings::default()
    }
}

fn pipeline(dir: &Path, llm: ScriptedLlm, mode: ExecutionMode) -> DocumentPipeline {
    DocumentPipeline::new(
        settings(dir),
        Box::new(JsonDriver::new()),
        Box::new(llm),
        mode,
    )
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// -- scenarios --

#[test]
fn pure_content_edit_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        doc_with_annotation("rewrite the paragraph containing 'foo' to 'bar'"),
    );

    let llm = ScriptedLlm::new(vec![
        r#"{"tasks": [{
            "id": "t1",
            "type": "rewrite",
            "locator": {"by": "find", "value": "foo"},
            "instruction": "rewrite the paragraph containing 'foo' to 'bar'",
            "source_comment_id": "comment_1"
        }]}"#,
    ]);
    let report = pipeline(dir.path(), llm, ExecutionMode::Normal)
        .process(&path)
        .unwrap();

    assert!(report.success, "{:?}", report.error_message);
    let execution = report.execution.as_ref().unwrap();
    assert_eq!(execution.completed_tasks, 1);
    assert_eq!(execution.total_tasks, 1);

    // content tasks produce no tracked format changes
    let validation = report.validation.as_ref().unwrap();
    assert!(validation.is_valid);
    assert_eq!(validation.total_changes(), 0);
    assert!(!report.rollback_performed);

    // mutation landed
    let session = JsonDriver::new().open(&path).unwrap();
    let len = session.text_len().unwrap();
    assert!(session.text_range(0, len).unwrap().contains("bar"));

    // all four artifacts exist
    for name in ["plan", "run_log", "comments", "diff"] {
        let artifact = report.artifacts.get(name).unwrap();
        assert!(artifact.exists(), "missing artifact {name}");
    }
}

#[test]
fn authorized_format_edit_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), doc_with_annotation("make this heading level 2"));

    let llm = ScriptedLlm::new(vec![
        r#"{"tasks": [{
            "id": "t1",
            "type": "set_heading_level",
            "locator": {"by": "heading", "value": "Introduction"},
            "instruction": "make this heading level 2",
            "source_comment_id": "comment_1"
        }]}"#,
    ]);
    let report = pipeline(dir.path(), llm, ExecutionMode::Normal)
        .process(&path)
        .unwrap();

    assert!(report.success, "{:?}", report.error_message);
    let validation = report.validation.as_ref().unwrap();
    assert!(validation.is_valid);
    assert!(validation
        .authorized
        .iter()
        .any(|c| c.kind.as_str() == "heading_level_change"));
    assert!(validation
        .authorized
        .iter()
        .all(|c| c.authorizing_annotation_id.as_deref() == Some("comment_1")));

    let session = JsonDriver::new().open(&path).unwrap();
    assert_eq!(session.paragraphs().unwrap()[0].style, "Heading 2");
}

#[test]
fn hallucinated_format_task_is_dropped_at_planning() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), doc_with_annotation("rewrite 'foo' to 'bar'"));

    let llm = ScriptedLlm::new(vec![
        r#"{"tasks": [
            {
                "id": "t1",
                "type": "rewrite",
                "locator": {"by": "find", "value": "foo"},
                "instruction": "rewrite 'foo' to 'bar'",
                "source_comment_id": "comment_1"
            },
            {
                "id": "t2",
                "type": "apply_template",
                "locator": {"by": "find", "value": "Introduction"},
                "instruction": "apply the corporate template"
            }
        ]}"#,
    ]);
    let report = pipeline(dir.path(), llm, ExecutionMode::Normal)
        .process(&path)
        .unwrap();

    assert!(report.success, "{:?}", report.error_message);
    assert_eq!(report.plan.as_ref().unwrap().tasks.len(), 1);
    assert!(!report.rollback_performed);

    let plan_artifact = read_json(report.artifacts.get("plan").unwrap());
    let filtered = plan_artifact["filtered_tasks"].as_array().unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["task_id"], "t2");
    assert!(filtered[0]["reason"]
        .as_str()
        .unwrap()
        .contains("source_comment_id"));
    assert_eq!(plan_artifact["raw_task_count"], 2);
}

// driver wrapper that flips a style's in-use flag on sessions opened after
// execution, simulating post-hoc drift from a driver quirk
struct QuirkDriver {
    inner: JsonDriver,
    opens: AtomicUsize,
}

struct QuirkSession {
    inner: Box<dyn DocumentSession>,
    drifted: bool,
}

impl DocumentDriver for QuirkDriver {
    fn name(&self) -> &str {
        "quirk"
    }
    fn is_available(&self) -> bool {
        true
    }
    fn supports_extension(&self, ext: &str) -> bool {
        self.inner.supports_extension(ext)
    }
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentSession>, DriverError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(QuirkSession {
            inner: self.inner.open(path)?,
            drifted: n >= 3,
        }))
    }
}

impl DocumentSession for QuirkSession {
    fn path(&self) -> &Path {
        self.inner.path()
    }
    fn paragraphs(&self) -> Result<Vec<ParagraphInfo>, DriverError> {
        self.inner.paragraphs()
    }
    fn annotations(&self) -> Result<Vec<AnnotationInfo>, DriverError> {
        self.inner.annotations()
    }
    fn styles(&self) -> Result<Vec<StyleInfo>, DriverError> {
        let mut styles = self.inner.styles()?;
        if self.drifted {
            for style in &mut styles {
                if style.name == "Emphasis" {
                    style.in_use = true;
                }
            }
        }
        Ok(styles)
    }
    fn toc_fields(&self) -> Result<Vec<TocFieldInfo>, DriverError> {
        self.inner.toc_fields()
    }
    fn hyperlinks(&self) -> Result<Vec<HyperlinkInfo>, DriverError> {
        self.inner.hyperlinks()
    }
    fn page_count(&self) -> Result<u32, DriverError> {
        self.inner.page_count()
    }
    fn word_count(&self) -> Result<u32, DriverError> {
        self.inner.word_count()
    }
    fn text_len(&self) -> Result<usize, DriverError> {
        self.inner.text_len()
    }
    fn text_range(&self, start: usize, end: usize) -> Result<String, DriverError> {
        self.inner.text_range(start, end)
    }
    fn bookmark_range(&self, name: &str) -> Result<Option<(usize, usize)>, DriverError> {
        self.inner.bookmark_range(name)
    }
    fn replace_range(&mut self, start: usize, end: usize, text: &str) -> Result<(), DriverError> {
        self.inner.replace_range(start, end, text)
    }
    fn insert_after(&mut self, pos: usize, text: &str) -> Result<(), DriverError> {
        self.inner.insert_after(pos, text)
    }
    fn delete_range(&mut self, start: usize, end: usize) -> Result<(), DriverError> {
        self.inner.delete_range(start, end)
    }
    fn set_paragraph_style(&mut self, pos: usize, style: &str) -> Result<String, DriverError> {
        self.inner.set_paragraph_style(pos, style)
    }
    fn set_hyperlink_address(
        &mut self,
        start: usize,
        end: usize,
        address: &str,
    ) -> Result<Option<String>, DriverError> {
        self.inner.set_hyperlink_address(start, end, address)
    }
    fn delete_toc_fields(&mut self) -> Result<usize, DriverError> {
        self.inner.delete_toc_fields()
    }
    fn add_toc_field(&mut self, pos: usize, upper: u8, lower: u8) -> Result<(), DriverError> {
        self.inner.add_toc_field(pos, upper, lower)
    }
    fn set_toc_levels(&mut self, upper: u8, lower: u8) -> Result<usize, DriverError> {
        self.inner.set_toc_levels(upper, lower)
    }
    fn refresh_toc_fields(&mut self) -> Result<usize, DriverError> {
        self.inner.refresh_toc_fields()
    }
    fn apply_template(&mut self, name: &str) -> Result<bool, DriverError> {
        self.inner.apply_template(name)
    }
    fn save(&mut self) -> Result<(), DriverError> {
        self.inner.save()
    }
    fn save_as(&mut self, path: &Path) -> Result<(), DriverError> {
        self.inner.save_as(path)
    }
}

#[test]
fn post_hoc_drift_triggers_atomic_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = doc_with_annotation("rewrite the paragraph containing 'foo' to 'bar'");
    doc["styles"] = serde_json::json!([
        {"name": "Emphasis", "kind": 2, "built_in": false, "in_use": false}
    ]);
    let path = write_doc(dir.path(), doc);

    let llm = ScriptedLlm::new(vec![
        r#"{"tasks": [{
            "id": "t1",
            "type": "rewrite",
            "locator": {"by": "find", "value": "foo"},
            "instruction": "rewrite the paragraph containing 'foo' to 'bar'",
            "source_comment_id": "comment_1"
        }]}"#,
    ]);
    let quirk = QuirkDriver {
        inner: JsonDriver::new(),
        opens: AtomicUsize::new(0),
    };
    let pipeline = DocumentPipeline::new(
        settings(dir.path()),
        Box::new(quirk),
        Box::new(llm),
        ExecutionMode::Normal,
    );
    let report = pipeline.process(&path).unwrap();

    assert!(!report.success);
    let validation = report.validation.as_ref().unwrap();
    assert!(!validation.is_valid);
    assert!(validation
        .unauthorized
        .iter()
        .any(|c| c.kind.as_str() == "style_usage_change"));
    assert!(report.rollback_performed);
    assert!(!report.data_at_risk);

    // rollback atomicity: the document matches its backup byte for byte
    let backup = report.backup_path.as_ref().unwrap();
    assert_eq!(
        snapshot::checksum(&path).unwrap(),
        snapshot::checksum(backup).unwrap()
    );
}

#[test]
fn dependency_ordering_runs_prerequisite_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = doc_with_annotation("make this heading level 2 and rebuild the TOC");
    doc["toc_fields"] = serde_json::json!([
        {"position": 0, "upper_level": 1, "lower_level": 3, "entries": []}
    ]);
    let path = write_doc(dir.path(), doc);

    let llm = ScriptedLlm::new(vec![
        r#"{"tasks": [
            {
                "id": "T1",
                "type": "rebuild_toc",
                "locator": {"by": "heading", "value": "Introduction"},
                "instruction": "rebuild the TOC with levels 1 to 3",
                "source_comment_id": "comment_1",
                "dependencies": ["T2"]
            },
            {
                "id": "T2",
                "type": "set_heading_level",
                "locator": {"by": "heading", "value": "Introduction"},
                "instruction": "make this heading level 2",
                "source_comment_id": "comment_1"
            }
        ]}"#,
    ]);
    let report = pipeline(dir.path(), llm, ExecutionMode::Normal)
        .process(&path)
        .unwrap();

    assert!(report.success, "{:?}", report.error_message);
    let execution = report.execution.as_ref().unwrap();
    assert_eq!(execution.completed_tasks, 2);
    assert_eq!(execution.task_results[0].task_id, "T2");
    assert_eq!(execution.task_results[1].task_id, "T1");

    let validation = report.validation.as_ref().unwrap();
    assert!(validation.is_valid, "{:?}", validation.unauthorized);
    assert!(!validation.authorized.is_empty());
}

#[test]
fn smart_quote_response_is_salvaged_without_a_second_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        doc_with_annotation("rewrite the paragraph containing 'foo' to 'bar'"),
    );

    // curly quotes around a string value make this invalid JSON as-is
    let body = "{\"tasks\": [{
        \"id\": \"t1\",
        \"type\": \"rewrite\",
        \"locator\": {\"by\": \"find\", \"value\": \"foo\"},
        \"instruction\": \"rewrite the paragraph containing 'foo' to 'bar'\",
        \"source_comment_id\": \"comment_1\",
        \"notes\": \u{201C}salvage me\u{201D}
    }]}";
    let llm = ScriptedLlm::new(vec![body]);

    let report = {
        let pipeline = DocumentPipeline::new(
            settings(dir.path()),
            Box::new(JsonDriver::new()),
            Box::new(llm),
            ExecutionMode::Normal,
        );
        pipeline.process(&path).unwrap()
    };

    assert!(report.success, "{:?}", report.error_message);
    assert_eq!(report.plan.as_ref().unwrap().tasks.len(), 1);

    let run_log = read_json(report.artifacts.get("run_log").unwrap());
    let warnings = run_log["warnings"].as_array().unwrap();
    assert!(warnings
        .iter()
        .any(|w| w.as_str().unwrap().contains("salvage")));
}

#[test]
fn empty_annotation_list_short_circuits_planning() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        serde_json::json!({
            "paragraphs": [
                {"text": "Introduction", "style": "Heading 1"},
                {"text": "Nothing to review here.", "style": "Normal"},
            ],
        }),
    );
    let before = snapshot::checksum(&path).unwrap();

    // an exhausted scripted service errors if it is ever called
    let llm = ScriptedLlm::new(vec![]);
    let report = pipeline(dir.path(), llm, ExecutionMode::Normal)
        .process(&path)
        .unwrap();

    assert!(report.success, "{:?}", report.error_message);
    assert!(report.plan.as_ref().unwrap().tasks.is_empty());
    assert!(!report.rollback_performed);
    assert_eq!(snapshot::checksum(&path).unwrap(), before);
}

#[test]
fn persistent_malformed_json_becomes_plan_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), doc_with_annotation("rewrite 'foo' to 'bar'"));
    let before = snapshot::checksum(&path).unwrap();

    let llm = ScriptedLlm::new(vec!["not json", "still not json", "nope"]);
    let report = pipeline(dir.path(), llm, ExecutionMode::Normal)
        .process(&path)
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.error_code.as_deref(), Some("PLAN_001"));
    // no tasks were ever executed
    assert!(report.execution.is_none());
    assert_eq!(snapshot::checksum(&path).unwrap(), before);
}

#[test]
fn dry_run_never_mutates_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        doc_with_annotation("rewrite the paragraph containing 'foo' to 'bar'"),
    );
    let before = snapshot::checksum(&path).unwrap();

    let llm = ScriptedLlm::new(vec![
        r#"{"tasks": [{
            "id": "t1",
            "type": "rewrite",
            "locator": {"by": "find", "value": "foo"},
            "instruction": "rewrite the paragraph containing 'foo' to 'bar'",
            "source_comment_id": "comment_1"
        }]}"#,
    ]);
    let report = pipeline(dir.path(), llm, ExecutionMode::DryRun)
        .process(&path)
        .unwrap();

    assert!(report.success, "{:?}", report.error_message);
    assert!(report.backup_path.is_none());
    let execution = report.execution.as_ref().unwrap();
    assert_eq!(execution.completed_tasks, 1);
    assert!(execution.task_results[0].message.contains("[dry run]"));
    assert_eq!(snapshot::checksum(&path).unwrap(), before);
}

#[test]
fn unsupported_extension_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.docx");
    std::fs::write(&path, b"whatever").unwrap();

    let llm = ScriptedLlm::new(vec![]);
    let err = pipeline(dir.path(), llm, ExecutionMode::Normal)
        .process(&path)
        .unwrap_err();
    assert_eq!(err.code(), "CFG_001");
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn pre_cancelled_run_reports_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), doc_with_annotation("rewrite 'foo' to 'bar'"));

    let llm = ScriptedLlm::new(vec![]);
    let pipeline = pipeline(dir.path(), llm, ExecutionMode::Normal);
    pipeline.cancel_token().cancel();

    let report = pipeline.process(&path).unwrap();
    assert!(!report.success);
    assert!(report.cancelled);
    assert_eq!(report.error_code.as_deref(), Some("RUN_001"));
}

#[test]
fn oversized_context_is_chunked_by_top_level_heading() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(
        dir.path(),
        serde_json::json!({
            "paragraphs": [
                {"text": "Chapter One", "style": "Heading 1"},
                {"text": "The alpha section text.", "style": "Normal"},
                {"text": "Chapter Two", "style": "Heading 1"},
                {"text": "The beta section text.", "style": "Normal"},
            ],
            "annotations": [
                {"author": "Reviewer", "body": "rewrite 'alpha' to 'gamma'",
                 "anchor_start": 16, "anchor_end": 21, "page": 1},
                {"author": "Reviewer", "body": "rewrite 'beta' to 'delta'",
                 "anchor_start": 52, "anchor_end": 56, "page": 1},
            ],
        }),
    );

    struct Shared(std::sync::Arc<ScriptedLlm>);
    impl LlmService for Shared {
        fn complete(&self, p: &PromptPair, c: &CancelToken) -> Result<String, LlmError> {
            self.0.complete(p, c)
        }
        fn model(&self) -> &str {
            self.0.model()
        }
    }

    let llm = std::sync::Arc::new(ScriptedLlm::new(vec![
        r#"{"tasks": [{
            "id": "t1",
            "type": "rewrite",
            "locator": {"by": "find", "value": "alpha"},
            "instruction": "rewrite 'alpha' to 'gamma'",
            "source_comment_id": "comment_1"
        }]}"#,
        r#"{"tasks": [{
            "id": "t1",
            "type": "rewrite",
            "locator": {"by": "find", "value": "beta"},
            "instruction": "rewrite 'beta' to 'delta'",
            "source_comment_id": "comment_2"
        }]}"#,
    ]));

    let mut settings = settings(dir.path());
    settings.token_budget = 10; // force the heading splitter
    let pipeline = DocumentPipeline::new(
        settings,
        Box::new(JsonDriver::new()),
        Box::new(Shared(llm.clone())),
        ExecutionMode::Normal,
    );
    let report = pipeline.process(&path).unwrap();

    assert!(report.success, "{:?}", report.error_message);
    // one call per heading band
    assert_eq!(llm.call_count(), 2);
    // colliding chunk ids were deduplicated
    let plan = report.plan.as_ref().unwrap();
    assert_eq!(plan.tasks.len(), 2);
    let ids: Vec<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
    assert!(ids.contains(&"t1"));
    assert!(ids.contains(&"t1_c1"));

    let session = JsonDriver::new().open(&path).unwrap();
    let len = session.text_len().unwrap();
    let text = session.text_range(0, len).unwrap();
    assert!(text.contains("gamma"));
    assert!(text.contains("delta"));
}

#[test]
fn progress_fractions_are_monotonic_per_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), doc_with_annotation("rewrite 'foo' to 'bar'"));

    let llm = ScriptedLlm::new(vec![r#"{"tasks": []}"#]);
    let mut pipeline = pipeline(dir.path(), llm, ExecutionMode::Normal);

    let events = std::sync::Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    pipeline.add_progress_callback(Box::new(move |p| {
        sink.lock().unwrap().push((p.stage, p.fraction));
    }));

    let report = pipeline.process(&path).unwrap();
    assert!(report.success);

    let events = events.lock().unwrap();
    assert!(!events.is_empty());
    for window in events.windows(2) {
        let (stage_a, frac_a) = window[0];
        let (stage_b, frac_b) = window[1];
        if stage_a == stage_b {
            assert!(frac_b >= frac_a, "fraction regressed within {stage_a:?}");
        }
    }
    // all six stages reported completion
    for stage in ["load", "inspect", "plan", "execute", "validate", "export"] {
        assert!(
            events
                .iter()
                .any(|(s, f)| s.as_str() == stage && *f == 1.0),
            "stage {stage} never completed"
        );
    }
}

#[test]
fn scripted_service_is_called_once_per_chunkless_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_doc(dir.path(), doc_with_annotation("rewrite 'foo' to 'bar'"));

    struct Shared(std::sync::Arc<ScriptedLlm>);
    impl LlmService for Shared {
        fn complete(&self, p: &PromptPair, c: &CancelToken) -> Result<String, LlmError> {
            self.0.complete(p, c)
        }
        fn model(&self) -> &str {
            self.0.model()
        }
    }

    let counter = std::sync::Arc::new(ScriptedLlm::new(vec![r#"{"tasks": []}"#]));
    let pipeline = DocumentPipeline::new(
        settings(dir.path()),
        Box::new(JsonDriver::new()),
        Box::new(Shared(counter.clone())),
        ExecutionMode::Normal,
    );
    let report = pipeline.process(&path).unwrap();

    assert!(report.success, "{:?}", report.error_message);
    assert_eq!(counter.call_count(), 1);
}
