use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub), module(redline_error))]
pub enum RedlineError {
    #[snafu(display("document error: {message} ({})", path.display()))]
    Document {
        path: PathBuf,
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("driver error: {source}"))]
    Driver {
        source: DriverError,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("LLM error: {source}"))]
    Llm {
        source: LlmError,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("plan validation error: {message}"))]
    PlanValidation {
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("format protection: {message}"))]
    FormatProtection {
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("task execution error ({task_id}): {message}"))]
    TaskExecution {
        task_id: String,
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("configuration error: {message}"))]
    Configuration {
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("run cancelled"))]
    Cancelled {
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("IO error: {source}"))]
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("JSON error: {source}"))]
    Json {
        source: serde_json::Error,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// An automation primitive failed mid-call.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), module(driver_error))]
pub enum DriverError {
    #[snafu(display("cannot open document: {} ({message})", path.display()))]
    Open {
        path: PathBuf,
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("cannot save document: {message}"))]
    Save {
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("driver primitive '{op}' failed: {message}"))]
    Primitive {
        op: String,
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub), module(llm_error))]
pub enum LlmError {
    #[snafu(display("transport failure: {message}"))]
    Transport {
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("authentication failed: {message}"))]
    Auth {
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("no parseable JSON after {attempts} attempts: {message}"))]
    Format {
        attempts: u32,
        message: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    #[snafu(display("LLM call cancelled"))]
    Cancelled {
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

impl RedlineError {
    /// Stable code for the error class, used in reports and to key the
    /// suggestion catalog.
    pub fn code(&self) -> &'static str {
        match self {
            RedlineError::Document { .. } => "DOC_001",
            RedlineError::Driver { .. } => "DRV_001",
            RedlineError::Llm { source, .. } => match source {
                LlmError::Transport { .. } => "LLM_001",
                LlmError::Auth { .. } => "LLM_002",
                LlmError::Format { .. } => "LLM_003",
                LlmError::Cancelled { .. } => "LLM_004",
            },
            RedlineError::PlanValidation { .. } => "PLAN_001",
            RedlineError::FormatProtection { .. } => "FMT_001",
            RedlineError::TaskExecution { .. } => "TASK_001",
            RedlineError::Configuration { .. } => "CFG_001",
            RedlineError::Cancelled { .. } => "RUN_001",
            RedlineError::Io { .. } => "SYS_001",
            RedlineError::Json { .. } => "SYS_002",
        }
    }

    /// Fixed remediation hints shown under `--verbose`.
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self.code() {
            "DOC_001" => &[
                "check that the document exists and is not open elsewhere",
                "verify the file extension is a supported document type",
                "confirm you have read and write permission on the file",
            ],
            "DRV_001" => &[
                "retry the run; transient driver faults usually clear",
                "run `redline check` to verify the document driver is available",
            ],
            "LLM_001" => &[
                "check your network connection",
                "the endpoint may be rate limiting; retry after a short wait",
            ],
            "LLM_002" => &[
                "verify REDLINE_API_KEY is set and has not expired",
                "run `redline check` to validate credentials",
            ],
            "LLM_003" => &[
                "the model kept returning malformed JSON; try a different --model",
                "reduce the number of annotations processed in one run",
            ],
            "PLAN_001" => &[
                "inspect the raw response in the run log for schema mismatches",
                "retry; planning failures are often transient model behavior",
            ],
            "FMT_001" => &[
                "format changes require an authorizing annotation",
                "ask the reviewer to annotate the exact text to reformat",
            ],
            "TASK_001" => &[
                "the locator may target text that no longer exists",
                "re-run with --dry-run to see which locators resolve",
            ],
            "CFG_001" => &[
                "set REDLINE_API_KEY (or REDLINE_API_KEY_FALLBACK)",
                "check redline.toml for malformed settings",
            ],
            "RUN_001" => &["the run was cancelled; the document was restored if needed"],
            _ => &[],
        }
    }

    /// CLI exit code for this error: configuration problems are `2`,
    /// everything else is a pipeline failure `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            RedlineError::Configuration { .. } => 2,
            _ => 1,
        }
    }
}

pub type Result<T, E = RedlineError> = std::result::Result<T, E>;
