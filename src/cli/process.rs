use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::driver::JsonDriver;
use crate::error::RedlineError;
use crate::executor::ExecutionMode;
use crate::llm::ChatClient;
use crate::pipeline::DocumentPipeline;

pub struct ProcessArgs {
    pub path: PathBuf,
    pub model: Option<String>,
    pub dry_run: bool,
    pub safe: bool,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

/// Run the pipeline and print a summary. Returns the process exit code:
/// 0 success, 1 pipeline failure, 2 environment/config failure.
pub fn run(args: ProcessArgs) -> i32 {
    match try_run(&args) {
        Ok(code) => code,
        Err(e) => {
            print_error(&e, args.verbose);
            e.exit_code()
        }
    }
}

fn try_run(args: &ProcessArgs) -> Result<i32, RedlineError> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(model) = &args.model {
        settings.model = model.clone();
    }
    if let Some(output) = &args.output {
        settings.output_dir = output.clone();
    }

    let mode = if args.dry_run {
        ExecutionMode::DryRun
    } else if args.safe {
        ExecutionMode::Safe
    } else {
        ExecutionMode::Normal
    };

    let client = ChatClient::from_settings(&settings, None)?;
    let pipeline = DocumentPipeline::new(
        settings,
        Box::new(JsonDriver::new()),
        Box::new(client),
        mode,
    );

    println!("processing {}", args.path.display());
    let report = pipeline.process(&args.path)?;
    print_report(&report, &args.path);

    Ok(if report.success { 0 } else { 1 })
}

fn print_report(report: &crate::pipeline::RunReport, path: &Path) {
    if report.success {
        println!("done: {} ({:.2}s)", path.display(), report.total_secs);
    } else if report.cancelled {
        println!("cancelled: {}", path.display());
    } else {
        println!(
            "failed: {}",
            report
                .error_message
                .as_deref()
                .unwrap_or("see validation report")
        );
    }

    if let Some(plan) = &report.plan {
        println!("  tasks planned: {}", plan.tasks.len());
    }
    if let Some(execution) = &report.execution {
        println!(
            "  tasks executed: {}/{}",
            execution.completed_tasks, execution.total_tasks
        );
    }
    if let Some(validation) = &report.validation {
        println!(
            "  format audit: {} authorized, {} unauthorized",
            validation.authorized.len(),
            validation.unauthorized.len()
        );
    }
    if report.rollback_performed {
        println!("  document rolled back to backup");
    }
    if report.data_at_risk {
        println!("  WARNING: restore failed; inspect the document and backup by hand");
    }
    for (name, artifact) in &report.artifacts {
        println!("  {name}: {}", artifact.display());
    }
}

pub fn print_error(error: &RedlineError, verbose: bool) {
    eprintln!("error [{}]: {error}", error.code());
    if verbose {
        for suggestion in error.suggestions() {
            eprintln!("  hint: {suggestion}");
        }
    }
}
