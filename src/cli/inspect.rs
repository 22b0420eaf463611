use std::path::Path;

use crate::driver::{DocumentDriver, JsonDriver};
use crate::error::{RedlineError, Result};
use crate::inspect;

/// Inspector-only run: print structure + annotations as JSON.
pub fn run(path: &Path, verbose: bool) -> i32 {
    match try_run(path) {
        Ok(()) => 0,
        Err(e) => {
            super::process::print_error(&e, verbose);
            e.exit_code()
        }
    }
}

fn try_run(path: &Path) -> Result<()> {
    let driver = JsonDriver::new();
    let session = driver.open(path).map_err(|e| RedlineError::Document {
        path: path.to_path_buf(),
        message: e.to_string(),
        location: snafu::Location::default(),
    })?;

    let structure = inspect::extract_structure(session.as_ref())?;
    let annotations = inspect::extract_annotations(session.as_ref())?;

    let output = serde_json::json!({
        "document": path.display().to_string(),
        "structure": structure,
        "annotations": annotations,
    });
    let pretty = serde_json::to_string_pretty(&output).map_err(|e| RedlineError::Json {
        source: e,
        location: snafu::Location::default(),
    })?;
    println!("{pretty}");
    Ok(())
}
