use crate::config::{resolve_api_key, Settings, API_KEY_ENV};
use crate::driver::{DocumentDriver, JsonDriver};

/// Environment validation: driver availability, credentials, output
/// directory. Exit code 0 when everything passes, 2 otherwise.
pub fn run() -> i32 {
    println!("redline {} environment check", env!("CARGO_PKG_VERSION"));
    let mut failed = false;

    let driver = JsonDriver::new();
    if driver.is_available() {
        println!("  ok: document driver '{}'", driver.name());
    } else {
        println!("  FAIL: document driver '{}' unavailable", driver.name());
        failed = true;
    }

    match resolve_api_key(None) {
        Ok(_) => println!("  ok: API key present ({API_KEY_ENV})"),
        Err(e) => {
            println!("  FAIL: {e}");
            failed = true;
        }
    }

    match Settings::load(None) {
        Ok(settings) => {
            println!("  ok: settings (model '{}')", settings.model);
            match std::fs::create_dir_all(&settings.output_dir) {
                Ok(()) => println!(
                    "  ok: output directory '{}'",
                    settings.output_dir.display()
                ),
                Err(e) => {
                    println!(
                        "  FAIL: output directory '{}': {e}",
                        settings.output_dir.display()
                    );
                    failed = true;
                }
            }
        }
        Err(e) => {
            println!("  FAIL: {e}");
            failed = true;
        }
    }

    if failed {
        2
    } else {
        0
    }
}
