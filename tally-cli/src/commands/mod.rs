//! CLI command implementations

pub mod accounts;
pub mod import;
pub mod logs;
pub mod sample;
pub mod templates;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tally_core::{EntryPoint, LogEvent, LoggingService, OperationResult, TallyContext};

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<LoggingService> {
    let tally_dir = get_tally_dir().ok()?;
    std::fs::create_dir_all(&tally_dir).ok()?;
    LoggingService::new(&tally_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the tally directory from environment or default
pub fn get_tally_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TALLY_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".tally"))
        .ok_or_else(|| anyhow!("Could not find home directory; set TALLY_DIR"))
}

/// Get or create tally context
pub fn get_context() -> Result<TallyContext> {
    let tally_dir = get_tally_dir()?;

    std::fs::create_dir_all(&tally_dir)
        .with_context(|| format!("Failed to create tally directory: {:?}", tally_dir))?;

    TallyContext::new(&tally_dir).context("Failed to initialize tally context")
}

/// Stable machine code for an error, when it came from the core library
pub fn error_code(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<tally_core::Error>()
        .map(|e| e.code())
        .unwrap_or("internal_error")
}

/// Print a failure as a JSON `OperationResult` envelope
pub fn print_json_error(err: &anyhow::Error) {
    let mut context = HashMap::new();
    context.insert(
        "code".to_string(),
        serde_json::Value::from(error_code(err)),
    );
    let envelope: OperationResult<()> = OperationResult::fail_with_context(err.to_string(), context);
    if let Ok(json) = serde_json::to_string_pretty(&envelope) {
        println!("{}", json);
    }
}
