//! Sample command - print or save an example statement CSV

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::output;

pub fn run(output_path: Option<PathBuf>) -> Result<()> {
    let bytes = tally_core::services::csv_parser::sample_csv();

    match output_path {
        Some(path) => {
            std::fs::write(&path, bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            output::success(&format!("Sample CSV written to {}", path.display()));
        }
        None => {
            std::io::stdout().write_all(bytes)?;
        }
    }
    Ok(())
}
