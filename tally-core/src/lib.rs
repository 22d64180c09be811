//! Tally Core - CSV bank statement import
//!
//! This crate implements the import pipeline following hexagonal architecture:
//!
//! - **domain**: Sessions, mappings, candidates and results
//! - **ports**: Traits for the collaborators the pipeline needs (accounts,
//!   transaction storage, categories)
//! - **services**: Parsing, mapping, preview, commit and the wizard facade
//! - **adapters**: Concrete implementations (DuckDB)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adapters::duckdb::DuckDbRepository;
use config::Config;
use services::ImportService;

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult, Result};
pub use domain::{
    Account, ColumnMapping, CommitRequest, ImportResult, ManualCorrection, MappingTemplate,
    NumberFormat, PreviewResult, Transaction, UploadResult,
};
pub use services::{EntryPoint, LogEvent, LoggingService};

/// Main context for Tally operations
///
/// Holds the database, configuration and the import service wired to the
/// DuckDB-backed ports.
pub struct TallyContext {
    pub tally_dir: PathBuf,
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub import_service: ImportService,
}

impl TallyContext {
    /// Open the tally directory, creating the database on first use
    pub fn new(tally_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(tally_dir)?;
        let config = Config::load(tally_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&tally_dir.join("tally.duckdb"))?);
        repository.ensure_schema()?;

        let import_service = ImportService::new(
            tally_dir.to_path_buf(),
            &config.import,
            repository.clone(),
            repository.clone(),
            repository.clone(),
        );

        Ok(Self {
            tally_dir: tally_dir.to_path_buf(),
            config,
            repository,
            import_service,
        })
    }
}
