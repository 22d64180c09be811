//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on one stage of the import pipeline.

pub mod commit;
pub mod csv_parser;
pub mod import;
pub mod logging;
pub mod mapper;
pub mod migration;
pub mod preview;
pub mod session;
pub mod template;

pub use commit::CommitService;
pub use import::{suggest_mapping, ImportService};
pub use logging::{EntryPoint, LogEntry, LogEvent, LogStats, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use preview::PreviewService;
pub use session::SessionStore;
pub use template::TemplateService;
