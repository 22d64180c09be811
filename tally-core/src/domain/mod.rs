//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
pub mod import;
pub mod mapping;
pub mod result;
mod transaction;

pub use account::Account;
pub use import::{
    CandidateStatus, CommitRequest, DuplicateWarning, ImportField, ImportResult, ImportRowError,
    ImportSession, ManualCorrection, PreviewResult, RowErrorKind, RowOutcome,
    TransactionCandidate, TransactionType, UploadResult, ValidationError,
};
pub use mapping::{AmountColumns, ColumnMapping, MappingTemplate, NumberFormat};
pub use transaction::Transaction;
