//! Import session state and the artifacts each pipeline stage produces

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::mapping::ColumnMapping;

/// Server-held state for one in-progress CSV import
///
/// The raw payload is shared and never mutated after upload; only the
/// mapping is replaceable.
#[derive(Debug, Clone)]
pub struct ImportSession {
    pub session_id: String,
    pub headers: Arc<Vec<String>>,
    pub raw_rows: Arc<Vec<Vec<String>>>,
    pub destination_account_id: Uuid,
    pub mapping: Option<ColumnMapping>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ImportSession {
    pub fn row_count(&self) -> usize {
        self.raw_rows.len()
    }
}

/// Transaction field a row-level problem is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportField {
    Date,
    Amount,
    Description,
    Category,
}

impl fmt::Display for ImportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportField::Date => "date",
            ImportField::Amount => "amount",
            ImportField::Description => "description",
            ImportField::Category => "category",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Valid,
    DuplicateSuspect,
}

/// A row that parsed into a transaction but has not been committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCandidate {
    /// Zero-based index into the session's raw rows
    pub row_index: usize,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub category_hint: Option<String>,
    pub status: CandidateStatus,
}

/// The first fatal problem found in a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row_index: usize,
    pub field: ImportField,
    pub message: String,
    pub raw_value: String,
}

/// Result of mapping one raw row: a candidate, or exactly one error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Parsed(TransactionCandidate),
    Invalid(ValidationError),
}

impl RowOutcome {
    pub fn row_index(&self) -> usize {
        match self {
            RowOutcome::Parsed(candidate) => candidate.row_index,
            RowOutcome::Invalid(error) => error.row_index,
        }
    }
}

/// Advisory: a valid row looks like a transaction that is already stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateWarning {
    pub row_index: usize,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: Option<String>,
    pub existing_transaction_id: Uuid,
}

/// What the user sees before deciding what to commit
///
/// `valid_count` counts every importable row (duplicate suspects included);
/// `sampled_valid_transactions` is only the bounded sample shown for review.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub session_id: String,
    pub total_rows: usize,
    pub valid_count: usize,
    pub error_count: usize,
    pub duplicate_count: usize,
    pub income_count: usize,
    pub expense_count: usize,
    /// Date format actually used (configured or detected)
    pub date_format: Option<String>,
    pub sampled_valid_transactions: Vec<TransactionCandidate>,
    pub validation_errors: Vec<ValidationError>,
    pub duplicate_warnings: Vec<DuplicateWarning>,
}

/// User override for one row's parsed fields, applied before re-validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualCorrection {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// The accept/reject/correct decision set for a commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub session_id: String,
    #[serde(default)]
    pub approved_row_indices: BTreeSet<usize>,
    #[serde(default)]
    pub rejected_row_indices: BTreeSet<usize>,
    #[serde(default)]
    pub manual_corrections: BTreeMap<usize, ManualCorrection>,
}

impl CommitRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn approve(mut self, rows: impl IntoIterator<Item = usize>) -> Self {
        self.approved_row_indices.extend(rows);
        self
    }

    pub fn reject(mut self, rows: impl IntoIterator<Item = usize>) -> Self {
        self.rejected_row_indices.extend(rows);
        self
    }

    pub fn correct(mut self, row_index: usize, correction: ManualCorrection) -> Self {
        self.manual_corrections.insert(row_index, correction);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    /// The row did not survive re-validation at commit time
    Validation,
    /// The transaction or its category could not be stored
    TransactionWrite,
}

/// Why one row selected for import did not make it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRowError {
    pub row_index: usize,
    pub kind: RowErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<ImportField>,
    pub message: String,
}

/// Outcome of a commit
///
/// Always `successful_imports + failed_imports + skipped_rows == total_processed`.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    /// Import batch id stamped on every written transaction (the session id)
    pub batch_id: String,
    pub total_processed: usize,
    pub successful_imports: usize,
    pub failed_imports: usize,
    pub skipped_rows: usize,
    /// Skipped rows that were already stored by an earlier import of the same data
    pub already_imported: usize,
    pub errors: Vec<ImportRowError>,
    pub imported_transaction_ids: Vec<Uuid>,
}

/// Response to an upload: enough to render the mapping step
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub session_id: String,
    pub headers: Vec<String>,
    pub row_count: usize,
    /// First few raw rows, verbatim
    pub preview_rows: Vec<Vec<String>>,
    /// Best guess from header names, for the user to review
    pub suggested_mapping: ColumnMapping,
    pub expires_at: DateTime<Utc>,
}
