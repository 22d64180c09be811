//! Collaborator ports consumed by the import pipeline
//!
//! Account storage, transaction storage and category lookup live outside the
//! import engine. The engine only depends on these narrow traits.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{Account, Transaction};

/// Destination account lookup
pub trait AccountLookup: Send + Sync {
    /// Get account by ID
    fn find_account(&self, id: Uuid) -> Result<Option<Account>>;
}

/// Transaction persistence as seen by the import pipeline
pub trait TransactionStore: Send + Sync {
    /// Insert a transaction unless one with the same id exists.
    ///
    /// Returns true if inserted, false if it was already there.
    fn insert_if_absent(&self, tx: &Transaction) -> Result<bool>;

    /// Stored transactions of an account dated within `[start, end]`
    ///
    /// Used for duplicate detection by account + date + amount.
    fn transactions_in_range(
        &self,
        account_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>>;

    /// Number of stored transactions carrying `fingerprint` that do not
    /// belong to import batch `batch_id`
    fn fingerprint_count(&self, fingerprint: &str, batch_id: &str) -> Result<usize>;
}

/// Optional resolution of free-text category hints
pub trait CategoryStore: Send + Sync {
    /// Canonical category name for a hint, if one matches
    fn resolve_category(&self, hint: &str) -> Result<Option<String>>;
}
