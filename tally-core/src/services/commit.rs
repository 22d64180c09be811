//! Commit service - writes the selected rows of a consumed session

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::domain::result::{Error, Result};
use crate::domain::{
    CommitRequest, ImportResult, ImportRowError, ImportSession, RowErrorKind, RowOutcome,
    Transaction, TransactionCandidate,
};
use crate::ports::{AccountLookup, CategoryStore, TransactionStore};
use crate::services::mapper;

/// Whether a row is selected for import.
///
/// Rejection always wins; a non-empty approved set restricts the import to
/// its rows; otherwise every row is selected.
pub fn is_selected(row_index: usize, approved: &BTreeSet<usize>, rejected: &BTreeSet<usize>) -> bool {
    !rejected.contains(&row_index) && (approved.is_empty() || approved.contains(&row_index))
}

enum RowWrite {
    Imported(uuid::Uuid),
    /// Same account, date, amount and description already stored by another batch
    AlreadyImported,
}

pub struct CommitService {
    accounts: Arc<dyn AccountLookup>,
    transactions: Arc<dyn TransactionStore>,
    categories: Arc<dyn CategoryStore>,
}

impl CommitService {
    pub fn new(
        accounts: Arc<dyn AccountLookup>,
        transactions: Arc<dyn TransactionStore>,
        categories: Arc<dyn CategoryStore>,
    ) -> Self {
        Self {
            accounts,
            transactions,
            categories,
        }
    }

    /// Everything that must hold before a session may be consumed
    pub fn check(&self, session: &ImportSession, request: &CommitRequest) -> Result<()> {
        let mapping = session
            .mapping
            .as_ref()
            .ok_or_else(|| Error::invalid_mapping("no column mapping has been applied"))?;
        mapping.validate(session.headers.len())?;

        if self
            .accounts
            .find_account(session.destination_account_id)?
            .is_none()
        {
            return Err(Error::AccountNotFound(
                session.destination_account_id.to_string(),
            ));
        }

        let rows = session.row_count();
        let out_of_range = request
            .approved_row_indices
            .iter()
            .chain(&request.rejected_row_indices)
            .chain(request.manual_corrections.keys())
            .find(|&&index| index >= rows);
        if let Some(index) = out_of_range {
            return Err(Error::invalid_request(format!(
                "row index {} is out of range (file has {} rows)",
                index, rows
            )));
        }

        Ok(())
    }

    /// Re-validate and write the selected rows.
    ///
    /// Rows are written one by one; a failed row is reported and the rest
    /// carry on. Nothing is rolled back.
    ///
    /// Without an explicit approval set, rows whose fingerprint is already
    /// stored by another batch are skipped, so re-uploading a file after a
    /// partial import does not write its rows twice. Each stored match
    /// accounts for one row; identical rows beyond the stored count import.
    pub fn commit(&self, session: &ImportSession, request: &CommitRequest) -> Result<ImportResult> {
        let mapping = session
            .mapping
            .as_ref()
            .ok_or_else(|| Error::invalid_mapping("no column mapping has been applied"))?;
        let mapped = mapper::apply(session, mapping, &request.manual_corrections)?;

        let mut result = ImportResult {
            batch_id: session.session_id.clone(),
            total_processed: session.row_count(),
            successful_imports: 0,
            failed_imports: 0,
            skipped_rows: 0,
            already_imported: 0,
            errors: Vec::new(),
            imported_transaction_ids: Vec::new(),
        };

        let mut prior = request.approved_row_indices.is_empty().then(HashMap::new);

        for outcome in mapped.outcomes {
            let row_index = outcome.row_index();
            if !is_selected(
                row_index,
                &request.approved_row_indices,
                &request.rejected_row_indices,
            ) {
                result.skipped_rows += 1;
                continue;
            }

            match outcome {
                RowOutcome::Invalid(error) => {
                    result.failed_imports += 1;
                    result.errors.push(ImportRowError {
                        row_index,
                        kind: RowErrorKind::Validation,
                        field: Some(error.field),
                        message: error.message,
                    });
                }
                RowOutcome::Parsed(candidate) => match self.write(session, &candidate, prior.as_mut()) {
                    Ok(RowWrite::Imported(id)) => {
                        result.successful_imports += 1;
                        result.imported_transaction_ids.push(id);
                    }
                    Ok(RowWrite::AlreadyImported) => {
                        result.skipped_rows += 1;
                        result.already_imported += 1;
                    }
                    Err(e) => {
                        result.failed_imports += 1;
                        result.errors.push(ImportRowError {
                            row_index,
                            kind: RowErrorKind::TransactionWrite,
                            field: None,
                            message: e.to_string(),
                        });
                    }
                },
            }
        }

        Ok(result)
    }

    /// `prior` tracks, per fingerprint, how many stored rows from other
    /// batches are still unmatched; `None` disables the check.
    fn write(
        &self,
        session: &ImportSession,
        candidate: &TransactionCandidate,
        prior: Option<&mut HashMap<String, usize>>,
    ) -> Result<RowWrite> {
        let id = Transaction::import_id(&session.session_id, candidate.row_index);

        let mut tx = Transaction::new(
            id,
            session.destination_account_id,
            candidate.amount,
            candidate.date,
        );
        tx.description = candidate.description.clone();
        // A hint that doesn't resolve is dropped; a failing lookup fails the row
        tx.category = match candidate.category_hint.as_deref() {
            Some(hint) => self.categories.resolve_category(hint).map_err(|e| {
                Error::Other(format!("category lookup failed for '{}': {}", hint, e))
            })?,
            None => None,
        };
        tx.csv_batch_id = Some(session.session_id.clone());
        tx.csv_row_index = Some(candidate.row_index as i64);
        tx.ensure_fingerprint();

        if let (Some(prior), Some(fingerprint)) = (prior, tx.csv_fingerprint.as_deref()) {
            let unmatched = match prior.entry(fingerprint.to_string()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(
                    self.transactions
                        .fingerprint_count(fingerprint, &session.session_id)?,
                ),
            };
            if *unmatched > 0 {
                *unmatched -= 1;
                return Ok(RowWrite::AlreadyImported);
            }
        }

        // Already present means this row was imported before under the same id
        self.transactions.insert_if_absent(&tx)?;
        Ok(RowWrite::Imported(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, ColumnMapping, ImportField, ManualCorrection};
    use chrono::{NaiveDate, Utc};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<Transaction>>,
        failing_rows: BTreeSet<i64>,
    }

    impl TransactionStore for MemoryStore {
        fn insert_if_absent(&self, tx: &Transaction) -> Result<bool> {
            if tx.csv_row_index.is_some_and(|r| self.failing_rows.contains(&r)) {
                return Err(Error::database("disk full"));
            }
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|t| t.id == tx.id) {
                return Ok(false);
            }
            rows.push(tx.clone());
            Ok(true)
        }

        fn transactions_in_range(
            &self,
            _account_id: Uuid,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<Transaction>> {
            Ok(Vec::new())
        }

        fn fingerprint_count(&self, fingerprint: &str, batch_id: &str) -> Result<usize> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|t| t.csv_fingerprint.as_deref() == Some(fingerprint))
                .filter(|t| t.csv_batch_id.as_deref() != Some(batch_id))
                .count())
        }
    }

    struct Accounts(Vec<Uuid>);

    impl AccountLookup for Accounts {
        fn find_account(&self, id: Uuid) -> Result<Option<Account>> {
            Ok(self.0.contains(&id).then(|| Account::new(id, "Checking")))
        }
    }

    struct Categories;

    impl CategoryStore for Categories {
        fn resolve_category(&self, hint: &str) -> Result<Option<String>> {
            if hint == "broken" {
                return Err(Error::database("categories table is locked"));
            }
            Ok((hint.eq_ignore_ascii_case("groceries")).then(|| "Groceries".to_string()))
        }
    }

    fn session(account_id: Uuid) -> ImportSession {
        let rows = [
            ["2024-01-05", "Salary", "", "2500.00", "income"],
            ["2024-01-06", "Rent", "900.00", "", "housing"],
            ["invalid-date", "X", "", "10.00", ""],
            ["2024-01-07", "Y", "0", "0", ""],
            ["2024-01-08", "Market", "42.00", "", "GROCERIES"],
        ];
        ImportSession {
            session_id: "batch-1".into(),
            headers: Arc::new(
                ["Date", "Label", "Debit", "Credit", "Category"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            raw_rows: Arc::new(
                rows.iter()
                    .map(|r| r.iter().map(|s| s.to_string()).collect())
                    .collect(),
            ),
            destination_account_id: account_id,
            mapping: Some(ColumnMapping {
                date: Some(0),
                description: Some(1),
                debit: Some(2),
                credit: Some(3),
                category: Some(4),
                ..Default::default()
            }),
            created_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    fn service(account_id: Uuid, store: Arc<MemoryStore>) -> CommitService {
        CommitService::new(Arc::new(Accounts(vec![account_id])), store, Arc::new(Categories))
    }

    fn assert_conserved(result: &ImportResult) {
        assert_eq!(
            result.successful_imports + result.failed_imports + result.skipped_rows,
            result.total_processed
        );
    }

    #[test]
    fn test_selection_rule() {
        let none = BTreeSet::new();
        let approved: BTreeSet<usize> = [1, 2].into();
        let rejected: BTreeSet<usize> = [2].into();

        assert!(is_selected(0, &none, &none));
        assert!(!is_selected(0, &approved, &none));
        assert!(is_selected(1, &approved, &rejected));
        assert!(!is_selected(2, &approved, &rejected));
        assert!(!is_selected(2, &none, &rejected));
    }

    #[test]
    fn test_default_imports_every_valid_row() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let s = session(account);

        let result = service(account, store.clone())
            .commit(&s, &CommitRequest::new("batch-1"))
            .unwrap();

        assert_eq!(result.batch_id, "batch-1");
        assert_eq!(result.total_processed, 5);
        assert_eq!(result.successful_imports, 3);
        assert_eq!(result.failed_imports, 2);
        assert_eq!(result.skipped_rows, 0);
        assert_conserved(&result);
        assert!(result
            .errors
            .iter()
            .all(|e| e.kind == RowErrorKind::Validation));

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|t| t.account_id == account));
        assert!(rows.iter().all(|t| t.csv_batch_id.as_deref() == Some("batch-1")));
        assert!(rows.iter().all(|t| t.csv_fingerprint.is_some()));
    }

    #[test]
    fn test_approved_rows_only() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let request = CommitRequest::new("batch-1").approve([1]);

        let result = service(account, store.clone())
            .commit(&session(account), &request)
            .unwrap();

        assert_eq!(result.successful_imports, 1);
        assert_eq!(result.skipped_rows, 4);
        assert_eq!(result.failed_imports, 0);
        assert_eq!(
            result.imported_transaction_ids,
            vec![Transaction::import_id("batch-1", 1)]
        );
    }

    #[test]
    fn test_rejection_beats_approval() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let request = CommitRequest::new("batch-1").approve([0, 1]).reject([1]);

        let result = service(account, store.clone())
            .commit(&session(account), &request)
            .unwrap();

        assert_eq!(result.successful_imports, 1);
        assert_eq!(result.skipped_rows, 4);
        assert_conserved(&result);
    }

    #[test]
    fn test_corrections_rescue_invalid_rows() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let request = CommitRequest::new("batch-1").correct(
            2,
            ManualCorrection {
                date: NaiveDate::from_ymd_opt(2024, 1, 6),
                ..Default::default()
            },
        );

        let result = service(account, store)
            .commit(&session(account), &request)
            .unwrap();
        assert_eq!(result.successful_imports, 4);
        assert_eq!(result.failed_imports, 1);
        assert_eq!(result.errors[0].row_index, 3);
        assert_eq!(result.errors[0].field, Some(ImportField::Amount));
    }

    #[test]
    fn test_write_failure_does_not_stop_other_rows() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore {
            failing_rows: [1].into(),
            ..Default::default()
        });

        let result = service(account, store.clone())
            .commit(&session(account), &CommitRequest::new("batch-1").reject([2, 3]))
            .unwrap();

        assert_eq!(result.successful_imports, 2);
        assert_eq!(result.failed_imports, 1);
        assert_eq!(result.skipped_rows, 2);
        assert_eq!(result.errors[0].kind, RowErrorKind::TransactionWrite);
        assert_eq!(result.errors[0].row_index, 1);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_replay_reports_same_ids_without_duplicating() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let service = service(account, store.clone());
        let s = session(account);

        let first = service.commit(&s, &CommitRequest::new("batch-1")).unwrap();
        let second = service.commit(&s, &CommitRequest::new("batch-1")).unwrap();

        assert_eq!(first.imported_transaction_ids, second.imported_transaction_ids);
        assert_eq!(store.rows.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_category_hints_are_resolved_or_dropped() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        service(account, store.clone())
            .commit(&session(account), &CommitRequest::new("batch-1"))
            .unwrap();

        let rows = store.rows.lock().unwrap();
        let market = rows.iter().find(|t| t.csv_row_index == Some(4)).unwrap();
        assert_eq!(market.category.as_deref(), Some("Groceries"));
        let salary = rows.iter().find(|t| t.csv_row_index == Some(0)).unwrap();
        assert_eq!(salary.category, None);
    }

    #[test]
    fn test_category_lookup_failure_fails_only_that_row() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let mut s = session(account);
        let mut rows = (*s.raw_rows).clone();
        rows[1][4] = "broken".into();
        s.raw_rows = Arc::new(rows);

        let result = service(account, store.clone())
            .commit(&s, &CommitRequest::new("batch-1").reject([2, 3]))
            .unwrap();

        assert_eq!(result.successful_imports, 2);
        assert_eq!(result.failed_imports, 1);
        assert_eq!(result.errors[0].row_index, 1);
        assert_eq!(result.errors[0].kind, RowErrorKind::TransactionWrite);
        assert!(result.errors[0].message.contains("category lookup failed"));
        assert_conserved(&result);
        assert!(store.rows.lock().unwrap().iter().all(|t| t.csv_row_index != Some(1)));
    }

    #[test]
    fn test_rows_stored_by_an_earlier_batch_are_skipped() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let service = service(account, store.clone());

        let first = session(account);
        service
            .commit(&first, &CommitRequest::new("batch-1").approve([0]))
            .unwrap();

        let mut retry = session(account);
        retry.session_id = "batch-2".into();
        let result = service.commit(&retry, &CommitRequest::new("batch-2")).unwrap();

        assert_eq!(result.already_imported, 1);
        assert_eq!(result.skipped_rows, 1);
        assert_eq!(result.successful_imports, 2);
        assert_conserved(&result);
        assert!(!result
            .imported_transaction_ids
            .contains(&Transaction::import_id("batch-2", 0)));
        assert_eq!(store.rows.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_each_stored_row_excuses_one_identical_row() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let service = service(account, store.clone());

        let mut first = session(account);
        let mut rows = (*first.raw_rows).clone();
        rows[4] = rows[0].clone();
        first.raw_rows = Arc::new(rows);
        service
            .commit(&first, &CommitRequest::new("batch-1").approve([0]))
            .unwrap();

        // Rows 0 and 4 are identical; only one of them was stored before
        let mut retry = first.clone();
        retry.session_id = "batch-2".into();
        let result = service.commit(&retry, &CommitRequest::new("batch-2")).unwrap();

        assert_eq!(result.already_imported, 1);
        assert_eq!(result.successful_imports, 2);
        assert_eq!(
            result.imported_transaction_ids,
            vec![
                Transaction::import_id("batch-2", 1),
                Transaction::import_id("batch-2", 4)
            ]
        );
    }

    #[test]
    fn test_explicit_approval_imports_already_stored_rows() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let service = service(account, store.clone());

        service
            .commit(&session(account), &CommitRequest::new("batch-1").approve([0]))
            .unwrap();

        let mut again = session(account);
        again.session_id = "batch-2".into();
        let result = service
            .commit(&again, &CommitRequest::new("batch-2").approve([0]))
            .unwrap();

        assert_eq!(result.already_imported, 0);
        assert_eq!(result.successful_imports, 1);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_check_rejects_bad_requests() {
        let account = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let service = service(account, store);
        let s = session(account);

        assert!(service.check(&s, &CommitRequest::new("batch-1")).is_ok());
        assert!(matches!(
            service.check(&s, &CommitRequest::new("batch-1").approve([5])),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            service.check(
                &s,
                &CommitRequest::new("batch-1").correct(9, ManualCorrection::default())
            ),
            Err(Error::InvalidRequest(_))
        ));

        let mut unmapped = s.clone();
        unmapped.mapping = None;
        assert!(matches!(
            service.check(&unmapped, &CommitRequest::new("batch-1")),
            Err(Error::InvalidMapping(_))
        ));

        let mut elsewhere = s;
        elsewhere.destination_account_id = Uuid::new_v4();
        assert!(matches!(
            service.check(&elsewhere, &CommitRequest::new("batch-1")),
            Err(Error::AccountNotFound(_))
        ));
    }
}
