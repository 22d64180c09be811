//! Preview service - validation summary, duplicate flags and a review sample

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::ImportSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{
    CandidateStatus, ColumnMapping, DuplicateWarning, ImportSession, PreviewResult,
    TransactionCandidate, TransactionType,
};
use crate::ports::TransactionStore;
use crate::services::mapper;

pub struct PreviewService {
    transactions: Arc<dyn TransactionStore>,
    sample_size: usize,
    amount_tolerance: Decimal,
}

impl PreviewService {
    pub fn new(transactions: Arc<dyn TransactionStore>, settings: &ImportSettings) -> Self {
        Self {
            transactions,
            sample_size: settings.preview_sample_size,
            amount_tolerance: settings.duplicate_amount_tolerance.abs(),
        }
    }

    /// Preview the session under its current mapping
    pub fn preview(&self, session: &ImportSession) -> Result<PreviewResult> {
        let mapping = session
            .mapping
            .as_ref()
            .ok_or_else(|| Error::invalid_mapping("no column mapping has been applied"))?;
        self.preview_with(session, mapping)
    }

    /// Preview the session under `mapping`
    pub fn preview_with(
        &self,
        session: &ImportSession,
        mapping: &ColumnMapping,
    ) -> Result<PreviewResult> {
        let mapped = mapper::apply(session, mapping, &BTreeMap::new())?;

        let mut candidates: Vec<TransactionCandidate> = mapped.candidates().cloned().collect();
        let validation_errors = mapped.errors().cloned().collect::<Vec<_>>();
        let duplicate_warnings =
            self.flag_duplicates(session.destination_account_id, &mut candidates)?;

        let income_count = candidates
            .iter()
            .filter(|c| c.transaction_type == TransactionType::Income)
            .count();

        Ok(PreviewResult {
            session_id: session.session_id.clone(),
            total_rows: session.row_count(),
            valid_count: candidates.len(),
            error_count: validation_errors.len(),
            duplicate_count: duplicate_warnings.len(),
            income_count,
            expense_count: candidates.len() - income_count,
            date_format: mapped.date_format,
            sampled_valid_transactions: sample_balanced(&candidates, self.sample_size),
            validation_errors,
            duplicate_warnings,
        })
    }

    /// Mark candidates that match a stored transaction by date and amount.
    ///
    /// Each stored transaction vouches for at most one candidate, so two
    /// identical rows against one stored row flag only the first.
    fn flag_duplicates(
        &self,
        account_id: uuid::Uuid,
        candidates: &mut [TransactionCandidate],
    ) -> Result<Vec<DuplicateWarning>> {
        let Some((start, end)) = date_range(candidates) else {
            return Ok(Vec::new());
        };

        let mut existing: HashMap<NaiveDate, Vec<(uuid::Uuid, Decimal)>> = HashMap::new();
        for tx in self.transactions.transactions_in_range(account_id, start, end)? {
            existing
                .entry(tx.transaction_date)
                .or_default()
                .push((tx.id, tx.amount.round_dp(2)));
        }

        let mut warnings = Vec::new();
        for candidate in candidates.iter_mut() {
            let Some(same_day) = existing.get_mut(&candidate.date) else {
                continue;
            };
            // Stored amounts come back at cent precision
            let amount = candidate.amount.round_dp(2);
            let hit = same_day
                .iter()
                .position(|(_, stored)| (*stored - amount).abs() <= self.amount_tolerance);
            if let Some(pos) = hit {
                let (existing_id, _) = same_day.swap_remove(pos);
                candidate.status = CandidateStatus::DuplicateSuspect;
                warnings.push(DuplicateWarning {
                    row_index: candidate.row_index,
                    date: candidate.date,
                    amount: candidate.amount,
                    description: candidate.description.clone(),
                    existing_transaction_id: existing_id,
                });
            }
        }
        Ok(warnings)
    }
}

fn date_range(candidates: &[TransactionCandidate]) -> Option<(NaiveDate, NaiveDate)> {
    let start = candidates.iter().map(|c| c.date).min()?;
    let end = candidates.iter().map(|c| c.date).max()?;
    Some((start, end))
}

/// Bounded, deterministic review sample.
///
/// Up to `cap` rows, split between income and expense in proportion to their
/// counts (at least one from each non-empty side), evenly strided within each
/// side and returned in row order.
pub fn sample_balanced(candidates: &[TransactionCandidate], cap: usize) -> Vec<TransactionCandidate> {
    if candidates.len() <= cap {
        return candidates.to_vec();
    }

    let (income, expense): (Vec<&TransactionCandidate>, Vec<&TransactionCandidate>) = candidates
        .iter()
        .partition(|c| c.transaction_type == TransactionType::Income);
    let (income_quota, expense_quota) = quotas(income.len(), expense.len(), cap);

    let mut sample: Vec<TransactionCandidate> = stride(&income, income_quota)
        .chain(stride(&expense, expense_quota))
        .cloned()
        .collect();
    sample.sort_by_key(|c| c.row_index);
    sample
}

fn quotas(income: usize, expense: usize, cap: usize) -> (usize, usize) {
    let total = income + expense;
    if total == 0 || cap == 0 {
        return (0, 0);
    }

    let mut income_quota = (cap * income + total / 2) / total;
    if cap >= 2 && income > 0 && expense > 0 {
        income_quota = income_quota.clamp(1, cap - 1);
    }
    let income_quota = income_quota.min(income);
    let expense_quota = (cap - income_quota).min(expense);
    ((cap - expense_quota).min(income), expense_quota)
}

fn stride<'a>(
    side: &'a [&'a TransactionCandidate],
    quota: usize,
) -> impl Iterator<Item = &'a TransactionCandidate> + 'a {
    let len = side.len();
    (0..quota).map(move |i| side[i * len / quota])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Transaction;
    use chrono::Utc;
    use uuid::Uuid;

    struct StoredTransactions(Vec<Transaction>);

    impl TransactionStore for StoredTransactions {
        fn insert_if_absent(&self, _tx: &Transaction) -> Result<bool> {
            Ok(true)
        }

        fn transactions_in_range(
            &self,
            account_id: Uuid,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<Transaction>> {
            Ok(self
                .0
                .iter()
                .filter(|t| {
                    t.account_id == account_id
                        && t.transaction_date >= start
                        && t.transaction_date <= end
                })
                .cloned()
                .collect())
        }

        fn fingerprint_count(&self, _fingerprint: &str, _batch_id: &str) -> Result<usize> {
            Ok(0)
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn session(account_id: Uuid, rows: &[(&str, &str)]) -> ImportSession {
        ImportSession {
            session_id: "preview".into(),
            headers: Arc::new(vec!["Date".into(), "Amount".into()]),
            raw_rows: Arc::new(
                rows.iter()
                    .map(|(d, a)| vec![d.to_string(), a.to_string()])
                    .collect(),
            ),
            destination_account_id: account_id,
            mapping: Some(ColumnMapping {
                date: Some(0),
                amount: Some(1),
                ..Default::default()
            }),
            created_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    fn service(stored: Vec<Transaction>) -> PreviewService {
        PreviewService::new(Arc::new(StoredTransactions(stored)), &ImportSettings::default())
    }

    fn candidate(row_index: usize, kind: TransactionType) -> TransactionCandidate {
        let amount = match kind {
            TransactionType::Income => Decimal::ONE,
            TransactionType::Expense => -Decimal::ONE,
        };
        TransactionCandidate {
            row_index,
            date: date(1),
            amount,
            transaction_type: kind,
            description: None,
            category_hint: None,
            status: CandidateStatus::Valid,
        }
    }

    #[test]
    fn test_counts_add_up() {
        let account = Uuid::new_v4();
        let s = session(
            account,
            &[
                ("2024-01-05", "2500.00"),
                ("2024-01-06", "-900.00"),
                ("bad", "1.00"),
                ("2024-01-07", "0"),
            ],
        );
        let preview = service(Vec::new()).preview(&s).unwrap();

        assert_eq!(preview.total_rows, 4);
        assert_eq!(preview.valid_count, 2);
        assert_eq!(preview.error_count, 2);
        assert_eq!(preview.valid_count + preview.error_count, preview.total_rows);
        assert_eq!(preview.income_count, 1);
        assert_eq!(preview.expense_count, 1);
        assert_eq!(preview.sampled_valid_transactions.len(), 2);
        assert_eq!(preview.date_format.as_deref(), Some("%Y-%m-%d"));
    }

    #[test]
    fn test_preview_requires_mapping() {
        let mut s = session(Uuid::new_v4(), &[("2024-01-05", "1.00")]);
        s.mapping = None;
        assert!(matches!(
            service(Vec::new()).preview(&s),
            Err(Error::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_duplicates_flagged_by_date_and_amount() {
        let account = Uuid::new_v4();
        let existing = Transaction::new(Uuid::new_v4(), account, d("-900.00"), date(6));
        let other_account = Transaction::new(Uuid::new_v4(), Uuid::new_v4(), d("2500.00"), date(5));

        let s = session(
            account,
            &[("2024-01-05", "2500.00"), ("2024-01-06", "-900.00")],
        );
        let preview = service(vec![existing.clone(), other_account]).preview(&s).unwrap();

        assert_eq!(preview.valid_count, 2);
        assert_eq!(preview.duplicate_count, 1);
        assert_eq!(preview.duplicate_warnings[0].row_index, 1);
        assert_eq!(preview.duplicate_warnings[0].existing_transaction_id, existing.id);

        let flagged = preview
            .sampled_valid_transactions
            .iter()
            .find(|c| c.row_index == 1)
            .unwrap();
        assert_eq!(flagged.status, CandidateStatus::DuplicateSuspect);
    }

    #[test]
    fn test_one_stored_row_flags_one_candidate() {
        let account = Uuid::new_v4();
        let existing = Transaction::new(Uuid::new_v4(), account, d("-4.50"), date(6));
        let s = session(
            account,
            &[("2024-01-06", "-4.50"), ("2024-01-06", "-4.50")],
        );
        let preview = service(vec![existing]).preview(&s).unwrap();
        assert_eq!(preview.duplicate_count, 1);
        assert_eq!(preview.duplicate_warnings[0].row_index, 0);
    }

    #[test]
    fn test_sub_cent_amounts_compare_at_cent_precision() {
        let account = Uuid::new_v4();
        let existing = Transaction::new(Uuid::new_v4(), account, d("-4.50"), date(6));
        let s = session(account, &[("2024-01-06", "-4.505")]);
        let preview = service(vec![existing]).preview(&s).unwrap();
        assert_eq!(preview.duplicate_count, 1);
        assert_eq!(preview.duplicate_warnings[0].amount, d("-4.505"));
    }

    #[test]
    fn test_amount_tolerance() {
        let account = Uuid::new_v4();
        let existing = Transaction::new(Uuid::new_v4(), account, d("-4.50"), date(6));
        let s = session(account, &[("2024-01-06", "-4.49")]);

        assert_eq!(service(vec![existing.clone()]).preview(&s).unwrap().duplicate_count, 0);

        let settings = ImportSettings {
            duplicate_amount_tolerance: d("0.01"),
            ..Default::default()
        };
        let lenient = PreviewService::new(Arc::new(StoredTransactions(vec![existing])), &settings);
        assert_eq!(lenient.preview(&s).unwrap().duplicate_count, 1);
    }

    #[test]
    fn test_small_sets_are_returned_whole() {
        let rows: Vec<_> = (0..5).map(|i| candidate(i, TransactionType::Expense)).collect();
        assert_eq!(sample_balanced(&rows, 50), rows);
    }

    #[test]
    fn test_sample_is_bounded_balanced_and_ordered() {
        // 10 income rows then 90 expense rows
        let rows: Vec<_> = (0..100)
            .map(|i| {
                let kind = if i < 10 {
                    TransactionType::Income
                } else {
                    TransactionType::Expense
                };
                candidate(i, kind)
            })
            .collect();

        let sample = sample_balanced(&rows, 10);
        assert_eq!(sample.len(), 10);
        let income = sample
            .iter()
            .filter(|c| c.transaction_type == TransactionType::Income)
            .count();
        assert_eq!(income, 1);
        assert!(sample.windows(2).all(|w| w[0].row_index < w[1].row_index));

        // Deterministic
        assert_eq!(sample, sample_balanced(&rows, 10));
    }

    #[test]
    fn test_minority_side_is_never_dropped() {
        let mut rows: Vec<_> = (0..200).map(|i| candidate(i, TransactionType::Expense)).collect();
        rows.push(candidate(200, TransactionType::Income));

        let sample = sample_balanced(&rows, 50);
        assert_eq!(sample.len(), 50);
        assert!(sample
            .iter()
            .any(|c| c.transaction_type == TransactionType::Income));
    }

    #[test]
    fn test_quotas() {
        assert_eq!(quotas(50, 50, 10), (5, 5));
        assert_eq!(quotas(0, 100, 10), (0, 10));
        assert_eq!(quotas(1, 999, 10), (1, 9));
        assert_eq!(quotas(3, 1, 1), (1, 0));
        assert_eq!(quotas(5, 5, 0), (0, 0));
    }
}
