//! DuckDB adapter - accounts, categories and transactions

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::{params, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::result::Error;
use crate::domain::{Account, Transaction};
use crate::ports::{AccountLookup, CategoryStore, TransactionStore};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

const TRANSACTION_COLUMNS: &str = "transaction_id, account_id, amount, description, category,
    transaction_date::VARCHAR, created_at, updated_at, csv_fingerprint, csv_batch_id, csv_row_index";

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the database file
    ///
    /// Retries with exponential backoff on file locking errors, which occur
    /// when another process holds the database.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[tally] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading off: nothing here needs one
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    // === Account operations ===

    pub fn get_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, name, currency, institution_name, created_at, updated_at
             FROM sys_accounts ORDER BY name",
        )?;

        let accounts = stmt
            .query_map([], |row| Ok(row_to_account(row)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(accounts)
    }

    pub fn get_account_by_id(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, name, currency, institution_name, created_at, updated_at
             FROM sys_accounts WHERE account_id = ?",
        )?;

        let account = stmt.query_row([id], |row| Ok(row_to_account(row))).ok();
        Ok(account)
    }

    pub fn upsert_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_accounts (account_id, name, currency, institution_name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (account_id) DO UPDATE SET
                name = EXCLUDED.name,
                currency = EXCLUDED.currency,
                institution_name = COALESCE(EXCLUDED.institution_name, sys_accounts.institution_name),
                updated_at = EXCLUDED.updated_at",
            params![
                account.id.to_string(),
                account.name,
                account.currency,
                account.institution_name,
                account.created_at.to_rfc3339(),
                account.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // === Category operations ===

    pub fn add_category(&self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_categories (name, created_at) VALUES (?, ?)
             ON CONFLICT (name) DO NOTHING",
            params![name.trim(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_categories(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM sys_categories ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    /// Stored category whose name matches `hint` ignoring case
    pub fn find_category(&self, hint: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT name FROM sys_categories WHERE lower(name) = lower(?) LIMIT 1")?;
        let name = stmt.query_row([hint.trim()], |row| row.get::<_, String>(0)).ok();
        Ok(name)
    }

    // === Transaction operations ===

    pub fn get_transactions(&self) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_transactions ORDER BY transaction_date, csv_row_index",
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map([], |row| Ok(row_to_transaction(row)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(transactions)
    }

    /// Transactions of one account dated within `[start, end]`
    pub fn get_transactions_by_account_in_range(
        &self,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_transactions
             WHERE account_id = ?
               AND transaction_date >= CAST(? AS DATE)
               AND transaction_date <= CAST(? AS DATE)
             ORDER BY transaction_date",
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(
                params![account_id, start.to_string(), end.to_string()],
                |row| Ok(row_to_transaction(row)),
            )?
            .filter_map(|r| r.ok())
            .collect();

        Ok(transactions)
    }

    /// Transactions written by one import batch, in file order
    pub fn get_transactions_by_batch(&self, batch_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_transactions WHERE csv_batch_id = ? ORDER BY csv_row_index",
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map([batch_id], |row| Ok(row_to_transaction(row)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(transactions)
    }

    pub fn get_transaction_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sys_transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Insert a transaction only if it doesn't already exist.
    /// Returns true if inserted, false if skipped.
    pub fn insert_transaction_if_not_exists(&self, tx: &Transaction) -> Result<bool> {
        let conn = self.conn()?;
        let rows_changed = conn.execute(
            "INSERT INTO sys_transactions (transaction_id, account_id, amount, description, category,
                                           transaction_date, created_at, updated_at,
                                           csv_fingerprint, csv_batch_id, csv_row_index)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (transaction_id) DO NOTHING",
            params![
                tx.id.to_string(),
                tx.account_id.to_string(),
                tx.amount.to_string().parse::<f64>().unwrap_or(0.0),
                tx.description,
                tx.category,
                tx.transaction_date.to_string(),
                tx.created_at.to_rfc3339(),
                tx.updated_at.to_rfc3339(),
                tx.csv_fingerprint,
                tx.csv_batch_id,
                tx.csv_row_index,
            ],
        )?;

        Ok(rows_changed > 0)
    }

    /// Count transactions with this CSV fingerprint imported outside `current_batch_id`
    pub fn count_csv_fingerprint_in_other_batches(
        &self,
        fingerprint: &str,
        current_batch_id: &str,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sys_transactions WHERE csv_fingerprint = ? AND (csv_batch_id IS NULL OR csv_batch_id != ?)",
            params![fingerprint, current_batch_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_account(row: &duckdb::Row) -> Account {
    // 0: account_id, 1: name, 2: currency, 3: institution_name, 4: created_at, 5: updated_at
    let id_str: String = row.get(0).unwrap_or_default();
    let created_str: String = row.get(4).unwrap_or_default();
    let updated_str: String = row.get(5).unwrap_or_default();

    Account {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        name: row.get(1).unwrap_or_default(),
        currency: row.get(2).unwrap_or_else(|_| "USD".to_string()),
        institution_name: row.get::<_, Option<String>>(3).ok().flatten(),
        created_at: parse_timestamp(&created_str),
        updated_at: parse_timestamp(&updated_str),
    }
}

fn row_to_transaction(row: &duckdb::Row) -> Transaction {
    // Column order follows TRANSACTION_COLUMNS
    let id_str: String = row.get(0).unwrap_or_default();
    let account_id_str: String = row.get(1).unwrap_or_default();
    let amount: f64 = row.get(2).unwrap_or(0.0);
    let tx_date_str: String = row.get(5).unwrap_or_default();
    let created_str: String = row.get(6).unwrap_or_default();
    let updated_str: String = row.get(7).unwrap_or_default();

    Transaction {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        account_id: Uuid::parse_str(&account_id_str).unwrap_or_default(),
        amount: Decimal::try_from(amount).unwrap_or_default().round_dp(2),
        description: row.get::<_, Option<String>>(3).ok().flatten(),
        category: row.get::<_, Option<String>>(4).ok().flatten(),
        transaction_date: parse_date(&tx_date_str),
        created_at: parse_timestamp(&created_str),
        updated_at: parse_timestamp(&updated_str),
        csv_fingerprint: row.get::<_, Option<String>>(8).ok().flatten(),
        csv_batch_id: row.get::<_, Option<String>>(9).ok().flatten(),
        csv_row_index: row.get::<_, Option<i64>>(10).ok().flatten(),
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

fn db_error(e: anyhow::Error) -> Error {
    Error::database(format!("{:#}", e))
}

impl AccountLookup for DuckDbRepository {
    fn find_account(&self, id: Uuid) -> crate::Result<Option<Account>> {
        self.get_account_by_id(&id.to_string()).map_err(db_error)
    }
}

impl TransactionStore for DuckDbRepository {
    fn insert_if_absent(&self, tx: &Transaction) -> crate::Result<bool> {
        self.insert_transaction_if_not_exists(tx).map_err(db_error)
    }

    fn transactions_in_range(
        &self,
        account_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> crate::Result<Vec<Transaction>> {
        self.get_transactions_by_account_in_range(&account_id.to_string(), start, end)
            .map_err(db_error)
    }

    fn fingerprint_count(&self, fingerprint: &str, batch_id: &str) -> crate::Result<usize> {
        let count = self
            .count_csv_fingerprint_in_other_batches(fingerprint, batch_id)
            .map_err(db_error)?;
        Ok(count.max(0) as usize)
    }
}

impl CategoryStore for DuckDbRepository {
    fn resolve_category(&self, hint: &str) -> crate::Result<Option<String>> {
        if hint.trim().is_empty() {
            return Ok(None);
        }
        self.find_category(hint).map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, DuckDbRepository) {
        let dir = TempDir::new().unwrap();
        let repo = DuckDbRepository::new(&dir.path().join("tally.duckdb")).unwrap();
        repo.ensure_schema().unwrap();
        (dir, repo)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_account_round_trip() {
        let (_dir, repo) = repo();
        let mut account = Account::new(Uuid::new_v4(), "Checking");
        account.institution_name = Some("First Bank".into());
        repo.upsert_account(&account).unwrap();

        let loaded = repo.find_account(account.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Checking");
        assert_eq!(loaded.institution_name.as_deref(), Some("First Bank"));
        assert!(repo.find_account(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let (_dir, repo) = repo();
        let mut tx = Transaction::new(
            Transaction::import_id("batch", 0),
            Uuid::new_v4(),
            "-12.34".parse().unwrap(),
            date("2024-01-05"),
        );
        tx.csv_batch_id = Some("batch".into());
        tx.csv_row_index = Some(0);

        assert!(repo.insert_if_absent(&tx).unwrap());
        assert!(!repo.insert_if_absent(&tx).unwrap());
        assert_eq!(repo.get_transaction_count().unwrap(), 1);

        let stored = repo.get_transactions_by_batch("batch").unwrap();
        assert_eq!(stored[0].amount, "-12.34".parse::<Decimal>().unwrap());
        assert_eq!(stored[0].transaction_date, date("2024-01-05"));
        assert_eq!(stored[0].csv_row_index, Some(0));
    }

    #[test]
    fn test_fingerprint_count_ignores_the_current_batch() {
        let (_dir, repo) = repo();
        let account = Uuid::new_v4();
        for (batch, row) in [("first", 0), ("first", 1), ("second", 0)] {
            let mut tx = Transaction::new(
                Transaction::import_id(batch, row),
                account,
                "-4.50".parse().unwrap(),
                date("2024-01-06"),
            );
            tx.csv_batch_id = Some(batch.into());
            tx.ensure_fingerprint();
            repo.insert_if_absent(&tx).unwrap();
        }
        let fingerprint =
            Transaction::new(Uuid::new_v4(), account, "-4.50".parse().unwrap(), date("2024-01-06"))
                .calculate_fingerprint();

        assert_eq!(repo.fingerprint_count(&fingerprint, "second").unwrap(), 2);
        assert_eq!(repo.fingerprint_count(&fingerprint, "third").unwrap(), 3);
        assert_eq!(repo.fingerprint_count("unknown", "third").unwrap(), 0);
    }

    #[test]
    fn test_range_query_is_inclusive_and_per_account() {
        let (_dir, repo) = repo();
        let account = Uuid::new_v4();
        for (i, day) in ["2024-01-01", "2024-01-15", "2024-02-01"].iter().enumerate() {
            let tx = Transaction::new(Uuid::new_v4(), account, Decimal::from(i as i64 + 1), date(day));
            repo.insert_if_absent(&tx).unwrap();
        }
        let other = Transaction::new(Uuid::new_v4(), Uuid::new_v4(), Decimal::ONE, date("2024-01-15"));
        repo.insert_if_absent(&other).unwrap();

        let found = repo
            .transactions_in_range(account, date("2024-01-01"), date("2024-01-15"))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|t| t.account_id == account));
    }

    #[test]
    fn test_category_resolution_ignores_case() {
        let (_dir, repo) = repo();
        repo.add_category("Groceries").unwrap();

        assert_eq!(
            repo.resolve_category("groceries").unwrap().as_deref(),
            Some("Groceries")
        );
        assert_eq!(repo.resolve_category("Travel").unwrap(), None);
        assert_eq!(repo.resolve_category("  ").unwrap(), None);
    }
}
