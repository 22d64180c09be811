//! Transaction domain model

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A single financial transaction belonging to an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Signed amount: positive is income, negative is expense
    pub amount: Decimal,
    pub description: Option<String>,
    /// Resolved category name
    pub category: Option<String>,
    pub transaction_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // =========================================================================
    // CSV Import tracking
    // =========================================================================
    /// Hash over account, date, amount and normalized description
    pub csv_fingerprint: Option<String>,
    /// Which import batch (session) this transaction came from
    pub csv_batch_id: Option<String>,
    /// Zero-based data row in the uploaded file
    pub csv_row_index: Option<i64>,
}

impl Transaction {
    /// Create a new transaction with required fields
    pub fn new(id: Uuid, account_id: Uuid, amount: Decimal, transaction_date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id,
            account_id,
            amount,
            description: None,
            category: None,
            transaction_date,
            created_at: now,
            updated_at: now,
            csv_fingerprint: None,
            csv_batch_id: None,
            csv_row_index: None,
        }
    }

    /// Deterministic id for the transaction produced by one row of one import batch.
    ///
    /// Re-running a commit for the same batch yields the same ids, so an
    /// insert-if-absent store makes replays no-ops.
    pub fn import_id(batch_id: &str, row_index: usize) -> Uuid {
        let name = format!("tally-import:{}:{}", batch_id, row_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }

    /// Ensure csv_fingerprint is set
    pub fn ensure_fingerprint(&mut self) {
        if self.csv_fingerprint.is_none() {
            self.csv_fingerprint = Some(self.calculate_fingerprint());
        }
    }

    /// Calculate fingerprint hash for deduplication
    ///
    /// Uses: account_id, transaction_date, amount (with sign), and normalized description.
    pub fn calculate_fingerprint(&self) -> String {
        let tx_date = self.transaction_date.format("%Y-%m-%d").to_string();

        // -0 and 0 must hash the same
        let amount = if self.amount == Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.amount
        };
        let amount_normalized = format!("{:.2}", amount);

        let desc_normalized = Self::normalize_description(self.description.as_deref());

        let fingerprint_str = format!(
            "{}|{}|{}|{}",
            self.account_id, tx_date, amount_normalized, desc_normalized
        );

        // SHA256 hash, truncated to 16 chars
        let mut hasher = Sha256::new();
        hasher.update(fingerprint_str.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..8])
    }

    /// Normalize description for fingerprint comparison
    ///
    /// - Removes literal "null" strings (CSV exports)
    /// - Removes card number masks (XXXXXXXXXXXX1234)
    /// - Normalizes account/phone numbers to last 4 digits
    /// - Removes whitespace and special characters
    fn normalize_description(desc: Option<&str>) -> String {
        static NULL_RE: OnceLock<Regex> = OnceLock::new();
        static CARD_MASK_RE: OnceLock<Regex> = OnceLock::new();
        static ACCOUNT_RE: OnceLock<Regex> = OnceLock::new();
        static SPECIAL_RE: OnceLock<Regex> = OnceLock::new();

        let desc = desc.unwrap_or("").to_lowercase();

        let null_re = NULL_RE.get_or_init(|| Regex::new(r"\bnull\b").unwrap());
        let mut normalized = null_re.replace_all(&desc, "").to_string();

        let card_mask_re = CARD_MASK_RE.get_or_init(|| Regex::new(r"x{10,}\d{4}").unwrap());
        normalized = card_mask_re.replace_all(&normalized, "").to_string();

        let account_re = ACCOUNT_RE.get_or_init(|| Regex::new(r"[x0-9]{7,12}").unwrap());
        normalized = account_re
            .replace_all(&normalized, |caps: &regex::Captures| {
                let text = &caps[0];
                let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() >= 4 {
                    digits[digits.len() - 4..].to_string()
                } else {
                    text.to_string()
                }
            })
            .to_string();

        // Whitespace is special too, so one pass keeps only [a-z0-9]
        let special_re = SPECIAL_RE.get_or_init(|| Regex::new(r"[^a-z0-9]").unwrap());
        special_re.replace_all(&normalized, "").to_string()
    }
}
