//! Column mappings and the templates they are saved as

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};

/// How decimal numbers are written in the statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberFormat {
    /// `1,234.56`
    #[default]
    DotDecimal,
    /// `1.234,56`
    CommaDecimal,
}

/// Which CSV column index feeds which transaction field
///
/// Exactly one amount scheme is evaluated: a single signed `amount` column,
/// or separate `debit` / `credit` columns. When both are populated the
/// amount column takes precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    #[serde(default)]
    pub date: Option<usize>,
    #[serde(default)]
    pub amount: Option<usize>,
    #[serde(default)]
    pub debit: Option<usize>,
    #[serde(default)]
    pub credit: Option<usize>,
    #[serde(default)]
    pub description: Option<usize>,
    #[serde(default)]
    pub category: Option<usize>,

    #[serde(default)]
    pub bank_name: Option<String>,
    /// chrono pattern (`%d/%m/%Y`) or token pattern (`DD/MM/YYYY`); auto-detected when absent
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub number_format: NumberFormat,
    /// Negate every amount (credit card exports list charges as positive)
    #[serde(default)]
    pub flip_signs: bool,
    /// Request flag: persist this mapping as a template under `bank_name`
    #[serde(default)]
    pub save_as_template: bool,
}

/// The amount scheme a mapping resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountColumns {
    Signed(usize),
    DebitCredit {
        debit: Option<usize>,
        credit: Option<usize>,
    },
}

impl ColumnMapping {
    /// Check the mapping's invariants against a file with `column_count` columns.
    ///
    /// Runs before any row is parsed, so a bad mapping never reaches the mapper.
    pub fn validate(&self, column_count: usize) -> Result<()> {
        let date = self
            .date
            .ok_or_else(|| Error::invalid_mapping("a date column is required"))?;

        if self.amount.is_none() && self.debit.is_none() && self.credit.is_none() {
            return Err(Error::invalid_mapping(
                "an amount column or debit/credit columns are required",
            ));
        }

        let fields = [
            ("date", Some(date)),
            ("amount", self.amount),
            ("debit", self.debit),
            ("credit", self.credit),
            ("description", self.description),
            ("category", self.category),
        ];
        for (field, index) in fields {
            if let Some(index) = index {
                if index >= column_count {
                    return Err(Error::invalid_mapping(format!(
                        "{} column index {} is out of range (file has {} columns)",
                        field, index, column_count
                    )));
                }
            }
        }

        // Only the columns in effect must be distinct; debit/credit are
        // ignored once an amount column is set.
        let mut in_use: Vec<(&str, usize)> = vec![("date", date)];
        match self.amount_columns() {
            Some(AmountColumns::Signed(i)) => in_use.push(("amount", i)),
            Some(AmountColumns::DebitCredit { debit, credit }) => {
                in_use.extend(debit.map(|i| ("debit", i)));
                in_use.extend(credit.map(|i| ("credit", i)));
            }
            None => {}
        }
        in_use.extend(self.description.map(|i| ("description", i)));
        in_use.extend(self.category.map(|i| ("category", i)));

        for (n, &(field, index)) in in_use.iter().enumerate() {
            if let Some(&(other, _)) = in_use[..n].iter().find(|(_, i)| *i == index) {
                return Err(Error::invalid_mapping(format!(
                    "{} and {} must be different columns (both use column {})",
                    other, field, index
                )));
            }
        }

        if self.save_as_template && self.template_name().is_none() {
            return Err(Error::invalid_mapping(
                "a bank name is required to save the mapping as a template",
            ));
        }

        Ok(())
    }

    /// The amount scheme in effect, amount column first
    pub fn amount_columns(&self) -> Option<AmountColumns> {
        match (self.amount, self.debit, self.credit) {
            (Some(amount), _, _) => Some(AmountColumns::Signed(amount)),
            (None, None, None) => None,
            (None, debit, credit) => Some(AmountColumns::DebitCredit { debit, credit }),
        }
    }

    /// Trimmed, non-empty bank name
    pub fn template_name(&self) -> Option<&str> {
        self.bank_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Reusable mapping preset, keyed by bank name
///
/// Never stores a destination account: that is always chosen per upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingTemplate {
    pub bank_name: String,
    pub date: Option<usize>,
    #[serde(default)]
    pub amount: Option<usize>,
    #[serde(default)]
    pub debit: Option<usize>,
    #[serde(default)]
    pub credit: Option<usize>,
    #[serde(default)]
    pub description: Option<usize>,
    #[serde(default)]
    pub category: Option<usize>,
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub number_format: NumberFormat,
    #[serde(default)]
    pub flip_signs: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MappingTemplate {
    /// Snapshot a mapping as a template; fails without a bank name
    pub fn from_mapping(mapping: &ColumnMapping) -> Result<Self> {
        let bank_name = mapping.template_name().ok_or_else(|| {
            Error::invalid_mapping("a bank name is required to save the mapping as a template")
        })?;

        Ok(Self {
            bank_name: bank_name.to_string(),
            date: mapping.date,
            amount: mapping.amount,
            debit: mapping.debit,
            credit: mapping.credit,
            description: mapping.description,
            category: mapping.category,
            date_format: mapping.date_format.clone(),
            number_format: mapping.number_format,
            flip_signs: mapping.flip_signs,
            updated_at: Some(Utc::now()),
        })
    }

    /// Copy the template into a fresh mapping (values copied, not referenced)
    pub fn to_mapping(&self) -> ColumnMapping {
        ColumnMapping {
            date: self.date,
            amount: self.amount,
            debit: self.debit,
            credit: self.credit,
            description: self.description,
            category: self.category,
            bank_name: Some(self.bank_name.clone()),
            date_format: self.date_format.clone(),
            number_format: self.number_format,
            flip_signs: self.flip_signs,
            save_as_template: false,
        }
    }
}
