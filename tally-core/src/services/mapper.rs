//! Column mapper - turns raw CSV rows into transaction candidates
//!
//! Pure and side-effect free: the same session, mapping and corrections
//! always produce the same outcomes.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::mapping::AmountColumns;
use crate::domain::result::Result;
use crate::domain::{
    CandidateStatus, ColumnMapping, ImportField, ImportSession, ManualCorrection, NumberFormat,
    RowOutcome, TransactionCandidate, TransactionType, ValidationError,
};

/// Formats tried when the mapping doesn't name one, in tie-break order
const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%m-%d-%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y",
];

/// Outcome of one mapping run
#[derive(Debug, Clone)]
pub struct MappedRows {
    /// One outcome per raw row, in row order
    pub outcomes: Vec<RowOutcome>,
    /// Date format used (configured, or detected from the date column)
    pub date_format: Option<String>,
}

impl MappedRows {
    pub fn candidates(&self) -> impl Iterator<Item = &TransactionCandidate> {
        self.outcomes.iter().filter_map(|o| match o {
            RowOutcome::Parsed(c) => Some(c),
            RowOutcome::Invalid(_) => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.outcomes.iter().filter_map(|o| match o {
            RowOutcome::Invalid(e) => Some(e),
            RowOutcome::Parsed(_) => None,
        })
    }
}

/// Map every row of the session
///
/// Fails only if the mapping itself is invalid for this file; row problems
/// become `RowOutcome::Invalid`.
pub fn apply(
    session: &ImportSession,
    mapping: &ColumnMapping,
    corrections: &BTreeMap<usize, ManualCorrection>,
) -> Result<MappedRows> {
    mapping.validate(session.headers.len())?;

    let date_format = match mapping.date_format.as_deref().map(str::trim) {
        Some(configured) if !configured.is_empty() => Some(to_chrono_format(configured)),
        _ => mapping
            .date
            .and_then(|col| detect_date_format(session.raw_rows.iter().map(|r| cell(r, col)))),
    };

    let outcomes = session
        .raw_rows
        .iter()
        .enumerate()
        .map(|(row_index, row)| {
            map_row(
                row_index,
                row,
                mapping,
                date_format.as_deref(),
                corrections.get(&row_index),
            )
        })
        .collect();

    Ok(MappedRows {
        outcomes,
        date_format,
    })
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(|s| s.trim()).unwrap_or("")
}

fn invalid(row_index: usize, field: ImportField, message: String, raw: &str) -> RowOutcome {
    RowOutcome::Invalid(ValidationError {
        row_index,
        field,
        message,
        raw_value: raw.to_string(),
    })
}

fn map_row(
    row_index: usize,
    row: &[String],
    mapping: &ColumnMapping,
    date_format: Option<&str>,
    correction: Option<&ManualCorrection>,
) -> RowOutcome {
    let correction = correction.cloned().unwrap_or_default();

    // Date
    let date = match correction.date {
        Some(date) => date,
        None => {
            let raw = mapping.date.map(|col| cell(row, col)).unwrap_or("");
            if raw.is_empty() {
                return invalid(row_index, ImportField::Date, "date is empty".into(), raw);
            }
            let parsed = date_format.and_then(|fmt| NaiveDate::parse_from_str(raw, fmt).ok());
            match parsed {
                Some(date) => date,
                None => {
                    let message = match date_format {
                        Some(fmt) => format!("cannot parse '{}' as a date ({})", raw, fmt),
                        None => format!("cannot parse '{}' as a date", raw),
                    };
                    return invalid(row_index, ImportField::Date, message, raw);
                }
            }
        }
    };

    // Amount: corrections are taken as the final signed value
    let amount = match correction.amount {
        Some(amount) => amount,
        None => match parse_row_amount(row, mapping) {
            Ok(amount) if mapping.flip_signs => -amount,
            Ok(amount) => amount,
            Err((message, raw)) => {
                return invalid(row_index, ImportField::Amount, message, &raw);
            }
        },
    };

    let transaction_type = if amount > Decimal::ZERO {
        TransactionType::Income
    } else if amount < Decimal::ZERO {
        TransactionType::Expense
    } else {
        let raw = raw_amount_text(row, mapping);
        return invalid(
            row_index,
            ImportField::Amount,
            "zero amount not importable".into(),
            &raw,
        );
    };

    let text = |corrected: Option<String>, col: Option<usize>| -> Option<String> {
        corrected
            .map(|s| s.trim().to_string())
            .or_else(|| col.map(|c| cell(row, c).to_string()))
            .filter(|s| !s.is_empty())
    };

    RowOutcome::Parsed(TransactionCandidate {
        row_index,
        date,
        amount,
        transaction_type,
        description: text(correction.description, mapping.description),
        category_hint: text(correction.category, mapping.category),
        status: CandidateStatus::Valid,
    })
}

/// Signed amount for a row, or (message, raw text) on failure
fn parse_row_amount(
    row: &[String],
    mapping: &ColumnMapping,
) -> std::result::Result<Decimal, (String, String)> {
    match mapping.amount_columns() {
        Some(AmountColumns::Signed(col)) => {
            let raw = cell(row, col);
            if raw.is_empty() {
                return Err(("amount is empty".into(), String::new()));
            }
            parse_amount(raw, mapping.number_format)
                .ok_or_else(|| (format!("'{}' is not a valid amount", raw), raw.to_string()))
        }
        Some(AmountColumns::DebitCredit { debit, credit }) => {
            let side = |col: Option<usize>, name: &str| -> std::result::Result<Decimal, (String, String)> {
                let raw = col.map(|c| cell(row, c)).unwrap_or("");
                if raw.is_empty() {
                    return Ok(Decimal::ZERO);
                }
                parse_amount(raw, mapping.number_format)
                    .map(|v| v.abs())
                    .ok_or_else(|| {
                        (
                            format!("{} '{}' is not a valid amount", name, raw),
                            raw.to_string(),
                        )
                    })
            };
            let debit = side(debit, "debit")?;
            let credit = side(credit, "credit")?;
            Ok(credit - debit)
        }
        None => Err(("no amount column mapped".into(), String::new())),
    }
}

fn raw_amount_text(row: &[String], mapping: &ColumnMapping) -> String {
    match mapping.amount_columns() {
        Some(AmountColumns::Signed(col)) => cell(row, col).to_string(),
        Some(AmountColumns::DebitCredit { debit, credit }) => [debit, credit]
            .into_iter()
            .flatten()
            .map(|c| cell(row, c))
            .collect::<Vec<_>>()
            .join(" / "),
        None => String::new(),
    }
}

/// Parse a statement amount
///
/// Handles `(100.00)` as negative, trailing minus (`100.00-`), currency
/// symbols or codes around the number, and grouping separators.
pub fn parse_amount(raw: &str, format: NumberFormat) -> Option<Decimal> {
    let s = raw.trim();

    let (paren_negative, s) = match s.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner.trim()),
        None => (false, s),
    };

    // Currency codes like "USD 12.00" or "12,00 EUR"
    let s = s.trim_matches(|c: char| c.is_ascii_alphabetic() || c.is_whitespace());
    if s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let (decimal_sep, group_sep) = match format {
        NumberFormat::DotDecimal => ('.', ','),
        NumberFormat::CommaDecimal => (',', '.'),
    };

    let mut cleaned: String = s
        .chars()
        .filter(|c| *c != group_sep)
        .filter_map(|c| match c {
            c if c.is_ascii_digit() || c == '-' => Some(c),
            c if c == decimal_sep => Some('.'),
            _ => None,
        })
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if cleaned.len() > 1 && cleaned.ends_with('-') && !cleaned.starts_with('-') {
        cleaned.pop();
        cleaned.insert(0, '-');
    }

    let mut amount: Decimal = cleaned.parse().ok()?;
    if paren_negative && amount > Decimal::ZERO {
        amount = -amount;
    }
    Some(amount)
}

/// Translate `DD/MM/YYYY`-style tokens to a chrono pattern.
/// Strings already containing `%` are taken as chrono patterns.
pub fn to_chrono_format(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }

    const TOKENS: [(&str, &str); 5] = [
        ("YYYY", "%Y"),
        ("MMM", "%b"),
        ("YY", "%y"),
        ("MM", "%m"),
        ("DD", "%d"),
    ];

    let mut out = String::with_capacity(format.len() + 4);
    let mut rest = format;
    'outer: while !rest.is_empty() {
        for (token, pattern) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(pattern);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Pick the candidate format that parses the most non-empty cells
pub fn detect_date_format<'a>(cells: impl Iterator<Item = &'a str>) -> Option<String> {
    let cells: Vec<&str> = cells.map(str::trim).filter(|c| !c.is_empty()).collect();

    let mut best: Option<(&str, usize)> = None;
    for format in DATE_FORMATS {
        let hits = cells
            .iter()
            .filter(|c| NaiveDate::parse_from_str(c, format).is_ok())
            .count();
        if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
            best = Some((format, hits));
        }
    }
    best.map(|(format, _)| format.to_string())
}
