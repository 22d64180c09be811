//! Import command - run the CSV import wizard in one go
//!
//! upload -> mapping (suggested, template or flags) -> preview -> confirm -> commit

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use colored::Colorize;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{error_code, get_context, get_logger, log_event, print_json_error};
use crate::output;
use tally_core::domain::{CandidateStatus, TransactionType};
use tally_core::{
    ColumnMapping, CommitRequest, ImportResult, LogEvent, ManualCorrection, NumberFormat,
    PreviewResult, UploadResult,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NumberFormatArg {
    /// 1,234.56
    Dot,
    /// 1.234,56
    Comma,
}

impl From<NumberFormatArg> for NumberFormat {
    fn from(arg: NumberFormatArg) -> Self {
        match arg {
            NumberFormatArg::Dot => NumberFormat::DotDecimal,
            NumberFormatArg::Comma => NumberFormat::CommaDecimal,
        }
    }
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Path to CSV file
    pub file: PathBuf,
    /// Account ID to import into
    #[arg(long)]
    pub account_id: String,
    /// Start from a saved template (by bank name)
    #[arg(long)]
    pub template: Option<String>,

    /// Date column (0-based index or header name)
    #[arg(long)]
    pub date_column: Option<String>,
    /// Signed amount column
    #[arg(long)]
    pub amount_column: Option<String>,
    /// Debit column (money out)
    #[arg(long)]
    pub debit_column: Option<String>,
    /// Credit column (money in)
    #[arg(long)]
    pub credit_column: Option<String>,
    #[arg(long)]
    pub description_column: Option<String>,
    #[arg(long)]
    pub category_column: Option<String>,

    /// Date format, e.g. DD/MM/YYYY or %d/%m/%Y (auto-detected if omitted)
    #[arg(long)]
    pub date_format: Option<String>,
    #[arg(long, value_enum)]
    pub number_format: Option<NumberFormatArg>,
    /// Flip signs on all amounts (for credit card statements)
    #[arg(long)]
    pub flip_signs: bool,
    /// Bank name, used when saving a template
    #[arg(long)]
    pub bank_name: Option<String>,
    /// Save the mapping as a template under --bank-name
    #[arg(long)]
    pub save_template: bool,

    /// Only import these rows (0-based, comma separated)
    #[arg(long, value_delimiter = ',')]
    pub approve: Vec<usize>,
    /// Never import these rows
    #[arg(long, value_delimiter = ',')]
    pub reject: Vec<usize>,
    /// Override a field before import: ROW:field=value (date, amount, description, category)
    #[arg(long = "correct", value_name = "ROW:FIELD=VALUE")]
    pub corrections: Vec<String>,

    /// Preview without importing
    #[arg(long)]
    pub preview: bool,
    /// Skip confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ImportArgs) -> Result<()> {
    let logger = get_logger();
    log_event(&logger, LogEvent::new("command_executed").with_command("import"));

    let result = execute(&args, &logger);
    if let Err(e) = &result {
        log_event(
            &logger,
            LogEvent::new("import_failed")
                .with_command("import")
                .with_error(e.to_string())
                .with_error_details(error_code(e)),
        );
        if args.json {
            print_json_error(e);
        }
    }
    result
}

fn execute(args: &ImportArgs, logger: &Option<tally_core::LoggingService>) -> Result<()> {
    let ctx = get_context()?;
    let service = &ctx.import_service;

    let account_id = Uuid::parse_str(args.account_id.trim())
        .with_context(|| format!("Invalid account ID: {}", args.account_id))?;
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    // Build the commit request first so bad flags fail before any work
    let request_parts = build_decisions(args)?;

    let upload = service.upload_csv(&bytes, account_id)?;
    log_event(
        logger,
        LogEvent::new("import_uploaded")
            .with_command("import")
            .with_stage("upload")
            .with_row_count(upload.row_count),
    );

    let base = match &args.template {
        Some(bank) => {
            let mapping = service.apply_template(bank, &upload.session_id)?;
            if !args.json {
                output::info(&format!("Using template '{}'", bank));
            }
            mapping
        }
        None => upload.suggested_mapping.clone(),
    };
    let mapping = apply_flags(base, args, &upload.headers)?;

    if !args.json {
        print_upload(&upload, &mapping);
    }

    let preview = service.apply_mapping(&upload.session_id, mapping)?;
    log_event(
        logger,
        LogEvent::new("import_previewed")
            .with_command("import")
            .with_stage("preview")
            .with_row_count(preview.total_rows),
    );

    if args.preview {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&preview)?);
        } else {
            print_preview(&preview);
            println!("{}", "PREVIEW MODE - No changes applied".yellow());
        }
        return Ok(());
    }

    if !args.json {
        print_preview(&preview);
    }

    let (approved, rejected, corrections) = request_parts;
    let mut request = CommitRequest::new(upload.session_id.clone())
        .approve(approved)
        .reject(rejected);
    for (row, correction) in corrections {
        request = request.correct(row, correction);
    }

    if !args.yes && !args.json {
        let to_import = count_selected(&request, preview.total_rows);
        use dialoguer::Confirm;
        if !Confirm::new()
            .with_prompt(format!("Import up to {} rows?", to_import))
            .default(true)
            .interact()?
        {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let result = service.commit(&request)?;
    log_event(
        logger,
        LogEvent::new("import_committed")
            .with_command("import")
            .with_stage("commit")
            .with_row_count(result.successful_imports),
    );

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "preview": preview,
                "result": result,
            }))?
        );
    } else {
        print_result(&result);
    }

    Ok(())
}

type Decisions = (Vec<usize>, Vec<usize>, Vec<(usize, ManualCorrection)>);

fn build_decisions(args: &ImportArgs) -> Result<Decisions> {
    let mut corrections: Vec<(usize, ManualCorrection)> = Vec::new();
    for raw in &args.corrections {
        let (row, field, value) = parse_correction(raw)?;
        let index = match corrections.iter().position(|(r, _)| *r == row) {
            Some(i) => i,
            None => {
                corrections.push((row, ManualCorrection::default()));
                corrections.len() - 1
            }
        };
        let correction = &mut corrections[index].1;
        match field.as_str() {
            "date" => {
                correction.date = Some(
                    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                        .map_err(|_| anyhow!("Invalid corrected date '{}'. Use YYYY-MM-DD", value))?,
                )
            }
            "amount" => {
                correction.amount = Some(
                    value
                        .parse::<Decimal>()
                        .map_err(|_| anyhow!("Invalid corrected amount '{}'", value))?,
                )
            }
            "description" => correction.description = Some(value),
            "category" => correction.category = Some(value),
            other => bail!(
                "Unknown correction field '{}' (expected date, amount, description or category)",
                other
            ),
        }
    }
    Ok((args.approve.clone(), args.reject.clone(), corrections))
}

/// Split `ROW:field=value` into its parts
pub fn parse_correction(raw: &str) -> Result<(usize, String, String)> {
    let (row, rest) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid correction '{}'. Use ROW:field=value", raw))?;
    let (field, value) = rest
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid correction '{}'. Use ROW:field=value", raw))?;
    let row: usize = row
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid row number in correction '{}'", raw))?;
    Ok((row, field.trim().to_lowercase(), value.trim().to_string()))
}

/// Resolve a column flag: a 0-based index, or a header name (case-insensitive)
pub fn resolve_column(value: &str, headers: &[String]) -> Result<usize> {
    let value = value.trim();
    if let Ok(index) = value.parse::<usize>() {
        return Ok(index);
    }
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(value))
        .ok_or_else(|| {
            anyhow!(
                "Column '{}' not found. Available: {}",
                value,
                headers.join(", ")
            )
        })
}

fn apply_flags(mut mapping: ColumnMapping, args: &ImportArgs, headers: &[String]) -> Result<ColumnMapping> {
    let resolve = |flag: &Option<String>| -> Result<Option<usize>> {
        flag.as_deref().map(|v| resolve_column(v, headers)).transpose()
    };

    if let Some(col) = resolve(&args.date_column)? {
        mapping.date = Some(col);
    }
    if let Some(col) = resolve(&args.amount_column)? {
        mapping.amount = Some(col);
    }
    let debit = resolve(&args.debit_column)?;
    let credit = resolve(&args.credit_column)?;
    if (debit.is_some() || credit.is_some()) && args.amount_column.is_none() {
        // Explicit debit/credit replaces a guessed amount column
        mapping.amount = None;
        mapping.debit = debit.or(mapping.debit);
        mapping.credit = credit.or(mapping.credit);
    }
    if let Some(col) = resolve(&args.description_column)? {
        mapping.description = Some(col);
    }
    if let Some(col) = resolve(&args.category_column)? {
        mapping.category = Some(col);
    }

    if let Some(format) = &args.date_format {
        mapping.date_format = Some(format.clone());
    }
    if let Some(format) = args.number_format {
        mapping.number_format = format.into();
    }
    if args.flip_signs {
        mapping.flip_signs = true;
    }
    if let Some(bank) = &args.bank_name {
        mapping.bank_name = Some(bank.clone());
    }
    mapping.save_as_template = args.save_template;

    Ok(mapping)
}

fn count_selected(request: &CommitRequest, total_rows: usize) -> usize {
    (0..total_rows)
        .filter(|row| {
            tally_core::services::commit::is_selected(
                *row,
                &request.approved_row_indices,
                &request.rejected_row_indices,
            )
        })
        .count()
}

fn column_label(index: Option<usize>, headers: &[String]) -> String {
    match index {
        Some(i) => format!("{} ({})", headers.get(i).map(String::as_str).unwrap_or("?"), i),
        None => "-".to_string(),
    }
}

fn print_upload(upload: &UploadResult, mapping: &ColumnMapping) {
    println!(
        "{} {} rows, {} columns",
        "Loaded".cyan(),
        upload.row_count,
        upload.headers.len()
    );
    println!("  Date: {}", column_label(mapping.date, &upload.headers));
    if mapping.amount.is_some() {
        println!("  Amount: {}", column_label(mapping.amount, &upload.headers));
    } else {
        println!("  Debit: {}", column_label(mapping.debit, &upload.headers));
        println!("  Credit: {}", column_label(mapping.credit, &upload.headers));
    }
    println!("  Description: {}", column_label(mapping.description, &upload.headers));
    if mapping.category.is_some() {
        println!("  Category: {}", column_label(mapping.category, &upload.headers));
    }
    println!();
}

fn print_preview(preview: &PreviewResult) {
    println!(
        "{} rows: {} valid ({} income, {} expense), {} invalid, {} possible duplicates",
        preview.total_rows,
        preview.valid_count.to_string().green(),
        preview.income_count,
        preview.expense_count,
        preview.error_count.to_string().red(),
        preview.duplicate_count.to_string().yellow(),
    );
    if let Some(format) = &preview.date_format {
        println!("  Date format: {}", format);
    }
    println!();

    if !preview.sampled_valid_transactions.is_empty() {
        let mut table = output::table(vec!["Row", "Date", "Amount", "Type", "Description", "Category", ""]);
        for tx in &preview.sampled_valid_transactions {
            let kind = match tx.transaction_type {
                TransactionType::Income => "income".green().to_string(),
                TransactionType::Expense => "expense".to_string(),
            };
            let flag = match tx.status {
                CandidateStatus::DuplicateSuspect => "dup?".yellow().to_string(),
                CandidateStatus::Valid => String::new(),
            };
            table.add_row(vec![
                tx.row_index.to_string(),
                tx.date.to_string(),
                tx.amount.to_string(),
                kind,
                tx.description.clone().unwrap_or_else(|| "-".into()),
                tx.category_hint.clone().unwrap_or_else(|| "-".into()),
                flag,
            ]);
        }
        println!("{}", table);
        if preview.valid_count > preview.sampled_valid_transactions.len() {
            println!(
                "  (showing {} of {} valid rows)",
                preview.sampled_valid_transactions.len(),
                preview.valid_count
            );
        }
    }

    if !preview.validation_errors.is_empty() {
        println!();
        output::warning("Rows that cannot be imported:");
        let mut table = output::table(vec!["Row", "Field", "Value", "Problem"]);
        for err in &preview.validation_errors {
            table.add_row(vec![
                err.row_index.to_string(),
                err.field.to_string(),
                err.raw_value.clone(),
                err.message.clone(),
            ]);
        }
        println!("{}", table);
    }

    if !preview.duplicate_warnings.is_empty() {
        println!();
        output::warning("Possible duplicates of existing transactions (use --reject to skip):");
        for dup in &preview.duplicate_warnings {
            println!(
                "  row {}: {} {} matches {}",
                dup.row_index, dup.date, dup.amount, dup.existing_transaction_id
            );
        }
    }
    println!();
}

fn print_result(result: &ImportResult) {
    output::success("Import complete");
    println!();
    println!("  Batch: {}", result.batch_id);
    println!("  Imported: {}", result.successful_imports);
    println!("  Failed: {}", result.failed_imports);
    if result.already_imported > 0 {
        println!(
            "  Skipped: {} ({} already imported)",
            result.skipped_rows, result.already_imported
        );
    } else {
        println!("  Skipped: {}", result.skipped_rows);
    }

    for err in &result.errors {
        output::error(&format!("  row {}: {}", err.row_index, err.message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<String> {
        ["Date", "Label", "Debit", "Credit"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_parse_correction() {
        let (row, field, value) = parse_correction("3:Amount=-12.50").unwrap();
        assert_eq!(row, 3);
        assert_eq!(field, "amount");
        assert_eq!(value, "-12.50");

        // Values may contain separators
        let (_, _, value) = parse_correction("1:description=Rent: March = paid").unwrap();
        assert_eq!(value, "Rent: March = paid");

        assert!(parse_correction("x:date=2024-01-01").is_err());
        assert!(parse_correction("3-date").is_err());
    }

    #[test]
    fn test_resolve_column_by_index_or_name() {
        assert_eq!(resolve_column("2", &headers()).unwrap(), 2);
        assert_eq!(resolve_column("credit", &headers()).unwrap(), 3);
        assert!(resolve_column("Amount", &headers()).is_err());
    }
}
