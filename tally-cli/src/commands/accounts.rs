//! Accounts command - list and create destination accounts

use anyhow::{anyhow, Result};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Input;
use uuid::Uuid;

use super::get_context;
use crate::output;
use tally_core::Account;

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// List accounts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create an account to import into
    Add {
        /// Account name
        #[arg(long)]
        name: Option<String>,
        /// ISO currency code
        #[arg(long, default_value = "USD")]
        currency: String,
        #[arg(long)]
        institution: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: AccountsCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        AccountsCommands::List { json } => {
            let accounts = ctx.repository.get_accounts()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&accounts)?);
                return Ok(());
            }
            if accounts.is_empty() {
                println!("No accounts. Create one with `tally accounts add`.");
                return Ok(());
            }

            let mut table = output::table(vec!["ID", "Name", "Currency", "Institution"]);
            for a in accounts {
                table.add_row(vec![
                    a.id.to_string(),
                    a.name,
                    a.currency,
                    a.institution_name.unwrap_or_else(|| "-".into()),
                ]);
            }
            println!("{}", table);
        }
        AccountsCommands::Add {
            name,
            currency,
            institution,
            json,
        } => {
            let name = match name {
                Some(n) => n,
                None => Input::new().with_prompt("Account name").interact_text()?,
            };

            let mut account = Account::new(Uuid::new_v4(), name.trim());
            account.currency = Account::normalize_currency(&currency);
            account.institution_name = institution;
            account.validate().map_err(|e| anyhow!(e))?;

            ctx.repository.upsert_account(&account)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&account)?);
            } else {
                println!("{}", "Account created".green());
                println!("  ID: {}", account.id);
                println!("  Name: {}", account.name);
                println!("  Currency: {}", account.currency);
            }
        }
    }

    Ok(())
}
