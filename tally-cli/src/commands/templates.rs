//! Templates command - inspect and remove saved column mappings

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::get_context;
use crate::output;
use tally_core::MappingTemplate;

#[derive(Subcommand)]
pub enum TemplatesCommands {
    /// List saved templates
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one template
    Show {
        /// Bank name
        bank_name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a template
    Remove {
        /// Bank name
        bank_name: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

fn column(index: Option<usize>) -> String {
    index.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn run(command: TemplatesCommands) -> Result<()> {
    let ctx = get_context()?;
    let service = &ctx.import_service;

    match command {
        TemplatesCommands::List { json } => {
            let templates = service.list_templates()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&templates)?);
                return Ok(());
            }
            if templates.is_empty() {
                println!("No saved templates.");
                return Ok(());
            }

            let mut table = output::table(vec![
                "Bank", "Date", "Amount", "Debit", "Credit", "Description", "Category",
                "Date format", "Flip",
            ]);
            for t in &templates {
                table.add_row(vec![
                    t.bank_name.clone(),
                    column(t.date),
                    column(t.amount),
                    column(t.debit),
                    column(t.credit),
                    column(t.description),
                    column(t.category),
                    t.date_format.clone().unwrap_or_else(|| "auto".into()),
                    if t.flip_signs { "yes".into() } else { String::new() },
                ]);
            }
            println!("{}", table);
        }
        TemplatesCommands::Show { bank_name, json } => {
            let template = service.get_template(&bank_name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&template)?);
            } else {
                print_template(&template);
            }
        }
        TemplatesCommands::Remove { bank_name, force } => {
            // Fail early with TemplateNotFound before prompting
            service.get_template(&bank_name)?;

            if !force {
                use dialoguer::Confirm;
                if !Confirm::new()
                    .with_prompt(format!("Remove template '{}'?", bank_name))
                    .default(false)
                    .interact()?
                {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            service.delete_template(&bank_name)?;
            output::success(&format!("Template '{}' removed", bank_name));
        }
    }

    Ok(())
}

fn print_template(t: &MappingTemplate) {
    println!("{}", t.bank_name.green());
    println!("  Date: {}", column(t.date));
    if t.amount.is_some() {
        println!("  Amount: {}", column(t.amount));
    } else {
        println!("  Debit: {}", column(t.debit));
        println!("  Credit: {}", column(t.credit));
    }
    println!("  Description: {}", column(t.description));
    println!("  Category: {}", column(t.category));
    println!(
        "  Date format: {}",
        t.date_format.as_deref().unwrap_or("auto")
    );
    println!("  Number format: {:?}", t.number_format);
    if t.flip_signs {
        println!("  Options: flip_signs");
    }
    if let Some(updated) = t.updated_at {
        println!("  Updated: {}", updated.format("%Y-%m-%d %H:%M"));
    }
}
