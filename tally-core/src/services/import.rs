//! Import service - the CSV import wizard end to end
//!
//! upload -> map (or apply template) -> preview -> commit. State between
//! steps lives in the session store; the raw file is parsed once on upload.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::ImportSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{
    ColumnMapping, CommitRequest, ImportResult, ImportSession, MappingTemplate, PreviewResult,
    UploadResult,
};
use crate::ports::{AccountLookup, CategoryStore, TransactionStore};
use crate::services::commit::CommitService;
use crate::services::csv_parser::{self, ParsedCsv};
use crate::services::preview::PreviewService;
use crate::services::session::SessionStore;
use crate::services::template::TemplateService;

pub struct ImportService {
    sessions: SessionStore,
    templates: TemplateService,
    accounts: Arc<dyn AccountLookup>,
    preview: PreviewService,
    commit: CommitService,
    preview_raw_rows: usize,
}

impl ImportService {
    pub fn new(
        tally_dir: PathBuf,
        settings: &ImportSettings,
        accounts: Arc<dyn AccountLookup>,
        transactions: Arc<dyn TransactionStore>,
        categories: Arc<dyn CategoryStore>,
    ) -> Self {
        Self {
            sessions: SessionStore::new(settings.session_ttl()),
            templates: TemplateService::new(tally_dir),
            accounts: accounts.clone(),
            preview: PreviewService::new(transactions.clone(), settings),
            commit: CommitService::new(accounts, transactions, categories),
            preview_raw_rows: settings.preview_raw_rows,
        }
    }

    /// Parse a statement and open a session for it
    pub fn upload_csv(&self, bytes: &[u8], account_id: Uuid) -> Result<UploadResult> {
        if self.accounts.find_account(account_id)?.is_none() {
            return Err(Error::AccountNotFound(account_id.to_string()));
        }

        let ParsedCsv { headers, rows, .. } = csv_parser::parse_csv(bytes)?;
        let suggested_mapping = suggest_mapping(&headers);
        let preview_rows = rows.iter().take(self.preview_raw_rows).cloned().collect();

        let session = self.sessions.create(headers, rows, account_id)?;
        Ok(UploadResult {
            session_id: session.session_id.clone(),
            headers: session.headers.as_ref().clone(),
            row_count: session.row_count(),
            preview_rows,
            suggested_mapping,
            expires_at: session.expires_at,
        })
    }

    /// Set the session's mapping and preview it
    ///
    /// With `save_as_template` the mapping is also stored under its bank name,
    /// but only once the session has accepted it.
    pub fn apply_mapping(&self, session_id: &str, mut mapping: ColumnMapping) -> Result<PreviewResult> {
        let session = self.sessions.get(session_id)?;
        mapping.validate(session.headers.len())?;

        let template = if mapping.save_as_template {
            mapping.save_as_template = false;
            Some(MappingTemplate::from_mapping(&mapping)?)
        } else {
            None
        };

        let session = self.sessions.update(session_id, mapping)?;
        if let Some(template) = template {
            self.templates.save(&template)?;
        }
        self.preview.preview(&session)
    }

    /// Preview the session under the mapping it already has
    pub fn preview(&self, session_id: &str) -> Result<PreviewResult> {
        let session = self.sessions.get(session_id)?;
        self.preview.preview(&session)
    }

    /// Load a template into the session and return the mapping it produced
    pub fn apply_template(&self, bank_name: &str, session_id: &str) -> Result<ColumnMapping> {
        let template = self.templates.get(bank_name)?;
        let session = self.sessions.get(session_id)?;

        let mapping = template.to_mapping();
        mapping.validate(session.headers.len()).map_err(|e| {
            Error::invalid_mapping(format!(
                "template '{}' does not fit this file: {}",
                template.bank_name, e
            ))
        })?;

        self.sessions.update(session_id, mapping.clone())?;
        Ok(mapping)
    }

    pub fn list_templates(&self) -> Result<Vec<MappingTemplate>> {
        self.templates.list()
    }

    pub fn get_template(&self, bank_name: &str) -> Result<MappingTemplate> {
        self.templates.get(bank_name)
    }

    pub fn delete_template(&self, bank_name: &str) -> Result<()> {
        if self.templates.delete(bank_name)? {
            Ok(())
        } else {
            Err(Error::TemplateNotFound(bank_name.to_string()))
        }
    }

    /// Commit the session. The session is consumed only if the request
    /// passes its checks; a second commit fails without writing anything.
    pub fn commit(&self, request: &CommitRequest) -> Result<ImportResult> {
        let session = self
            .sessions
            .consume_with(&request.session_id, |s| self.commit.check(s, request))?;
        self.commit.commit(&session, request)
    }

    /// Current state of a live session
    pub fn session(&self, session_id: &str) -> Result<ImportSession> {
        self.sessions.get(session_id)
    }

    pub fn sample_csv(&self) -> &'static [u8] {
        csv_parser::sample_csv()
    }
}

/// Best-guess mapping from header names
///
/// Short abbreviations (`dr`, `cr`, `dt`, `amt`) only match a whole header;
/// longer patterns match anywhere in it. A column is used at most once.
pub fn suggest_mapping(headers: &[String]) -> ColumnMapping {
    const DATE: &[&str] = &[
        "transaction date", "trans date", "txn date", "txndate", "post date", "posted", "date", "dt",
    ];
    const DESCRIPTION: &[&str] = &[
        "description", "desc", "memo", "payee", "merchant", "details", "narration", "label",
    ];
    const DESCRIPTION_FALLBACK: &[&str] = &["name", "reference", "ref", "type"];
    const AMOUNT: &[&str] = &["transaction amount", "amount", "amt", "total"];
    const DEBIT: &[&str] = &["debit amount", "debit", "withdrawal", "dr"];
    const CREDIT: &[&str] = &["credit amount", "credit", "deposit", "cr"];
    const CATEGORY: &[&str] = &["category"];

    let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let mut used = vec![false; headers.len()];

    let mut find = |patterns: &[&str]| -> Option<usize> {
        let index = lowered.iter().enumerate().position(|(i, header)| {
            !used[i]
                && patterns
                    .iter()
                    .any(|p| header == p || (p.len() > 3 && header.contains(p)))
        })?;
        used[index] = true;
        Some(index)
    };

    let date = find(DATE);
    let amount = find(AMOUNT);
    let (debit, credit) = if amount.is_none() {
        (find(DEBIT), find(CREDIT))
    } else {
        (None, None)
    };
    let category = find(CATEGORY);
    let description = find(DESCRIPTION).or_else(|| find(DESCRIPTION_FALLBACK));

    ColumnMapping {
        date,
        amount,
        debit,
        credit,
        description,
        category,
        ..Default::default()
    }
}
