//! Template store - named mapping presets, persisted in settings.json

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

use crate::config::Config;
use crate::domain::result::{Error, Result};
use crate::domain::MappingTemplate;

/// Template store backed by the settings file
///
/// Every call re-reads the file, so edits made by another process are seen.
/// Writes within this process are serialized.
pub struct TemplateService {
    tally_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TemplateService {
    pub fn new(tally_dir: PathBuf) -> Self {
        Self {
            tally_dir,
            write_lock: Mutex::new(()),
        }
    }

    /// All saved templates, sorted by bank name
    pub fn list(&self) -> Result<Vec<MappingTemplate>> {
        let config = Config::load(&self.tally_dir)?;
        Ok(config.import_templates.into_values().collect())
    }

    /// Get a saved template by bank name
    pub fn get(&self, bank_name: &str) -> Result<MappingTemplate> {
        let config = Config::load(&self.tally_dir)?;
        config
            .import_templates
            .get(bank_name.trim())
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound(bank_name.to_string()))
    }

    /// Insert or replace the template for its bank name
    pub fn save(&self, template: &MappingTemplate) -> Result<()> {
        let bank_name = template.bank_name.trim();
        if bank_name.is_empty() {
            return Err(Error::invalid_mapping("template bank name cannot be empty"));
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| Error::Other(format!("Lock poisoned: {}", e)))?;

        let mut config = Config::load(&self.tally_dir)?;
        let mut stored = template.clone();
        stored.bank_name = bank_name.to_string();
        stored.updated_at = Some(Utc::now());
        config.import_templates.insert(stored.bank_name.clone(), stored);
        config.save(&self.tally_dir)
    }

    /// Remove a template; returns false if there was none
    pub fn delete(&self, bank_name: &str) -> Result<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| Error::Other(format!("Lock poisoned: {}", e)))?;

        let mut config = Config::load(&self.tally_dir)?;
        let removed = config.import_templates.remove(bank_name.trim()).is_some();
        if removed {
            config.save(&self.tally_dir)?;
        }
        Ok(removed)
    }
}
