//! Configuration management
//!
//! Settings live in `settings.json` inside the tally directory:
//! ```json
//! {
//!   "import": { "sessionTtlMinutes": 30, "previewSampleSize": 50, ... },
//!   "importTemplates": { "First Bank": { ... } }
//! }
//! ```
//! Keys this crate does not manage are preserved on save.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::domain::MappingTemplate;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    import: ImportSettings,
    #[serde(default)]
    import_templates: BTreeMap<String, MappingTemplate>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Tunables for the import pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSettings {
    /// Inactivity window after which an import session expires
    pub session_ttl_minutes: u64,
    /// Upper bound on sampled rows returned by a preview
    pub preview_sample_size: usize,
    /// Raw rows echoed back on upload
    pub preview_raw_rows: usize,
    /// Largest amount difference still treated as a duplicate (0 = exact)
    pub duplicate_amount_tolerance: Decimal,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 30,
            preview_sample_size: 50,
            preview_raw_rows: 5,
            duplicate_amount_tolerance: Decimal::ZERO,
        }
    }
}

/// Longest accepted session TTL (one year)
pub const MAX_SESSION_TTL_MINUTES: u64 = 525_600;

impl ImportSettings {
    /// Session inactivity window, clamped to `MAX_SESSION_TTL_MINUTES`
    pub fn session_ttl(&self) -> chrono::Duration {
        let minutes = self.session_ttl_minutes.min(MAX_SESSION_TTL_MINUTES) as i64;
        chrono::Duration::try_minutes(minutes).unwrap_or_else(chrono::Duration::zero)
    }

    /// Reject settings the import pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_minutes == 0 || self.session_ttl_minutes > MAX_SESSION_TTL_MINUTES {
            return Err(Error::Config(format!(
                "sessionTtlMinutes must be between 1 and {}, got {}",
                MAX_SESSION_TTL_MINUTES, self.session_ttl_minutes
            )));
        }
        Ok(())
    }
}

/// Tally configuration (simplified view of settings)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub import: ImportSettings,
    pub import_templates: BTreeMap<String, MappingTemplate>,
}

impl Config {
    /// Load config from the tally directory
    ///
    /// A missing or unparseable settings file yields defaults. The session TTL
    /// can be overridden with `TALLY_SESSION_TTL_MINUTES`; an out-of-range TTL
    /// is a configuration error.
    pub fn load(tally_dir: &Path) -> Result<Self> {
        let raw = Self::read_settings(tally_dir)?.unwrap_or_default();

        let mut import = raw.import;
        if let Some(minutes) = ttl_override() {
            import.session_ttl_minutes = minutes;
        }
        import.validate()?;

        Ok(Self {
            import,
            import_templates: raw.import_templates,
        })
    }

    /// Save config to the tally directory
    /// Preserves other settings that this crate doesn't manage
    ///
    /// Refuses to write over a settings file it cannot parse.
    pub fn save(&self, tally_dir: &Path) -> Result<()> {
        let settings_path = tally_dir.join("settings.json");

        let mut settings = Self::read_settings(tally_dir)?.map_err(|e| {
            Error::Config(format!(
                "{} is not valid JSON, not overwriting it: {}",
                settings_path.display(),
                e
            ))
        })?;
        let file_ttl = settings.import.session_ttl_minutes;
        settings.import = self.import.clone();
        // The environment override is never written back
        if ttl_override().is_some() {
            settings.import.session_ttl_minutes = file_ttl;
        }
        settings.import_templates = self.import_templates.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }

    /// Read settings.json; the inner result is the parse outcome
    fn read_settings(
        tally_dir: &Path,
    ) -> Result<std::result::Result<SettingsFile, serde_json::Error>> {
        let settings_path = tally_dir.join("settings.json");
        if !settings_path.exists() {
            return Ok(Ok(SettingsFile::default()));
        }
        let content = std::fs::read_to_string(&settings_path)?;
        Ok(serde_json::from_str(&content))
    }
}

fn ttl_override() -> Option<u64> {
    std::env::var("TALLY_SESSION_TTL_MINUTES")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}
