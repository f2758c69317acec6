use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::tracker::dispatch::RetryPolicy;
use crate::tracker::error::{Result, TrackerError};
use crate::tracker::model::ObjectId;

pub const APP_FILE: &str = "app.json";
pub const SOURCES_FILE: &str = "sources.json";
pub const MAPPINGS_FILE: &str = "mapping.json";

/// Environment variable overriding the access token from `app.json`.
pub const ACCESS_TOKEN_ENV: &str = "DATA_TRACKER_ACCESS_TOKEN";

pub const DEFAULT_API_URL: &str = "https://api.smartsheet.com/2.0";
pub const DEFAULT_MAX_URI_LENGTH: usize = 2000;

/// Application level settings read from `app.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_file_name: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_max_uri_length")]
    pub max_uri_length: usize,
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.retry_backoff_secs),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_max_attempts() -> u32 {
    RetryPolicy::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_secs() -> u64 {
    RetryPolicy::DEFAULT_BACKOFF_SECS
}

fn default_max_uri_length() -> usize {
    DEFAULT_MAX_URI_LENGTH
}

fn default_true() -> bool {
    true
}

/// Registry of connector implementations. Unknown tags are rejected while
/// the settings are deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectorKind {
    /// Local CSV file.
    Csv,
    /// Local `.xlsx` workbook.
    Excel,
    /// Latest file attached to a sheet on the remote store.
    SheetAttachment,
}

/// One entry of `sources.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub source_id: String,
    pub connector: ConnectorKind,
    pub file_name: String,
    #[serde(default = "default_true")]
    pub has_headers: bool,
    #[serde(default)]
    pub worksheet: Option<String>,
    #[serde(default)]
    pub sheet_id: Option<ObjectId>,
}

/// One entry of `mapping.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    #[serde(default)]
    pub mapping_name: Option<String>,
    pub sheet_id: ObjectId,
    pub sources: Vec<MappingSource>,
}

impl MappingConfig {
    /// Human readable label used in log output.
    pub fn label(&self) -> String {
        self.mapping_name
            .clone()
            .unwrap_or_else(|| format!("sheet {}", self.sheet_id))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSource {
    pub source_id: String,
    pub lookup_mapping: LookupMapping,
    #[serde(default)]
    pub output_mappings: Vec<OutputMapping>,
}

/// How sheet rows are joined against the source key column.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupMapping {
    pub source_key: usize,
    #[serde(default)]
    pub sheet_column: Option<String>,
    #[serde(default)]
    pub lookup_by_row_id: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMapping {
    pub source_key: usize,
    pub sheet_column: String,
}

/// Validated contents of a settings directory.
#[derive(Debug, Clone)]
pub struct Settings {
    pub dir: PathBuf,
    pub app: AppConfig,
    pub sources: Vec<SourceConfig>,
    pub mappings: Vec<MappingConfig>,
}

impl Settings {
    /// Reads and validates `app.json`, `sources.json`, and `mapping.json`.
    #[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(TrackerError::MissingInput(dir.to_path_buf()));
        }

        let mut app: AppConfig = read_json(&dir.join(APP_FILE))?;
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            app.access_token = token;
        }
        let sources: Vec<SourceConfig> = read_json(&dir.join(SOURCES_FILE))?;
        let mappings: Vec<MappingConfig> = read_json(&dir.join(MAPPINGS_FILE))?;
        debug!(
            source_count = sources.len(),
            mapping_count = mappings.len(),
            "settings read"
        );

        let settings = Self {
            dir: dir.to_path_buf(),
            app,
            sources,
            mappings,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the invariants every run relies on. Problems confined to a
    /// single mapping are left to that mapping's run, which skips it.
    pub fn validate(&self) -> Result<()> {
        if self.app.access_token.trim().is_empty() {
            return Err(config_error(format!(
                "{APP_FILE} needs an accessToken (or set {ACCESS_TOKEN_ENV})"
            )));
        }
        if self.app.max_attempts == 0 {
            return Err(config_error("maxAttempts must be at least 1"));
        }
        if self.sources.is_empty() {
            return Err(config_error(format!(
                "there are no sources configured; add a source to {SOURCES_FILE}"
            )));
        }
        if self.mappings.is_empty() {
            return Err(config_error(format!(
                "there are no mappings configured; add a mapping to {MAPPINGS_FILE}"
            )));
        }

        let mut source_ids = HashSet::new();
        for source in &self.sources {
            if source.source_id.trim().is_empty() {
                return Err(config_error("every source needs a sourceId"));
            }
            if !source_ids.insert(source.source_id.as_str()) {
                return Err(config_error(format!(
                    "source id '{}' is configured more than once",
                    source.source_id
                )));
            }
            if source.connector == ConnectorKind::SheetAttachment && source.sheet_id.is_none() {
                return Err(config_error(format!(
                    "source '{}' uses the sheetAttachment connector and needs a sheetId",
                    source.source_id
                )));
            }
        }

        Ok(())
    }

    /// Resolves a source file name relative to the settings directory.
    pub fn resolve_path(&self, file_name: impl AsRef<Path>) -> PathBuf {
        let path = file_name.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }
}

/// Per-run context handed to every component.
#[derive(Debug, Clone)]
pub struct Context {
    pub settings: Settings,
    pub run_id: Uuid,
}

impl Context {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn app(&self) -> &AppConfig {
        &self.settings.app
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(TrackerError::MissingInput(path.to_path_buf()));
    }
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn config_error(message: impl Into<String>) -> TrackerError {
    TrackerError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_settings(dir: &Path, sources: serde_json::Value, mappings: serde_json::Value) {
        fs::write(
            dir.join(APP_FILE),
            json!({"accessToken": "token", "logLevel": "debug"}).to_string(),
        )
        .expect("app written");
        fs::write(dir.join(SOURCES_FILE), sources.to_string()).expect("sources written");
        fs::write(dir.join(MAPPINGS_FILE), mappings.to_string()).expect("mappings written");
    }

    fn mapping(source_id: &str) -> serde_json::Value {
        json!([{
            "sheetId": 1,
            "sources": [{
                "sourceId": source_id,
                "lookupMapping": {"sourceKey": 0, "sheetColumn": "Employee"},
                "outputMappings": [{"sourceKey": 1, "sheetColumn": "Name"}]
            }]
        }])
    }

    #[test]
    fn loads_settings_with_defaults() {
        let dir = tempdir().expect("temporary directory");
        write_settings(
            dir.path(),
            json!([{"sourceId": "staff", "connector": "csv", "fileName": "staff.csv"}]),
            mapping("staff"),
        );

        let settings = Settings::load(dir.path()).expect("settings loaded");
        assert_eq!(settings.app.api_url, DEFAULT_API_URL);
        assert_eq!(settings.app.max_uri_length, 2000);
        assert_eq!(settings.app.retry_policy().max_attempts, 3);
        assert!(settings.sources[0].has_headers);
        assert_eq!(settings.resolve_path("staff.csv"), dir.path().join("staff.csv"));
    }

    #[test]
    fn rejects_unknown_connector_tag() {
        let dir = tempdir().expect("temporary directory");
        write_settings(
            dir.path(),
            json!([{"sourceId": "staff", "connector": "ldap", "fileName": "x"}]),
            mapping("staff"),
        );

        assert!(matches!(
            Settings::load(dir.path()),
            Err(TrackerError::Json(_))
        ));
    }

    #[test]
    fn mapping_to_unknown_source_still_loads() {
        let dir = tempdir().expect("temporary directory");
        write_settings(
            dir.path(),
            json!([{"sourceId": "staff", "connector": "csv", "fileName": "staff.csv"}]),
            mapping("payroll"),
        );

        let settings = Settings::load(dir.path()).expect("settings loaded");
        assert_eq!(settings.mappings[0].sources[0].source_id, "payroll");
    }

    #[test]
    fn rejects_empty_mappings() {
        let dir = tempdir().expect("temporary directory");
        write_settings(
            dir.path(),
            json!([{"sourceId": "staff", "connector": "csv", "fileName": "staff.csv"}]),
            json!([]),
        );

        assert!(matches!(
            Settings::load(dir.path()),
            Err(TrackerError::Config(_))
        ));
    }

    #[test]
    fn ambiguous_lookup_still_loads() {
        let dir = tempdir().expect("temporary directory");
        write_settings(
            dir.path(),
            json!([{"sourceId": "staff", "connector": "csv", "fileName": "staff.csv"}]),
            json!([{
                "sheetId": 1,
                "sources": [{
                    "sourceId": "staff",
                    "lookupMapping": {"sourceKey": 0, "sheetColumn": "Employee", "lookupByRowId": true}
                }]
            }]),
        );

        let settings = Settings::load(dir.path()).expect("settings loaded");
        assert!(settings.mappings[0].sources[0].lookup_mapping.lookup_by_row_id);
    }

    #[test]
    fn attachment_sources_need_a_sheet() {
        let dir = tempdir().expect("temporary directory");
        write_settings(
            dir.path(),
            json!([{"sourceId": "staff", "connector": "sheetAttachment", "fileName": "staff.csv"}]),
            mapping("staff"),
        );

        assert!(matches!(
            Settings::load(dir.path()),
            Err(TrackerError::Config(_))
        ));
    }
}
