//! Pipeline configuration file support
//!
//! Handles parsing of `.asset-pipeline.toml` configuration files and
//! environment variable overrides.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Default configuration filename
pub const CONFIG_FILENAME: &str = ".asset-pipeline.toml";

/// Largest page the server will return
pub const MAX_PAGE_SIZE: usize = 2000;

/// Default joiner for list values
pub const FIELD_JOINER: &str = "\n";

/// Default length after which joined values are trimmed
pub const FIELD_TRIM_LEN: usize = 32000;

/// Environment variable for the page size
pub const ENV_PAGE_SIZE: &str = "ASSET_PIPELINE_PAGE_SIZE";

/// Environment variable for the row limit
pub const ENV_MAX_ROWS: &str = "ASSET_PIPELINE_MAX_ROWS";

/// Environment variable for the page limit
pub const ENV_MAX_PAGES: &str = "ASSET_PIPELINE_MAX_PAGES";

/// Environment variable for the export directory
pub const ENV_EXPORT_PATH: &str = "ASSET_PIPELINE_EXPORT_PATH";

/// Terminal export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Name of the stage implementing this format.
    pub fn stage_name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "export_json",
            ExportFormat::Csv => "export_csv",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(format!("Unknown export format: {}. Use 'json' or 'csv'.", s)),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

/// What happens when a custom callback fails on a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackErrors {
    /// Abort the run on the first failure
    #[default]
    Strict,
    /// Log, record the failure and keep going
    Lenient,
}

/// Fetch configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Rows requested per page (capped at 2000)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Stop after this many processed rows; 0 means no limit
    #[serde(default)]
    pub max_rows: Option<u64>,

    /// Stop after this many pages; 0 means no limit
    #[serde(default)]
    pub max_pages: Option<usize>,

    /// Rows to skip server side
    #[serde(default)]
    pub row_start: usize,

    /// Pause between pages, in milliseconds
    #[serde(default)]
    pub page_sleep_ms: u64,

    /// Server side query filter
    #[serde(default)]
    pub filter: Option<String>,

    /// Field specs to request
    #[serde(default)]
    pub fields: Vec<String>,

    /// Warn about and skip unknown fields instead of failing
    #[serde(default)]
    pub fields_lenient: bool,
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_rows: None,
            max_pages: None,
            row_start: 0,
            page_sleep_ms: 0,
            filter: None,
            fields: Vec::new(),
            fields_lenient: false,
        }
    }
}

/// Stage configuration section
///
/// Selects and parameterizes the row stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Patterns of fields to remove (whole-name regex, or glob)
    #[serde(default)]
    pub field_excludes: Vec<String>,

    #[serde(default)]
    pub field_flatten: bool,

    /// Field spec of the field to split rows on
    #[serde(default)]
    pub field_explode: Option<String>,

    #[serde(default)]
    pub field_join: bool,

    #[serde(default = "default_join_value")]
    pub field_join_value: String,

    /// 0 disables trimming
    #[serde(default = "default_join_trim")]
    pub field_join_trim: usize,

    #[serde(default)]
    pub field_null: bool,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub field_null_value: Value,

    /// Rename keys to column titles; unset means "only for CSV"
    #[serde(default)]
    pub field_titles: Option<bool>,

    #[serde(default)]
    pub tags_add: Vec<String>,

    #[serde(default)]
    pub tags_remove: Vec<String>,

    #[serde(default)]
    pub report_adapters_missing: bool,

    /// Regexes of software names every asset should have installed
    #[serde(default)]
    pub report_software_whitelist: Vec<String>,

    #[serde(default)]
    pub export: Option<ExportFormat>,

    /// Export file name, relative to `export_path`; unset writes to stdout
    #[serde(default)]
    pub export_file: Option<String>,

    #[serde(default = "default_export_path")]
    pub export_path: PathBuf,

    #[serde(default)]
    pub export_overwrite: bool,

    /// Write name and type header rows (CSV)
    #[serde(default)]
    pub export_schema: bool,

    /// Log progress every N processed rows
    #[serde(default)]
    pub page_progress: Option<u64>,

    /// Extra stages to select by name
    #[serde(default)]
    pub stages: Vec<String>,

    #[serde(default)]
    pub callback_errors: CallbackErrors,
}

fn default_join_value() -> String {
    FIELD_JOINER.to_string()
}

fn default_join_trim() -> usize {
    FIELD_TRIM_LEN
}

fn default_export_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            field_excludes: Vec::new(),
            field_flatten: false,
            field_explode: None,
            field_join: false,
            field_join_value: default_join_value(),
            field_join_trim: default_join_trim(),
            field_null: false,
            field_null_value: Value::Null,
            field_titles: None,
            tags_add: Vec::new(),
            tags_remove: Vec::new(),
            report_adapters_missing: false,
            report_software_whitelist: Vec::new(),
            export: None,
            export_file: None,
            export_path: default_export_path(),
            export_overwrite: false,
            export_schema: false,
            page_progress: None,
            stages: Vec::new(),
            callback_errors: CallbackErrors::default(),
        }
    }
}

impl StageConfig {
    /// One `key: value` line per setting, for start-up logging.
    pub fn describe(&self) -> Vec<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "None".to_string());
        vec![
            format!("field_excludes: {:?}", self.field_excludes),
            format!("field_flatten: {}", self.field_flatten),
            format!("field_explode: {}", opt(&self.field_explode)),
            format!("field_join: {}", self.field_join),
            format!("field_join_value: {:?}", self.field_join_value),
            format!("field_join_trim: {}", self.field_join_trim),
            format!("field_null: {}", self.field_null),
            format!("field_null_value: {}", self.field_null_value),
            format!(
                "field_titles: {}",
                self.field_titles
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "None".to_string())
            ),
            format!("tags_add: {:?}", self.tags_add),
            format!("tags_remove: {:?}", self.tags_remove),
            format!("report_adapters_missing: {}", self.report_adapters_missing),
            format!(
                "report_software_whitelist: {:?}",
                self.report_software_whitelist
            ),
            format!(
                "export: {}",
                self.export
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "None".to_string())
            ),
            format!("export_file: {}", opt(&self.export_file)),
            format!("export_path: {}", self.export_path.display()),
            format!("export_overwrite: {}", self.export_overwrite),
            format!("export_schema: {}", self.export_schema),
            format!("stages: {:?}", self.stages),
            format!("callback_errors: {:?}", self.callback_errors),
        ]
    }
}

/// Main configuration structure
///
/// Represents the `.asset-pipeline.toml` configuration file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub stages: StageConfig,
}

impl PipelineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a directory
    ///
    /// Looks for `.asset-pipeline.toml` in the directory.
    /// Falls back to defaults if not found.
    pub fn load(dir: &Path) -> Result<Self, ConfigurationError> {
        let config_path = dir.join(CONFIG_FILENAME);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).map_err(|e| {
                ConfigurationError::Invalid(format!("Failed to read config: {}", e))
            })?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(content)
            .map_err(|e| ConfigurationError::Invalid(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a directory
    pub fn save(&self, dir: &Path) -> Result<(), ConfigurationError> {
        let content = self.to_toml()?;
        std::fs::write(dir.join(CONFIG_FILENAME), content)
            .map_err(|e| ConfigurationError::Invalid(format!("Failed to write config: {}", e)))
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigurationError::Invalid(format!("Failed to serialize config: {}", e))
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var(ENV_PAGE_SIZE)
            && let Ok(size) = size.parse()
        {
            self.fetch.page_size = size;
        }

        if let Ok(rows) = std::env::var(ENV_MAX_ROWS)
            && let Ok(rows) = rows.parse()
        {
            self.fetch.max_rows = Some(rows).filter(|r| *r > 0);
        }

        if let Ok(pages) = std::env::var(ENV_MAX_PAGES)
            && let Ok(pages) = pages.parse()
        {
            self.fetch.max_pages = Some(pages).filter(|p| *p > 0);
        }

        if let Ok(path) = std::env::var(ENV_EXPORT_PATH) {
            self.stages.export_path = PathBuf::from(path);
        }
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Asset Pipeline SDK Configuration

[fetch]
# Rows per page (max 2000)
page_size = 2000

# Stop early
# max_rows = 1000
# max_pages = 10

# Skip rows server side
row_start = 0

# Pause between pages, in milliseconds
page_sleep_ms = 0

# Fields to request: "hostname", "aws:region,id", "all", "~raw.name", "re:^host"
fields = ["hostname", "network_interfaces"]

[stages]
field_excludes = []
field_flatten = true
# field_explode = "network_interfaces"
field_join = true
field_join_value = "\n"
field_join_trim = 32000
field_null = true
# field_titles = true

tags_add = []
tags_remove = []

report_adapters_missing = false
report_software_whitelist = []

# "csv" or "json"
export = "csv"
# export_file = "assets.csv"
export_path = "."
export_overwrite = false
export_schema = false

# page_progress = 1000

# "strict" or "lenient"
callback_errors = "strict"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::new();
        assert_eq!(config.fetch.page_size, MAX_PAGE_SIZE);
        assert_eq!(config.stages.field_join_value, "\n");
        assert_eq!(config.stages.field_join_trim, 32000);
        assert_eq!(config.stages.callback_errors, CallbackErrors::Strict);
        assert!(config.stages.field_null_value.is_null());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[fetch]
page_size = 50
max_rows = 10
fields = ["hostname"]

[stages]
field_flatten = true
field_null_value = "N/A"
export = "json"
callback_errors = "lenient"
"#;
        let config = PipelineConfig::parse(toml).unwrap();
        assert_eq!(config.fetch.page_size, 50);
        assert_eq!(config.fetch.max_rows, Some(10));
        assert!(config.stages.field_flatten);
        assert_eq!(config.stages.field_null_value, Value::from("N/A"));
        assert_eq!(config.stages.export, Some(ExportFormat::Json));
        assert_eq!(config.stages.callback_errors, CallbackErrors::Lenient);
    }

    #[test]
    fn test_parse_rejects_unknown_export() {
        assert!(PipelineConfig::parse("[stages]\nexport = \"xml\"\n").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::new();
        config.stages.tags_add = vec!["stale".to_string()];
        config.save(dir.path()).unwrap();
        assert!(dir.path().join(CONFIG_FILENAME).exists());

        let loaded = PipelineConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.stages.tags_add, vec!["stale".to_string()]);
    }

    #[test]
    fn test_export_format_from_str() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Json.stage_name(), "export_json");
    }

    #[test]
    fn test_describe_lists_every_setting() {
        let lines = StageConfig::default().describe();
        assert!(lines.iter().any(|l| l == "field_flatten: false"));
        assert!(lines.iter().any(|l| l == "export: None"));
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = PipelineConfig::parse(sample_config()).unwrap();
        assert_eq!(config.stages.export, Some(ExportFormat::Csv));
    }
}
