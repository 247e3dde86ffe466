use crate::engine::executor::ExecutorSettings;
use crate::errors::ConfigError;
use crate::guard::GuardSettings;
use crate::model::ComparisonPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_CONFIG_FILE: &str = "sqlgrade.yaml";
pub const DEFAULT_DB_FILE: &str = ".sqlgrade/problems.db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeConfig {
    #[serde(rename = "configVersion", default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub settings: Settings,
    /// Catalog files imported by `sqlgrade import` when no path is given.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalogs: Vec<PathBuf>,
}

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            settings: Settings::default(),
            catalogs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_db")]
    pub database: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_setup_timeout_ms")]
    pub setup_timeout_ms: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_max_display_rows")]
    pub max_display_rows: usize,
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
    #[serde(default)]
    pub guard: GuardSettings,
    /// Used for problems that declare no comparison policy of their own.
    #[serde(default)]
    pub comparison: ComparisonPolicy,
}

fn default_db() -> PathBuf {
    PathBuf::from(DEFAULT_DB_FILE)
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_setup_timeout_ms() -> u64 {
    30_000
}
fn default_pool_size() -> usize {
    4
}
fn default_max_display_rows() -> usize {
    1_000
}
fn default_max_result_rows() -> usize {
    100_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: default_db(),
            timeout_ms: default_timeout_ms(),
            setup_timeout_ms: default_setup_timeout_ms(),
            pool_size: default_pool_size(),
            max_display_rows: default_max_display_rows(),
            max_result_rows: default_max_result_rows(),
            guard: GuardSettings::default(),
            comparison: ComparisonPolicy::default(),
        }
    }
}

impl Settings {
    pub fn executor(&self) -> ExecutorSettings {
        ExecutorSettings {
            timeout_ms: self.timeout_ms,
            setup_timeout_ms: self.setup_timeout_ms,
            max_result_rows: self.max_result_rows,
        }
    }
}

/// Reads a config file. Unknown keys fail in strict mode and are logged
/// otherwise.
pub fn load_config(path: &Path, strict: bool) -> Result<GradeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    let cfg = parse_config(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e, path.display())))?;
    resolve_paths(cfg, path)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path, strict: bool) -> Result<GradeConfig, ConfigError> {
    if path.exists() {
        load_config(path, strict)
    } else {
        tracing::debug!(event = "config_default", path = %path.display());
        Ok(GradeConfig::default())
    }
}

pub fn parse_config(raw: &str, strict: bool) -> Result<GradeConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);
    let cfg: GradeConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // anchors and extension keys are allowed
    let unknown: Vec<&String> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?}",
                unknown
            )));
        }
        tracing::warn!(event = "config_unknown_fields", fields = ?unknown);
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported configVersion {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }
    if cfg.settings.pool_size == 0 {
        return Err(ConfigError("settings.pool_size must be at least 1".into()));
    }
    if cfg.settings.timeout_ms == 0 {
        return Err(ConfigError("settings.timeout_ms must be positive".into()));
    }
    if let Some(eps) = cfg.settings.comparison.numeric_tolerance {
        if !(eps.is_finite() && eps >= 0.0) {
            return Err(ConfigError(
                "settings.comparison.numeric_tolerance must be a non-negative number".into(),
            ));
        }
    }
    Ok(cfg)
}

/// Relative paths in the file are taken relative to the file's directory.
fn resolve_paths(mut cfg: GradeConfig, config_path: &Path) -> Result<GradeConfig, ConfigError> {
    let base = config_path.parent().unwrap_or(Path::new("."));
    let resolve = |p: &Path| {
        if p.is_absolute() || base.as_os_str().is_empty() {
            p.to_path_buf()
        } else {
            base.join(p)
        }
    };
    cfg.settings.database = resolve(&cfg.settings.database);
    cfg.catalogs = cfg.catalogs.iter().map(|p| resolve(p)).collect();
    Ok(cfg)
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(
        path,
        r#"configVersion: 1
settings:
  database: .sqlgrade/problems.db
  timeout_ms: 5000
  pool_size: 4
  max_display_rows: 1000
  guard:
    enabled: true
    max_query_len: 5000
  comparison:
    order: ordered
catalogs:
  - problems.yaml
"#,
    )
    .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

pub fn write_sample_catalog(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(
        path,
        r#"problems:
  - id: list-customers
    numeric_id: 1
    title: List all customers
    difficulty: easy
    category: basics
    description: Return every customer ordered by id.
    schemas:
      - dialect: postgresql
        setup_sql: |
          CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
          INSERT INTO customers VALUES (1, 'John'), (2, 'Jane');
        solution_sql: SELECT * FROM customers ORDER BY id
"#,
    )
    .map_err(|e| ConfigError(format!("failed to write sample catalog: {}", e)))?;
    Ok(())
}
