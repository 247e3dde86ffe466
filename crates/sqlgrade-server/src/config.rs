use sqlgrade_core::config::{GradeConfig, DEFAULT_DB_FILE};
use sqlgrade_core::engine::ExecutorSettings;
use sqlgrade_core::guard::GuardSettings;
use sqlgrade_core::model::ComparisonPolicy;
use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub db: PathBuf,
    pub timeout_ms: u64,
    pub setup_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub pool_size: usize,
    pub max_display_rows: usize,
    pub max_result_rows: usize,
    pub max_msg_bytes: usize,
    pub cache_entries: u64,
    pub allow_admin: bool,
    pub log_level: String,
    /// `sqlgrade.yaml` to take guard and comparison settings from.
    pub config_file: Option<PathBuf>,
    pub guard: GuardSettings,
    pub comparison: ComparisonPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let exec = ExecutorSettings::default();
        Self {
            db: PathBuf::from(DEFAULT_DB_FILE),
            timeout_ms: exec.timeout_ms,
            setup_timeout_ms: exec.setup_timeout_ms,
            request_timeout_ms: 60_000,
            pool_size: 4,
            max_display_rows: 1_000,
            max_result_rows: exec.max_result_rows,
            max_msg_bytes: 1_000_000,
            cache_entries: 256,
            allow_admin: false,
            log_level: "info".to_string(),
            config_file: None,
            guard: GuardSettings::default(),
            comparison: ComparisonPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Unparseable values keep the default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = get("SQLGRADE_DB") {
            cfg.db = PathBuf::from(v);
        }
        if let Some(n) = parsed(&get, "SQLGRADE_TIMEOUT_MS") {
            cfg.timeout_ms = n;
        }
        if let Some(n) = parsed(&get, "SQLGRADE_SETUP_TIMEOUT_MS") {
            cfg.setup_timeout_ms = n;
        }
        if let Some(n) = parsed(&get, "SQLGRADE_REQUEST_TIMEOUT_MS") {
            cfg.request_timeout_ms = n;
        }
        if let Some(n) = parsed::<usize>(&get, "SQLGRADE_POOL_SIZE") {
            cfg.pool_size = n.max(1);
        }
        if let Some(n) = parsed(&get, "SQLGRADE_MAX_DISPLAY_ROWS") {
            cfg.max_display_rows = n;
        }
        if let Some(n) = parsed(&get, "SQLGRADE_MAX_RESULT_ROWS") {
            cfg.max_result_rows = n;
        }
        if let Some(n) = parsed(&get, "SQLGRADE_MAX_MSG_BYTES") {
            cfg.max_msg_bytes = n;
        }
        if let Some(n) = parsed(&get, "SQLGRADE_CACHE_ENTRIES") {
            cfg.cache_entries = n;
        }
        if let Some(v) = get("SQLGRADE_ALLOW_ADMIN") {
            cfg.allow_admin = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Some(v) = get("SQLGRADE_LOG") {
            cfg.log_level = v;
        }
        if let Some(v) = get("SQLGRADE_CONFIG") {
            cfg.config_file = Some(PathBuf::from(v));
        }
        cfg
    }

    /// Takes the query guard and the default comparison policy from a
    /// loaded config file. Everything else stays as the environment set it.
    pub fn with_file_settings(mut self, file: &GradeConfig) -> Self {
        self.guard = file.settings.guard.clone();
        self.comparison = file.settings.comparison;
        self
    }

    pub fn executor(&self) -> ExecutorSettings {
        ExecutorSettings {
            timeout_ms: self.timeout_ms,
            setup_timeout_ms: self.setup_timeout_ms,
            max_result_rows: self.max_result_rows,
        }
    }
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|v| v.trim().parse().ok())
}
