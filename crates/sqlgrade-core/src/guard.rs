//! Screening of user submissions before they reach a sandbox.

use crate::errors::GradeError;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_QUERY_LEN: usize = 5000;

const BLOCKED_KEYWORDS: &[&str] = &[
    // ddl / dml
    "DROP", "CREATE", "ALTER", "TRUNCATE", "RENAME", "INSERT", "UPDATE", "DELETE", "MERGE",
    "UPSERT",
    // dcl
    "GRANT", "REVOKE", "DENY",
    // transactions
    "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE",
    // system and engine commands
    "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX", "ANALYZE", "USE", "SET", "RESET", "FLUSH",
    "KILL", "SHUTDOWN", "SHOW", "DESCRIBE", "CALL", "EXEC", "EXECUTE", "DECLARE", "HANDLER",
    // file and timing attacks
    "LOAD", "LOAD_FILE", "OUTFILE", "DUMPFILE", "INFILE", "SLEEP", "BENCHMARK", "WAITFOR",
    "PG_SLEEP",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_len")]
    pub max_query_len: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_len() -> usize {
    DEFAULT_MAX_QUERY_LEN
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_query_len: DEFAULT_MAX_QUERY_LEN,
        }
    }
}

pub struct QueryGuard {
    settings: GuardSettings,
    keywords: Regex,
    leading: Regex,
}

impl QueryGuard {
    pub fn new(settings: GuardSettings) -> Self {
        let pattern = format!(r"(?i)\b({})\b", BLOCKED_KEYWORDS.join("|"));
        Self {
            settings,
            keywords: Regex::new(&pattern).expect("static keyword pattern"),
            leading: Regex::new(r"(?i)^\(*\s*(SELECT|WITH)\b").expect("static leading pattern"),
        }
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// Returns the query with comments stripped, or every reason it is refused.
    pub fn check(&self, sql: &str) -> Result<String, GradeError> {
        let code = strip_comments(sql);
        if !self.settings.enabled {
            return Ok(code);
        }

        let mut reasons = Vec::new();
        if code.is_empty() {
            reasons.push("Query must be a non-empty string".to_string());
            return Err(GradeError::QueryRejected { reasons });
        }

        let masked = mask_literals(&code);

        let mut found: Vec<String> = Vec::new();
        for m in self.keywords.find_iter(&masked) {
            let kw = m.as_str().to_ascii_uppercase();
            if !found.contains(&kw) {
                found.push(kw);
            }
        }
        if !found.is_empty() {
            reasons.push(format!("Dangerous keywords not allowed: {}", found.join(", ")));
        }

        let statements = masked
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .count();
        if statements > 1 {
            reasons.push("Multiple SQL statements not allowed".to_string());
        }

        if !self.leading.is_match(&masked) {
            reasons.push("Only SELECT queries are allowed in practice mode".to_string());
        }

        if code.chars().count() > self.settings.max_query_len {
            reasons.push(format!(
                "Query too long (maximum {} characters)",
                self.settings.max_query_len
            ));
        }

        if reasons.is_empty() {
            Ok(code)
        } else {
            tracing::warn!(event = "query_rejected", reasons = ?reasons);
            Err(GradeError::QueryRejected { reasons })
        }
    }
}

impl Default for QueryGuard {
    fn default() -> Self {
        Self::new(GuardSettings::default())
    }
}

/// Removes `--` and `/* */` comments outside quoted text.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(c);
                for n in chars.by_ref() {
                    out.push(n);
                    if n == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out.trim().to_string()
}

/// Blanks out string literal contents so keywords inside them don't count.
/// Quoted identifiers are kept.
fn mask_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_str = false;
    for c in sql.chars() {
        if c == '\'' {
            in_str = !in_str;
            out.push(c);
        } else if in_str {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}
