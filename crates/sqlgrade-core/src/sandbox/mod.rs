//! Isolated namespaces for running one setup + query cycle.
//!
//! A [`SandboxEngine`] is a single database namespace. Engines are blocking
//! and are driven from `spawn_blocking` by the executor; the only thing that
//! crosses threads while a statement runs is the [`Interrupter`].

pub mod pool;
pub mod split;
pub mod sqlite;

use crate::model::QueryResult;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub use pool::{SandboxLease, SandboxPool};
pub use sqlite::SqliteEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    Interrupted,
    TooManyRows,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Other,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

/// Cancels whatever statement the owning engine is running.
#[derive(Clone)]
pub struct Interrupter(Arc<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn fire(&self) {
        (self.0)()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableStats {
    pub name: String,
    pub rows: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub namespace: String,
    pub statements: usize,
    pub tables: Vec<TableStats>,
    pub elapsed_ms: u64,
}

impl SetupReport {
    pub fn seeded_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    /// Table and column names in the namespace, for "did you mean" hints.
    pub fn known_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for t in &self.tables {
            names.push(t.name.clone());
            names.extend(t.columns.iter().cloned());
        }
        names.sort();
        names.dedup();
        names
    }
}

pub trait SandboxEngine: Send {
    fn namespace(&self) -> &str;

    /// Drops every user object in the namespace.
    fn reset(&mut self) -> Result<(), EngineError>;

    /// Runs `statements` in one transaction. On failure nothing is kept and
    /// the zero-based index of the failing statement is returned.
    fn apply(&mut self, statements: &[String]) -> Result<(), (usize, EngineError)>;

    fn table_stats(&mut self) -> Result<Vec<TableStats>, EngineError>;

    /// Runs one statement and collects at most `max_rows` rows.
    fn query(&mut self, sql: &str, max_rows: usize) -> Result<QueryResult, EngineError>;

    fn interrupter(&self) -> Interrupter;
}
