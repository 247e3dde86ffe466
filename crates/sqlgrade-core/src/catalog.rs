//! YAML problem catalogs.

use crate::errors::ConfigError;
use crate::expected::ExpectedOutput;
use crate::model::{ComparisonPolicy, Dialect, Problem, ProblemSchema};
use crate::storage::ProblemStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Catalog {
    #[serde(default)]
    pub problems: Vec<CatalogProblem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogProblem {
    pub id: String,
    #[serde(default)]
    pub numeric_id: Option<i64>,
    #[serde(default)]
    pub slug: Option<String>,
    pub title: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub comparison: Option<ComparisonPolicy>,
    #[serde(default)]
    pub schemas: Vec<CatalogSchema>,
}

fn default_difficulty() -> String {
    "easy".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogSchema {
    #[serde(default)]
    pub dialect: Dialect,
    pub setup_sql: String,
    #[serde(default)]
    pub sample_data: Option<String>,
    pub solution_sql: String,
    /// JSON text or an inline YAML list of row maps.
    #[serde(default)]
    pub expected_output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub problems: usize,
    pub schemas: usize,
    pub with_expected: usize,
}

pub fn load_catalog(path: &Path, strict: bool) -> Result<Catalog, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read catalog {}: {}", path.display(), e)))?;
    parse_catalog(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e, path.display())))
}

pub fn parse_catalog(raw: &str, strict: bool) -> Result<Catalog, ConfigError> {
    let mut ignored = Vec::new();
    let de = serde_yaml::Deserializer::from_str(raw);
    let catalog: Catalog = serde_ignored::deserialize(de, |path| ignored.push(path.to_string()))
        .map_err(|e| ConfigError(format!("failed to parse catalog YAML: {}", e)))?;

    if !ignored.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?}",
                ignored
            )));
        }
        tracing::warn!(event = "catalog_unknown_fields", fields = ?ignored);
    }
    validate(&catalog)?;
    Ok(catalog)
}

fn validate(catalog: &Catalog) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();
    let mut numeric = HashSet::new();
    for p in &catalog.problems {
        if p.id.trim().is_empty() {
            return Err(ConfigError("problem with empty id".into()));
        }
        if !ids.insert(p.id.as_str()) {
            return Err(ConfigError(format!("duplicate problem id '{}'", p.id)));
        }
        if let Some(n) = p.numeric_id {
            if !numeric.insert(n) {
                return Err(ConfigError(format!("duplicate numeric_id {} ('{}')", n, p.id)));
            }
        }
        if p.title.trim().is_empty() {
            return Err(ConfigError(format!("problem '{}' has no title", p.id)));
        }
        let mut dialects = HashSet::new();
        for s in &p.schemas {
            if !dialects.insert(s.dialect) {
                return Err(ConfigError(format!(
                    "problem '{}' declares the {} schema twice",
                    p.id, s.dialect
                )));
            }
            if s.setup_sql.trim().is_empty() || s.solution_sql.trim().is_empty() {
                return Err(ConfigError(format!(
                    "problem '{}' [{}]: setup_sql and solution_sql are required",
                    p.id, s.dialect
                )));
            }
        }
    }
    Ok(())
}

impl CatalogProblem {
    pub fn to_problem(&self) -> Problem {
        Problem {
            id: self.id.clone(),
            numeric_id: self.numeric_id,
            slug: self.slug.clone().unwrap_or_else(|| self.id.clone()),
            title: self.title.clone(),
            difficulty: self.difficulty.clone(),
            category: self.category.clone(),
            description: self.description.clone(),
            comparison: self.comparison,
        }
    }

    /// Schemas ready to store. Authored expected output is validated and
    /// rewritten in canonical form.
    pub fn to_schemas(&self) -> Result<Vec<ProblemSchema>, ConfigError> {
        let mut out = Vec::with_capacity(self.schemas.len());
        for s in &self.schemas {
            let mut schema = ProblemSchema {
                problem_id: self.id.clone(),
                dialect: s.dialect,
                setup_sql: s.setup_sql.clone(),
                sample_data: s.sample_data.clone(),
                solution_sql: s.solution_sql.clone(),
                expected_output: None,
                expected_fingerprint: None,
                inputs_fingerprint: None,
            };
            if let Some(v) = &s.expected_output {
                let raw = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let parsed = ExpectedOutput::parse(&self.id, &raw)
                    .map_err(|e| ConfigError(format!("[{}] {}", s.dialect, e)))?;
                schema.expected_output = Some(parsed.to_canonical_json());
                schema.expected_fingerprint = Some(parsed.fingerprint());
                schema.inputs_fingerprint = Some(schema.inputs_fingerprint_now());
            }
            out.push(schema);
        }
        Ok(out)
    }
}

pub fn import_catalog(store: &ProblemStore, catalog: &Catalog) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    for p in &catalog.problems {
        let schemas = p.to_schemas()?;
        store.upsert_problem(&p.to_problem())?;
        summary.problems += 1;
        for s in &schemas {
            store.upsert_schema(s)?;
            summary.schemas += 1;
            if s.expected_output.is_some() {
                summary.with_expected += 1;
            }
        }
    }
    tracing::info!(
        event = "catalog_imported",
        problems = summary.problems,
        schemas = summary.schemas,
        with_expected = summary.with_expected
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProblemRef;

    const CATALOG: &str = r#"
problems:
  - id: list-customers
    numeric_id: 1
    title: List customers
    comparison:
      order: unordered
    schemas:
      - dialect: postgresql
        setup_sql: |
          CREATE TABLE customers (id INT, name TEXT);
          INSERT INTO customers VALUES (1, 'John');
        solution_sql: SELECT * FROM customers
        expected_output:
          - id: 1
            name: John
      - dialect: mysql
        setup_sql: CREATE TABLE customers (id INT, name TEXT); INSERT INTO customers VALUES (1, 'John');
        solution_sql: SELECT * FROM customers
"#;

    #[test]
    fn parses_and_imports() -> anyhow::Result<()> {
        let catalog = parse_catalog(CATALOG, true)?;
        let store = ProblemStore::memory()?;
        store.init_schema()?;
        let summary = import_catalog(&store, &catalog)?;
        assert_eq!(
            summary,
            ImportSummary {
                problems: 1,
                schemas: 2,
                with_expected: 1
            }
        );

        let bundle = store
            .load_bundle(&ProblemRef::Numeric(1), Dialect::Postgresql)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(bundle.problem.slug, "list-customers");
        assert_eq!(
            bundle.schema.expected_output.as_deref(),
            Some(r#"[{"id":"1","name":"John"}]"#)
        );
        assert_eq!(
            bundle.problem.comparison,
            Some(ComparisonPolicy::unordered())
        );
        Ok(())
    }

    #[test]
    fn strict_mode_reports_unknown_fields() {
        let raw = "problems:\n  - id: a\n    title: A\n    solution: SELECT 1\n";
        let err = parse_catalog(raw, true).unwrap_err();
        assert!(err.0.contains("problems.0.solution"), "{}", err.0);
        assert!(parse_catalog(raw, false).is_ok());
    }

    #[test]
    fn duplicates_are_rejected() {
        let raw = "problems:\n  - id: a\n    title: A\n  - id: a\n    title: B\n";
        assert!(parse_catalog(raw, false).is_err());
    }

    #[test]
    fn legacy_expected_shape_fails_import() {
        let raw = r#"
problems:
  - id: a
    title: A
    schemas:
      - setup_sql: CREATE TABLE t(x INT)
        solution_sql: SELECT x FROM t
        expected_output: "[[1]]"
"#;
        let catalog = parse_catalog(raw, true).unwrap();
        assert!(catalog.problems[0].to_schemas().is_err());
    }
}
