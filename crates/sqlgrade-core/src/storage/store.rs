use crate::errors::{DataIntegrityError, GradeError};
use crate::model::{
    ComparisonPolicy, Dialect, Problem, ProblemBundle, ProblemRef, ProblemSchema, RowOrder,
};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct ProblemStore {
    pub conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub problems: u64,
    pub schemas: u64,
    pub missing_expected: u64,
    pub last_audit_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditRecord {
    pub problem_id: String,
    pub dialect: Dialect,
    pub status: String,
    pub message: Option<String>,
    pub repaired: bool,
    pub audited_at: String,
}

const PROBLEM_COLUMNS: &str =
    "id, numeric_id, slug, title, difficulty, category, description, row_order, numeric_tolerance";

const SCHEMA_COLUMNS: &str = "problem_id, sql_dialect, setup_sql, sample_data, solution_sql, \
     expected_output, expected_fingerprint, inputs_fingerprint";

impl ProblemStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let conn = Connection::open(path).context("failed to open problem store")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory problem store")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("problem store lock poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    pub fn upsert_problem(&self, p: &Problem) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let (order, tolerance) = match &p.comparison {
            Some(c) => (Some(c.order.as_str()), c.numeric_tolerance),
            None => (None, None),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO problems (id, numeric_id, slug, title, difficulty, category, description,
                                   row_order, numeric_tolerance, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(id) DO UPDATE SET
               numeric_id = excluded.numeric_id,
               slug = excluded.slug,
               title = excluded.title,
               difficulty = excluded.difficulty,
               category = excluded.category,
               description = excluded.description,
               row_order = excluded.row_order,
               numeric_tolerance = excluded.numeric_tolerance,
               updated_at = excluded.updated_at",
            params![
                p.id,
                p.numeric_id,
                p.slug,
                p.title,
                p.difficulty,
                p.category,
                p.description,
                order,
                tolerance,
                now
            ],
        )
        .with_context(|| format!("failed to upsert problem {}", p.id))?;
        Ok(())
    }

    /// Inserts or updates a schema. An incoming schema without expected
    /// output keeps whatever output is already stored.
    pub fn upsert_schema(&self, s: &ProblemSchema) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO problem_schemas (problem_id, sql_dialect, setup_sql, sample_data, solution_sql,
                                         expected_output, expected_fingerprint, inputs_fingerprint, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(problem_id, sql_dialect) DO UPDATE SET
               setup_sql = excluded.setup_sql,
               sample_data = excluded.sample_data,
               solution_sql = excluded.solution_sql,
               expected_output = COALESCE(excluded.expected_output, problem_schemas.expected_output),
               expected_fingerprint = COALESCE(excluded.expected_fingerprint, problem_schemas.expected_fingerprint),
               inputs_fingerprint = COALESCE(excluded.inputs_fingerprint, problem_schemas.inputs_fingerprint),
               updated_at = excluded.updated_at",
            params![
                s.problem_id,
                s.dialect.as_str(),
                s.setup_sql,
                s.sample_data,
                s.solution_sql,
                s.expected_output,
                s.expected_fingerprint,
                s.inputs_fingerprint,
                now
            ],
        )
        .with_context(|| format!("failed to upsert {} schema for {}", s.dialect, s.problem_id))?;
        Ok(())
    }

    pub fn find_problem(&self, r: &ProblemRef) -> anyhow::Result<Option<Problem>> {
        let conn = self.lock()?;
        let sql = match r {
            ProblemRef::Id(_) => format!(
                "SELECT {} FROM problems WHERE id = ?1 OR slug = ?1 LIMIT 1",
                PROBLEM_COLUMNS
            ),
            ProblemRef::Numeric(_) => format!(
                "SELECT {} FROM problems WHERE numeric_id = ?1 LIMIT 1",
                PROBLEM_COLUMNS
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let found = match r {
            ProblemRef::Id(s) => stmt.query_row([s], problem_from_row).optional()?,
            ProblemRef::Numeric(n) => stmt.query_row([n], problem_from_row).optional()?,
        };
        Ok(found)
    }

    pub fn get_schema(
        &self,
        problem_id: &str,
        dialect: Dialect,
    ) -> anyhow::Result<Option<ProblemSchema>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM problem_schemas WHERE problem_id = ?1 AND sql_dialect = ?2",
                    SCHEMA_COLUMNS
                ),
                params![problem_id, dialect.as_str()],
                schema_from_row,
            )
            .optional()?;
        raw.map(RawSchema::into_schema).transpose()
    }

    /// Resolves a reference and dialect into everything needed for grading.
    pub fn load_bundle(
        &self,
        r: &ProblemRef,
        dialect: Dialect,
    ) -> Result<ProblemBundle, GradeError> {
        let storage = |e: anyhow::Error| GradeError::Storage(format!("{:#}", e));
        let problem = self
            .find_problem(r)
            .map_err(storage)?
            .ok_or_else(|| DataIntegrityError::ProblemNotFound {
                problem: r.to_string(),
            })?;
        let schema = self
            .get_schema(&problem.id, dialect)
            .map_err(storage)?
            .ok_or_else(|| DataIntegrityError::SchemaNotFound {
                problem: problem.id.clone(),
                dialect,
            })?;
        Ok(ProblemBundle { problem, schema })
    }

    /// Every (problem, schema) pair, optionally restricted to one dialect.
    pub fn list_bundles(&self, dialect: Option<Dialect>) -> anyhow::Result<Vec<ProblemBundle>> {
        let conn = self.lock()?;
        let prefixed: Vec<String> = PROBLEM_COLUMNS
            .split(", ")
            .map(|c| format!("p.{}", c))
            .chain(SCHEMA_COLUMNS.split(", ").map(|c| format!("s.{}", c.trim())))
            .collect();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM problem_schemas s JOIN problems p ON p.id = s.problem_id
             WHERE ?1 IS NULL OR s.sql_dialect = ?1
             ORDER BY p.numeric_id IS NULL, p.numeric_id, p.id, s.sql_dialect",
            prefixed.join(", ")
        ))?;
        let rows = stmt.query_map([dialect.map(|d| d.as_str())], |row| {
            Ok((problem_from_row(row)?, schema_from_offset(row, 9)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (problem, raw) = r?;
            out.push(ProblemBundle {
                problem,
                schema: raw.into_schema()?,
            });
        }
        Ok(out)
    }

    pub fn save_expected(
        &self,
        problem_id: &str,
        dialect: Dialect,
        expected_json: &str,
        fingerprint: &str,
        inputs_fingerprint: &str,
    ) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE problem_schemas
                SET expected_output = ?3, expected_fingerprint = ?4, inputs_fingerprint = ?5, updated_at = ?6
              WHERE problem_id = ?1 AND sql_dialect = ?2",
            params![problem_id, dialect.as_str(), expected_json, fingerprint, inputs_fingerprint, now],
        )?;
        if n == 0 {
            anyhow::bail!("no {} schema for problem {}", dialect, problem_id);
        }
        Ok(())
    }

    pub fn record_audit(&self, rec: &AuditRecord) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO audit_results (problem_id, sql_dialect, status, message, repaired, audited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rec.problem_id,
                rec.dialect.as_str(),
                rec.status,
                rec.message,
                rec.repaired as i64,
                rec.audited_at
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_audits(&self, limit: u32) -> anyhow::Result<Vec<AuditRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT problem_id, sql_dialect, status, message, repaired, audited_at
               FROM audit_results ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (problem_id, dialect, status, message, repaired, audited_at) = r?;
            out.push(AuditRecord {
                problem_id,
                dialect: parse_dialect(&dialect)?,
                status,
                message,
                repaired: repaired != 0,
                audited_at,
            });
        }
        Ok(out)
    }

    pub fn stats(&self) -> anyhow::Result<StoreStats> {
        let conn = self.lock()?;
        let count = |sql: &str| -> anyhow::Result<u64> {
            let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreStats {
            problems: count("SELECT COUNT(*) FROM problems")?,
            schemas: count("SELECT COUNT(*) FROM problem_schemas")?,
            missing_expected: count(
                "SELECT COUNT(*) FROM problem_schemas WHERE expected_output IS NULL OR TRIM(expected_output) = ''",
            )?,
            last_audit_at: conn
                .query_row("SELECT MAX(audited_at) FROM audit_results", [], |r| r.get(0))
                .optional()?
                .flatten(),
        })
    }
}

fn problem_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Problem> {
    let order: Option<String> = row.get(7)?;
    let tolerance: Option<f64> = row.get(8)?;
    let comparison = match (order, tolerance) {
        (None, None) => None,
        (order, numeric_tolerance) => Some(ComparisonPolicy {
            order: order.as_deref().map(RowOrder::parse).unwrap_or_default(),
            numeric_tolerance,
        }),
    };
    Ok(Problem {
        id: row.get(0)?,
        numeric_id: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        difficulty: row.get(4)?,
        category: row.get(5)?,
        description: row.get(6)?,
        comparison,
    })
}

struct RawSchema {
    problem_id: String,
    dialect: String,
    setup_sql: String,
    sample_data: Option<String>,
    solution_sql: String,
    expected_output: Option<String>,
    expected_fingerprint: Option<String>,
    inputs_fingerprint: Option<String>,
}

impl RawSchema {
    fn into_schema(self) -> anyhow::Result<ProblemSchema> {
        Ok(ProblemSchema {
            dialect: parse_dialect(&self.dialect)?,
            problem_id: self.problem_id,
            setup_sql: self.setup_sql,
            sample_data: self.sample_data,
            solution_sql: self.solution_sql,
            expected_output: self.expected_output,
            expected_fingerprint: self.expected_fingerprint,
            inputs_fingerprint: self.inputs_fingerprint,
        })
    }
}

fn schema_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSchema> {
    schema_from_offset(row, 0)
}

fn schema_from_offset(row: &rusqlite::Row<'_>, at: usize) -> rusqlite::Result<RawSchema> {
    Ok(RawSchema {
        problem_id: row.get(at)?,
        dialect: row.get(at + 1)?,
        setup_sql: row.get(at + 2)?,
        sample_data: row.get(at + 3)?,
        solution_sql: row.get(at + 4)?,
        expected_output: row.get(at + 5)?,
        expected_fingerprint: row.get(at + 6)?,
        inputs_fingerprint: row.get(at + 7)?,
    })
}

fn parse_dialect(s: &str) -> anyhow::Result<Dialect> {
    s.parse::<Dialect>().map_err(|e| anyhow::anyhow!(e))
}
