use super::{EngineError, EngineErrorKind, Interrupter, SandboxEngine, TableStats};
use crate::model::{ColumnMeta, ColumnType, QueryResult, ResultRow, Value};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};
use std::sync::Arc;
use std::time::Instant;

/// A namespace backed by a private in-memory SQLite database. Two engines
/// never share storage, so concurrent sessions cannot see each other's rows.
pub struct SqliteEngine {
    name: String,
    conn: Connection,
}

impl SqliteEngine {
    pub fn open(name: &str) -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(map_err)?;
        Ok(Self {
            name: name.to_string(),
            conn,
        })
    }

    fn user_objects(&self, kinds: &str) -> Result<Vec<(String, String)>, EngineError> {
        let sql = format!(
            "SELECT type, name FROM sqlite_master WHERE type IN ({}) AND name NOT LIKE 'sqlite_%' ORDER BY name",
            kinds
        );
        let mut stmt = self.conn.prepare(&sql).map_err(map_err)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(map_err)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(map_err)?);
        }
        Ok(out)
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, EngineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(map_err)?;
        let rows = stmt
            .query_map([table], |r| r.get::<_, String>(0))
            .map_err(map_err)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(map_err)?);
        }
        Ok(out)
    }
}

impl SandboxEngine for SqliteEngine {
    fn namespace(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK;").map_err(map_err)?;
        }
        self.conn
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .map_err(map_err)?;
        // views and triggers first; indexes go with their tables
        for kinds in ["'view', 'trigger'", "'table'"] {
            for (kind, name) in self.user_objects(kinds)? {
                let sql = format!(
                    "DROP {} IF EXISTS {}",
                    kind.to_ascii_uppercase(),
                    quote_ident(&name)
                );
                self.conn.execute_batch(&sql).map_err(map_err)?;
            }
        }
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(map_err)?;
        Ok(())
    }

    fn apply(&mut self, statements: &[String]) -> Result<(), (usize, EngineError)> {
        let tx = self.conn.transaction().map_err(|e| (0, map_err(e)))?;
        for (i, stmt) in statements.iter().enumerate() {
            tx.execute_batch(stmt).map_err(|e| (i, map_err(e)))?;
        }
        tx.commit().map_err(|e| (statements.len().saturating_sub(1), map_err(e)))
    }

    fn table_stats(&mut self) -> Result<Vec<TableStats>, EngineError> {
        let mut out = Vec::new();
        for (_, name) in self.user_objects("'table'")? {
            let rows: i64 = self
                .conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_ident(&name)),
                    [],
                    |r| r.get(0),
                )
                .map_err(map_err)?;
            let columns = self.table_columns(&name)?;
            out.push(TableStats {
                name,
                rows: rows.max(0) as u64,
                columns,
            });
        }
        Ok(out)
    }

    fn query(&mut self, sql: &str, max_rows: usize) -> Result<QueryResult, EngineError> {
        let start = Instant::now();
        let mut stmt = self.conn.prepare(sql).map_err(map_err)?;
        let mut columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|c| ColumnMeta::new(c.name(), c.decl_type().map(str::to_string)))
            .collect();
        let width = columns.len();

        let mut raw: Vec<Vec<Value>> = Vec::new();
        let mut rows = stmt.query([]).map_err(map_err)?;
        while let Some(row) = rows.next().map_err(map_err)? {
            if raw.len() >= max_rows {
                return Err(EngineError {
                    kind: EngineErrorKind::TooManyRows,
                    message: format!("query returned more than {} rows", max_rows),
                });
            }
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(value_from_ref(row.get_ref(i).map_err(map_err)?));
            }
            raw.push(values);
        }

        infer_untyped(&mut columns, &raw);
        let columns = Arc::new(columns);
        let rows = raw
            .into_iter()
            .map(|values| ResultRow::new(columns.clone(), values))
            .collect();

        Ok(QueryResult {
            columns,
            rows,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn interrupter(&self) -> Interrupter {
        let handle = self.conn.get_interrupt_handle();
        Interrupter::new(move || handle.interrupt())
    }
}

fn value_from_ref(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Expression columns (aggregates, arithmetic) carry no declared type; take
/// it from the storage classes actually returned.
fn infer_untyped(columns: &mut [ColumnMeta], rows: &[Vec<Value>]) {
    for (i, col) in columns.iter_mut().enumerate() {
        if col.ty != ColumnType::Unknown {
            continue;
        }
        let mut inferred = ColumnType::Unknown;
        for row in rows {
            let next = match row.get(i) {
                Some(Value::Integer(_)) => ColumnType::Integer,
                Some(Value::Real(_)) => ColumnType::Float,
                Some(Value::Text(_)) => ColumnType::Text,
                Some(Value::Blob(_)) => ColumnType::Blob,
                _ => continue,
            };
            inferred = match (inferred, next) {
                (ColumnType::Unknown, n) => n,
                (ColumnType::Integer, ColumnType::Float) | (ColumnType::Float, ColumnType::Integer) => {
                    ColumnType::Float
                }
                (a, b) if a == b => a,
                _ => ColumnType::Text,
            };
        }
        col.ty = inferred;
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn map_err(e: rusqlite::Error) -> EngineError {
    let kind = if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
        EngineErrorKind::Interrupted
    } else {
        EngineErrorKind::Other
    };
    // prepare errors carry the statement and offset; keep the engine's own text
    let message = match &e {
        rusqlite::Error::SqlInputError { msg, .. } => msg.clone(),
        other => other.to_string(),
    };
    EngineError { kind, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteEngine {
        let mut e = SqliteEngine::open("t").unwrap();
        e.apply(&[
            "CREATE TABLE customers (id INT, name TEXT, balance DECIMAL(10,2))".to_string(),
            "INSERT INTO customers VALUES (1, 'John', 12.5), (2, 'Jane', NULL)".to_string(),
        ])
        .unwrap();
        e
    }

    #[test]
    fn query_reports_declared_types() {
        let mut e = seeded();
        let r = e
            .query("SELECT id, name, balance, COUNT(*) OVER () AS n FROM customers ORDER BY id", 100)
            .unwrap();
        assert_eq!(r.row_count(), 2);
        assert_eq!(r.columns[0].ty, ColumnType::Integer);
        assert_eq!(r.columns[2].ty, ColumnType::Decimal { scale: Some(2) });
        assert_eq!(r.columns[3].ty, ColumnType::Integer);
        assert_eq!(r.rows[1].get("balance"), Some(&Value::Null));
    }

    #[test]
    fn failed_apply_rolls_back_and_reports_index() {
        let mut e = SqliteEngine::open("t").unwrap();
        let err = e
            .apply(&[
                "CREATE TABLE a (x INT)".to_string(),
                "INSERT INTO missing VALUES (1)".to_string(),
            ])
            .unwrap_err();
        assert_eq!(err.0, 1);
        assert!(err.1.message.contains("no such table"));
        assert!(e.table_stats().unwrap().is_empty());
    }

    #[test]
    fn reset_drops_everything() {
        let mut e = seeded();
        e.apply(&["CREATE VIEW v AS SELECT * FROM customers".to_string()])
            .unwrap();
        e.reset().unwrap();
        assert!(e.table_stats().unwrap().is_empty());
        assert!(e.query("SELECT * FROM v", 10).is_err());
    }

    #[test]
    fn row_cap_is_enforced() {
        let mut e = seeded();
        let err = e.query("SELECT * FROM customers", 1).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::TooManyRows);
    }

    #[test]
    fn mixed_numeric_expression_becomes_float() {
        let mut cols = vec![ColumnMeta::new("x", None)];
        infer_untyped(
            &mut cols,
            &[vec![Value::Integer(1)], vec![Value::Real(1.5)], vec![Value::Null]],
        );
        assert_eq!(cols[0].ty, ColumnType::Float);
    }
}
