pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS problems (
  id                TEXT PRIMARY KEY,
  numeric_id        INTEGER UNIQUE,
  slug              TEXT NOT NULL UNIQUE,
  title             TEXT NOT NULL,
  difficulty        TEXT NOT NULL DEFAULT 'easy',
  category          TEXT,
  description       TEXT NOT NULL DEFAULT '',
  row_order         TEXT,
  numeric_tolerance REAL,
  created_at        TEXT NOT NULL,
  updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS problem_schemas (
  problem_id           TEXT NOT NULL REFERENCES problems(id) ON DELETE CASCADE,
  sql_dialect          TEXT NOT NULL,
  setup_sql            TEXT NOT NULL,
  sample_data          TEXT,
  solution_sql         TEXT NOT NULL,
  expected_output      TEXT,
  expected_fingerprint TEXT,
  inputs_fingerprint   TEXT,
  updated_at           TEXT NOT NULL,
  PRIMARY KEY (problem_id, sql_dialect)
);

CREATE TABLE IF NOT EXISTS audit_results (
  id          INTEGER PRIMARY KEY AUTOINCREMENT,
  problem_id  TEXT NOT NULL,
  sql_dialect TEXT NOT NULL,
  status      TEXT NOT NULL,
  message     TEXT,
  repaired    INTEGER NOT NULL DEFAULT 0,
  audited_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_problem ON audit_results(problem_id, sql_dialect);
"#;
