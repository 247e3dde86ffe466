use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    #[serde(alias = "postgres")]
    Postgresql,
    Mysql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgresql => "postgresql",
            Dialect::Mysql => "mysql",
        }
    }

    /// strftime pattern for timestamp columns. Postgres keeps fractional
    /// seconds when present, MySQL DATETIME truncates to whole seconds.
    pub fn timestamp_format(&self) -> &'static str {
        match self {
            Dialect::Postgresql => "%Y-%m-%d %H:%M:%S%.f",
            Dialect::Mysql => "%Y-%m-%d %H:%M:%S",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Dialect::Postgresql),
            "mysql" => Ok(Dialect::Mysql),
            other => Err(format!(
                "unsupported dialect '{}' (expected postgresql|mysql)",
                other
            )),
        }
    }
}

/// How a problem is looked up: string id / slug, or the catalog's numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProblemRef {
    Id(String),
    Numeric(i64),
}

impl ProblemRef {
    pub fn parse(s: &str) -> Self {
        let t = s.trim();
        match t.parse::<i64>() {
            Ok(n) => ProblemRef::Numeric(n),
            Err(_) => ProblemRef::Id(t.to_string()),
        }
    }
}

impl fmt::Display for ProblemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemRef::Id(s) => f.write_str(s),
            ProblemRef::Numeric(n) => write!(f, "#{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RowOrder {
    #[default]
    Ordered,
    Unordered,
}

impl RowOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOrder::Ordered => "ordered",
            RowOrder::Unordered => "unordered",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "unordered" => RowOrder::Unordered,
            _ => RowOrder::Ordered,
        }
    }
}

/// Equality policy for one problem. Default is ordered, exact string match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ComparisonPolicy {
    #[serde(default)]
    pub order: RowOrder,
    /// Absolute epsilon for numeric cells. `None` keeps exact string equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_tolerance: Option<f64>,
}

impl ComparisonPolicy {
    pub fn unordered() -> Self {
        Self {
            order: RowOrder::Unordered,
            numeric_tolerance: None,
        }
    }

    pub fn with_tolerance(mut self, eps: f64) -> Self {
        self.numeric_tolerance = Some(eps);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Problem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_id: Option<i64>,
    pub slug: String,
    pub title: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonPolicy>,
}

fn default_difficulty() -> String {
    "easy".to_string()
}

/// One (problem, dialect) variant of a problem's data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemSchema {
    pub problem_id: String,
    pub dialect: Dialect,
    pub setup_sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<String>,
    pub solution_sql: String,
    /// Canonical JSON text (array of objects) or `None` if never generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_fingerprint: Option<String>,
    /// Fingerprint of setup, seed and solution SQL at generation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_fingerprint: Option<String>,
}

impl ProblemSchema {
    pub fn inputs_fingerprint_now(&self) -> String {
        crate::fingerprint::compute_inputs(crate::fingerprint::Context {
            problem_id: &self.problem_id,
            dialect: self.dialect.as_str(),
            setup_sql: &self.setup_sql,
            sample_data: self.sample_data.as_deref(),
            solution_sql: &self.solution_sql,
        })
    }
}

/// A problem together with the schema variant selected for a request.
#[derive(Debug, Clone)]
pub struct ProblemBundle {
    pub problem: Problem,
    pub schema: ProblemSchema,
}

impl ProblemBundle {
    pub fn policy(&self, fallback: ComparisonPolicy) -> ComparisonPolicy {
        self.problem.comparison.unwrap_or(fallback)
    }
}

/// Declared column type, resolved from the engine's column metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ColumnType {
    Integer,
    Decimal { scale: Option<u32> },
    Float,
    Text,
    Boolean,
    Date,
    Timestamp,
    Blob,
    Unknown,
}

impl ColumnType {
    pub fn from_decl(decl: Option<&str>) -> Self {
        let Some(decl) = decl else {
            return ColumnType::Unknown;
        };
        let upper = decl.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();

        if base.is_empty() {
            ColumnType::Unknown
        } else if base.contains("BOOL") {
            ColumnType::Boolean
        } else if base.contains("TIMESTAMP") || base.contains("DATETIME") {
            ColumnType::Timestamp
        } else if base == "DATE" {
            ColumnType::Date
        } else if base.contains("DECIMAL") || base.contains("NUMERIC") || base == "MONEY" {
            ColumnType::Decimal {
                scale: parse_scale(&upper),
            }
        } else if base.contains("INT") || base.contains("SERIAL") {
            ColumnType::Integer
        } else if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
            ColumnType::Text
        } else if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") {
            ColumnType::Float
        } else if base.contains("BLOB") || base.contains("BYTEA") {
            ColumnType::Blob
        } else {
            ColumnType::Unknown
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Decimal { .. } | ColumnType::Float
        )
    }
}

/// `NUMERIC(p,s)` -> s, `NUMERIC(p)` -> 0, bare `NUMERIC` -> unconstrained.
fn parse_scale(upper: &str) -> Option<u32> {
    let open = upper.find('(')?;
    let close = upper[open..].find(')')? + open;
    let args: Vec<&str> = upper[open + 1..close].split(',').map(str::trim).collect();
    match args.as_slice() {
        [_p] => Some(0),
        [_p, s] => s.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decl_type: Option<String>,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, decl_type: Option<String>) -> Self {
        let ty = ColumnType::from_decl(decl_type.as_deref());
        Self {
            name: name.into(),
            decl_type,
            ty,
        }
    }
}

/// A cell value as returned by the engine, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Display form for API responses (not used for comparison).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::json!(i),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(b) => serde_json::Value::String(format!("\\x{}", hex::encode(b))),
        }
    }
}

/// One result row: values carried alongside the column metadata of the
/// statement that produced them, so consumers never guess the row shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    columns: Arc<Vec<ColumnMeta>>,
    values: Vec<Value>,
}

impl ResultRow {
    pub fn new(columns: Arc<Vec<ColumnMeta>>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnMeta, &Value)> {
        self.columns.iter().zip(self.values.iter())
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (c, v) in self.iter() {
            map.insert(c.name.clone(), v.to_json());
        }
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Arc<Vec<ColumnMeta>>,
    pub rows: Vec<ResultRow>,
    pub elapsed_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Renames repeated column names (`id`, `id` -> `id`, `id_2`) so every
    /// row serializes to an object without colliding keys. A suffix already
    /// taken by another column is skipped.
    pub fn with_unique_column_names(self) -> Self {
        let names = unique_names(self.columns.iter().map(|c| c.name.as_str()));
        if names.iter().zip(self.columns.iter()).all(|(n, c)| *n == c.name) {
            return self;
        }
        let columns: Arc<Vec<ColumnMeta>> = Arc::new(
            self.columns
                .iter()
                .zip(names)
                .map(|(c, name)| ColumnMeta { name, ..c.clone() })
                .collect(),
        );
        let rows = self
            .rows
            .into_iter()
            .map(|r| ResultRow::new(columns.clone(), r.values))
            .collect();
        Self {
            columns,
            rows,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

fn unique_names<'a>(names: impl Iterator<Item = &'a str> + Clone) -> Vec<String> {
    let mut taken: HashSet<String> = names.clone().map(str::to_string).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        if seen.insert(name) {
            out.push(name.to_string());
            continue;
        }
        let mut n = 2;
        let renamed = loop {
            let candidate = format!("{}_{}", name, n);
            if !taken.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        taken.insert(renamed.clone());
        out.push(renamed);
    }
    out
}
