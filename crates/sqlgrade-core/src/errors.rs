use crate::model::Dialect;

/// Failure while preparing a sandbox namespace from a problem's setup script.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("setup statement {index} failed: {message} (near: {excerpt})")]
    Statement {
        index: usize,
        excerpt: String,
        message: String,
    },
    #[error("setup produced no seeded rows (tables: {})", fmt_tables(.tables))]
    EmptySeed { tables: Vec<String> },
    #[error("setup exceeded the {limit_ms}ms time limit")]
    Timeout { limit_ms: u64 },
    #[error("sandbox reset failed: {0}")]
    Reset(String),
}

fn fmt_tables(tables: &[String]) -> String {
    if tables.is_empty() {
        "none".to_string()
    } else {
        tables.join(", ")
    }
}

/// Stored problem data that cannot be used for grading. Admin-facing only.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DataIntegrityError {
    #[error("problem {problem} not found")]
    ProblemNotFound { problem: String },
    #[error("problem {problem} has no {dialect} schema")]
    SchemaNotFound { problem: String, dialect: Dialect },
    #[error("problem {problem} has no expected output")]
    MissingExpected { problem: String },
    #[error("expected output for problem {problem} is empty")]
    EmptyExpected { problem: String },
    #[error("expected output for problem {problem} is malformed: {reason}")]
    Malformed { problem: String, reason: String },
    #[error("solution for problem {problem} returned zero rows; fix the seed data or the solution")]
    EmptySolution { problem: String },
}

/// The grading taxonomy. Every database failure is translated into one of
/// these at the executor boundary; the comparator never sees a raw error.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("{message}")]
    QuerySyntax { message: String },
    #[error("query exceeded the {limit_ms}ms time limit")]
    Timeout { limit_ms: u64 },
    #[error("query returned more than {limit} rows")]
    ResultTooLarge { limit: usize },
    #[error("query not allowed: {}", .reasons.join(", "))]
    QueryRejected { reasons: Vec<String> },
    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),
    #[error("sandbox failure: {0}")]
    Sandbox(String),
    #[error("problem store failure: {0}")]
    Storage(String),
}

impl GradeError {
    /// Stable machine-readable category.
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::Setup(_) => "E_SETUP",
            GradeError::QuerySyntax { .. } => "E_QUERY",
            GradeError::Timeout { .. } => "E_TIMEOUT",
            GradeError::ResultTooLarge { .. } => "E_RESULT_TOO_LARGE",
            GradeError::QueryRejected { .. } => "E_REJECTED",
            GradeError::DataIntegrity(_) => "E_DATA_INTEGRITY",
            GradeError::Sandbox(_) => "E_SANDBOX",
            GradeError::Storage(_) => "E_STORAGE",
        }
    }

    /// Text safe to show an end user. Engine messages for query failures are
    /// passed through verbatim; data problems are never blamed on the user.
    pub fn user_message(&self) -> String {
        match self {
            GradeError::QuerySyntax { message } => message.clone(),
            GradeError::Timeout { limit_ms } => format!(
                "Query took longer than {:.1}s and was cancelled.",
                *limit_ms as f64 / 1000.0
            ),
            GradeError::ResultTooLarge { limit } => format!(
                "Query returned more than {} rows. Add a WHERE clause or LIMIT.",
                limit
            ),
            GradeError::QueryRejected { .. } => "Query not allowed".to_string(),
            GradeError::Setup(e) => format!("Problem environment could not be prepared: {}", e),
            GradeError::DataIntegrity(DataIntegrityError::ProblemNotFound { .. }) => {
                "Problem not found".to_string()
            }
            GradeError::DataIntegrity(_) => {
                "This problem is temporarily unavailable for validation.".to_string()
            }
            GradeError::Sandbox(_) => "Failed to execute SQL query".to_string(),
            GradeError::Storage(_) => "Failed to load problem".to_string(),
        }
    }

    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            GradeError::DataIntegrity(_) | GradeError::Sandbox(_) | GradeError::Storage(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ConfigError(pub String);
