use super::executor::{Executor, Session};
use crate::compare::{compare, Verdict};
use crate::errors::{DataIntegrityError, GradeError};
use crate::expected::ExpectedOutput;
use crate::feedback::{self, Feedback};
use crate::guard::QueryGuard;
use crate::model::{ComparisonPolicy, Dialect, ProblemBundle, ProblemRef, QueryResult};
use crate::normalize::Normalizer;
use crate::sandbox::SetupReport;
use crate::source::ProblemSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub sql: String,
    #[serde(default)]
    pub dialect: Dialect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_numeric_id: Option<i64>,
}

impl SubmitRequest {
    pub fn problem(&self) -> Option<ProblemRef> {
        match (&self.problem_id, self.problem_numeric_id) {
            (Some(id), _) if !id.trim().is_empty() => Some(ProblemRef::Id(id.trim().to_string())),
            (_, Some(n)) => Some(ProblemRef::Numeric(n)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionData {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
    pub execution_time: u64,
    /// `None` when the problem has no usable expected output.
    pub is_correct: Option<bool>,
    pub feedback: String,
    #[serde(skip)]
    pub verdict: Option<Verdict>,
    #[serde(skip)]
    pub integrity: Option<DataIntegrityError>,
}

/// A failed submission: the error plus learner feedback when there is any.
#[derive(Debug)]
pub struct Rejection {
    pub error: GradeError,
    pub feedback: Option<Feedback>,
}

impl From<GradeError> for Rejection {
    fn from(error: GradeError) -> Self {
        Self {
            error,
            feedback: None,
        }
    }
}

/// Wire shape returned to callers of `execute`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ExecuteResponse {
    Ok {
        success: bool,
        data: ExecutionData,
    },
    Err {
        success: bool,
        error: String,
        code: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        feedback: Option<Feedback>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasons: Option<Vec<String>>,
    },
}

impl ExecuteResponse {
    pub fn from_result(result: Result<ExecutionData, Rejection>) -> Self {
        match result {
            Ok(data) => ExecuteResponse::Ok {
                success: true,
                data,
            },
            Err(r) => {
                let reasons = match &r.error {
                    GradeError::QueryRejected { reasons } => Some(reasons.clone()),
                    _ => None,
                };
                ExecuteResponse::Err {
                    success: false,
                    error: r.error.user_message(),
                    code: r.error.code(),
                    feedback: r.feedback,
                    reasons,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GraderSettings {
    pub max_display_rows: usize,
    pub default_policy: ComparisonPolicy,
}

impl Default for GraderSettings {
    fn default() -> Self {
        Self {
            max_display_rows: 1_000,
            default_policy: ComparisonPolicy::default(),
        }
    }
}

/// The submission path: guard, setup, run, normalize, compare.
pub struct Grader {
    executor: Executor,
    source: Arc<dyn ProblemSource>,
    guard: QueryGuard,
    settings: GraderSettings,
}

impl Grader {
    pub fn new(
        executor: Executor,
        source: Arc<dyn ProblemSource>,
        guard: QueryGuard,
        settings: GraderSettings,
    ) -> Self {
        Self {
            executor,
            source,
            guard,
            settings,
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub async fn submit(&self, req: &SubmitRequest) -> Result<ExecutionData, Rejection> {
        let sql = self.guard.check(&req.sql).map_err(|e| {
            let reasons = match &e {
                GradeError::QueryRejected { reasons } => reasons.clone(),
                _ => vec![],
            };
            Rejection {
                feedback: Some(rejected_feedback(&reasons)),
                error: e,
            }
        })?;

        let bundle = match req.problem() {
            Some(r) => Some(self.source.load(&r, req.dialect).await?),
            None => None,
        };

        let mut session = self.executor.session().await?;
        let report = prepare(&mut session, bundle.as_ref()).await?;

        let result = match session.query(&sql).await {
            Ok(r) => r,
            Err(e) => {
                let feedback = match &e {
                    GradeError::QuerySyntax { message } => Some(feedback::explain(
                        message,
                        &sql,
                        &report.as_ref().map(SetupReport::known_names).unwrap_or_default(),
                    )),
                    _ => None,
                };
                tracing::info!(
                    event = "grade_failed",
                    problem = ?bundle.as_ref().map(|b| &b.problem.id),
                    dialect = %req.dialect,
                    code = e.code()
                );
                return Err(Rejection { error: e, feedback });
            }
        };
        drop(session);

        Ok(self.grade(bundle.as_ref(), req.dialect, &sql, result))
    }

    fn grade(
        &self,
        bundle: Option<&ProblemBundle>,
        dialect: Dialect,
        sql: &str,
        result: QueryResult,
    ) -> ExecutionData {
        let total = result.row_count();
        let (verdict, integrity) = match bundle {
            Some(b) => match check_against_expected(b, dialect, &result, self.settings.default_policy) {
                Ok(v) => (Some(v), None),
                Err(e) => {
                    tracing::error!(event = "data_integrity", problem = %b.problem.id, dialect = %dialect, error = %e);
                    (None, Some(e))
                }
            },
            None => (None, None),
        };

        let message = match (&verdict, bundle) {
            (Some(v), _) => v.message.clone(),
            (None, Some(_)) => feedback::unvalidated(total, sql),
            (None, None) => "Query executed successfully".to_string(),
        };

        let shown = total.min(self.settings.max_display_rows);
        tracing::info!(
            event = "grade",
            problem = ?bundle.map(|b| &b.problem.id),
            dialect = %dialect,
            rows = total,
            is_correct = ?verdict.as_ref().map(|v| v.is_correct),
            elapsed_ms = result.elapsed_ms
        );

        ExecutionData {
            columns: result.column_names(),
            rows: result.rows.iter().take(shown).map(|r| r.to_json()).collect(),
            row_count: total,
            execution_time: result.elapsed_ms,
            is_correct: verdict.as_ref().map(|v| v.is_correct),
            feedback: feedback::with_display_note(message, shown, total),
            verdict,
            integrity,
        }
    }

    /// Applies a problem's setup on a fresh namespace and reports what was
    /// seeded. Safe to repeat.
    pub async fn setup_problem(
        &self,
        problem: &ProblemRef,
        dialect: Dialect,
    ) -> Result<SetupReport, GradeError> {
        let bundle = self.source.load(problem, dialect).await?;
        let mut session = self.executor.session().await?;
        session
            .setup(&bundle.schema.setup_sql, bundle.schema.sample_data.as_deref())
            .await
    }
}

async fn prepare(
    session: &mut Session,
    bundle: Option<&ProblemBundle>,
) -> Result<Option<SetupReport>, GradeError> {
    match bundle {
        Some(b) => Ok(Some(
            session
                .setup(&b.schema.setup_sql, b.schema.sample_data.as_deref())
                .await?,
        )),
        None => {
            session.reset().await?;
            Ok(None)
        }
    }
}

/// Normalizes `result` and compares it with the stored expected output,
/// re-normalized against the same column types.
pub fn check_against_expected(
    bundle: &ProblemBundle,
    dialect: Dialect,
    result: &QueryResult,
    fallback: ComparisonPolicy,
) -> Result<Verdict, DataIntegrityError> {
    let raw = bundle.schema.expected_output.as_deref().unwrap_or("");
    let expected = ExpectedOutput::parse(&bundle.problem.id, raw)?;
    let normalizer = Normalizer::new(dialect);
    let user_rows = normalizer.normalize_all(&result.rows);
    let expected_rows = expected.conform_to(&normalizer, &result.columns);
    Ok(compare(&user_rows, &expected_rows, &bundle.policy(fallback)))
}

fn rejected_feedback(reasons: &[String]) -> Feedback {
    Feedback {
        kind: "query_rejected".to_string(),
        title: "Query not allowed".to_string(),
        explanation: if reasons.is_empty() {
            "This query cannot be run in practice mode.".to_string()
        } else {
            reasons.join(". ")
        },
        suggestions: vec![
            "Write a single SELECT (or WITH ... SELECT) statement".to_string(),
            "Remove statements that modify data or the schema".to_string(),
        ],
        example: Some("SELECT name FROM customers WHERE id = 1".to_string()),
        original_error: "Query not allowed".to_string(),
    }
}
