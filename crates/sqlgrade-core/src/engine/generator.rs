use super::executor::Executor;
use crate::errors::{DataIntegrityError, GradeError};
use crate::expected::ExpectedOutput;
use crate::model::{ColumnMeta, Dialect, ProblemRef, ProblemSchema};
use crate::normalize::Normalizer;
use crate::sandbox::SetupReport;
use crate::storage::ProblemStore;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedOutput {
    pub problem_id: String,
    pub dialect: Dialect,
    #[serde(skip)]
    pub expected: ExpectedOutput,
    pub json: String,
    pub fingerprint: String,
    pub inputs_fingerprint: String,
    pub columns: Vec<ColumnMeta>,
    pub rows: usize,
    pub setup: SetupReport,
}

/// Produces expected output by running the solution through the same
/// executor and normalizer that grade submissions.
#[derive(Clone)]
pub struct Generator {
    executor: Executor,
}

impl Generator {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Runs the solution on a fresh namespace. Nothing is persisted.
    pub async fn generate(&self, schema: &ProblemSchema) -> Result<GeneratedOutput, GradeError> {
        if schema.solution_sql.trim().is_empty() {
            return Err(DataIntegrityError::Malformed {
                problem: schema.problem_id.clone(),
                reason: "solution_sql is empty".to_string(),
            }
            .into());
        }

        let (setup, result) = self
            .executor
            .run(
                &schema.setup_sql,
                schema.sample_data.as_deref(),
                &schema.solution_sql,
            )
            .await?;

        if result.rows.is_empty() {
            return Err(DataIntegrityError::EmptySolution {
                problem: schema.problem_id.clone(),
            }
            .into());
        }

        let normalizer = Normalizer::new(schema.dialect);
        let expected = ExpectedOutput::from_rows(normalizer.normalize_all(&result.rows));
        let json = expected.to_canonical_json();
        let fingerprint = expected.fingerprint();

        Ok(GeneratedOutput {
            problem_id: schema.problem_id.clone(),
            dialect: schema.dialect,
            rows: expected.len(),
            expected,
            json,
            fingerprint,
            inputs_fingerprint: schema.inputs_fingerprint_now(),
            columns: result.columns.as_ref().clone(),
            setup,
        })
    }

    /// Generates and stores the expected output for one problem schema.
    pub async fn regenerate(
        &self,
        store: &ProblemStore,
        problem: &ProblemRef,
        dialect: Dialect,
    ) -> Result<GeneratedOutput, GradeError> {
        let bundle = store.load_bundle(problem, dialect)?;
        let out = self.generate(&bundle.schema).await?;
        self.persist(store, &out)?;
        Ok(out)
    }

    pub fn persist(&self, store: &ProblemStore, out: &GeneratedOutput) -> Result<(), GradeError> {
        store
            .save_expected(
                &out.problem_id,
                out.dialect,
                &out.json,
                &out.fingerprint,
                &out.inputs_fingerprint,
            )
            .map_err(|e| GradeError::Storage(format!("{:#}", e)))?;
        tracing::info!(
            event = "expected_regenerated",
            problem = %out.problem_id,
            dialect = %out.dialect,
            rows = out.rows,
            fingerprint = %out.fingerprint
        );
        Ok(())
    }
}
