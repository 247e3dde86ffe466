use super::generator::{GeneratedOutput, Generator};
use crate::compare::compare;
use crate::errors::{DataIntegrityError, GradeError};
use crate::expected::ExpectedOutput;
use crate::model::{ComparisonPolicy, Dialect, ProblemBundle, ProblemRef};
use crate::normalize::Normalizer;
use crate::storage::{AuditRecord, ProblemStore};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Ok,
    Stale,
    MissingExpected,
    MalformedExpected,
    EmptyResult,
    SetupFailed,
    SolutionFailed,
    Timeout,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Ok => "ok",
            AuditStatus::Stale => "stale",
            AuditStatus::MissingExpected => "missing_expected",
            AuditStatus::MalformedExpected => "malformed_expected",
            AuditStatus::EmptyResult => "empty_result",
            AuditStatus::SetupFailed => "setup_failed",
            AuditStatus::SolutionFailed => "solution_failed",
            AuditStatus::Timeout => "timeout",
        }
    }

    /// Findings the generator can fix by rewriting the stored output.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            AuditStatus::Stale | AuditStatus::MissingExpected | AuditStatus::MalformedExpected
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub problem_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_id: Option<i64>,
    pub title: String,
    pub dialect: Dialect,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub repaired: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub entries: Vec<AuditEntry>,
}

impl AuditReport {
    pub fn count(&self, status: AuditStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Entries that still need attention after any repair.
    pub fn outstanding(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.status != AuditStatus::Ok && !e.repaired)
    }

    pub fn is_clean(&self) -> bool {
        self.outstanding().next().is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    pub dialect: Option<Dialect>,
    pub problem: Option<ProblemRef>,
    pub repair: bool,
    pub default_policy: ComparisonPolicy,
}

/// Re-runs every selected solution and checks the stored expected output
/// against what the generator produces now.
pub async fn run_audit(
    store: &ProblemStore,
    generator: &Generator,
    opts: &AuditOptions,
) -> anyhow::Result<AuditReport> {
    let mut bundles = store.list_bundles(opts.dialect)?;
    if let Some(r) = &opts.problem {
        let Some(p) = store.find_problem(r)? else {
            anyhow::bail!("problem {} not found", r);
        };
        bundles.retain(|b| b.problem.id == p.id);
    }

    let mut report = AuditReport::default();
    for bundle in &bundles {
        let (status, message, generated) = classify(bundle, generator, opts.default_policy).await;

        let mut repaired = false;
        if opts.repair && status.is_repairable() {
            if let Some(out) = &generated {
                generator.persist(store, out)?;
                repaired = true;
            }
        }

        let entry = AuditEntry {
            problem_id: bundle.problem.id.clone(),
            numeric_id: bundle.problem.numeric_id,
            title: bundle.problem.title.clone(),
            dialect: bundle.schema.dialect,
            status,
            message,
            repaired,
        };
        store.record_audit(&AuditRecord {
            problem_id: entry.problem_id.clone(),
            dialect: entry.dialect,
            status: status.as_str().to_string(),
            message: entry.message.clone(),
            repaired,
            audited_at: chrono::Utc::now().to_rfc3339(),
        })?;
        if status != AuditStatus::Ok {
            tracing::warn!(
                event = "audit_finding",
                problem = %entry.problem_id,
                dialect = %entry.dialect,
                status = status.as_str(),
                repaired
            );
        }
        report.entries.push(entry);
    }

    tracing::info!(
        event = "audit_done",
        schemas = report.entries.len(),
        outstanding = report.outstanding().count()
    );
    Ok(report)
}

async fn classify(
    bundle: &ProblemBundle,
    generator: &Generator,
    fallback: ComparisonPolicy,
) -> (AuditStatus, Option<String>, Option<GeneratedOutput>) {
    let schema = &bundle.schema;
    let out = match generator.generate(schema).await {
        Ok(out) => out,
        Err(e) => {
            let status = match &e {
                GradeError::Setup(_) => AuditStatus::SetupFailed,
                GradeError::Timeout { .. } => AuditStatus::Timeout,
                GradeError::DataIntegrity(DataIntegrityError::EmptySolution { .. }) => {
                    AuditStatus::EmptyResult
                }
                _ => AuditStatus::SolutionFailed,
            };
            return (status, Some(e.to_string()), None);
        }
    };

    let stored = schema.expected_output.as_deref().unwrap_or("");
    let expected = match ExpectedOutput::parse(&schema.problem_id, stored) {
        Ok(e) => e,
        Err(DataIntegrityError::MissingExpected { .. }) => {
            return (AuditStatus::MissingExpected, None, Some(out));
        }
        Err(e) => return (AuditStatus::MalformedExpected, Some(e.to_string()), Some(out)),
    };

    let normalizer = Normalizer::new(schema.dialect);
    let conformed = expected.conform_to(&normalizer, &out.columns);
    let verdict = compare(out.expected.rows(), &conformed, &bundle.policy(fallback));
    if !verdict.is_correct {
        return (AuditStatus::Stale, Some(verdict.message), Some(out));
    }

    let drifted = schema
        .inputs_fingerprint
        .as_deref()
        .is_some_and(|fp| fp != out.inputs_fingerprint);
    let note = drifted.then(|| {
        "setup or solution SQL changed since the output was generated; values still match".to_string()
    });
    (AuditStatus::Ok, note, Some(out))
}
