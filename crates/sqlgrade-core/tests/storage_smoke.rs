use sqlgrade_core::model::{ComparisonPolicy, Dialect, Problem, ProblemRef, ProblemSchema};
use sqlgrade_core::storage::AuditRecord;
use sqlgrade_core::ProblemStore;

fn problem() -> Problem {
    Problem {
        id: "top-products".into(),
        numeric_id: Some(7),
        slug: "top-products".into(),
        title: "Top products".into(),
        difficulty: "medium".into(),
        category: Some("aggregation".into()),
        description: String::new(),
        comparison: Some(ComparisonPolicy::unordered().with_tolerance(0.01)),
    }
}

fn schema(expected: Option<&str>) -> ProblemSchema {
    ProblemSchema {
        problem_id: "top-products".into(),
        dialect: Dialect::Mysql,
        setup_sql: "CREATE TABLE p (id INT); INSERT INTO p VALUES (1);".into(),
        sample_data: None,
        solution_sql: "SELECT id FROM p".into(),
        expected_output: expected.map(str::to_string),
        expected_fingerprint: None,
        inputs_fingerprint: None,
    }
}

#[test]
fn on_disk_store_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("problems.db");

    {
        let store = ProblemStore::open(&path)?;
        store.init_schema()?;
        store.upsert_problem(&problem())?;
        store.upsert_schema(&schema(Some(r#"[{"id":"1"}]"#)))?;
    }

    let store = ProblemStore::open(&path)?;
    store.init_schema()?;
    let bundle = store.load_bundle(&ProblemRef::Numeric(7), Dialect::Mysql)?;
    assert_eq!(bundle.problem.title, "Top products");
    assert_eq!(bundle.problem.comparison, problem().comparison);
    assert_eq!(bundle.schema.expected_output.as_deref(), Some(r#"[{"id":"1"}]"#));
    Ok(())
}

#[test]
fn reimport_without_expected_keeps_the_stored_output() -> anyhow::Result<()> {
    let store = ProblemStore::memory()?;
    store.init_schema()?;
    store.upsert_problem(&problem())?;
    store.upsert_schema(&schema(Some(r#"[{"id":"1"}]"#)))?;
    store.upsert_schema(&schema(None))?;

    let s = store
        .get_schema("top-products", Dialect::Mysql)?
        .expect("schema");
    assert_eq!(s.expected_output.as_deref(), Some(r#"[{"id":"1"}]"#));
    Ok(())
}

#[test]
fn lookups_by_slug_and_missing_dialect() -> anyhow::Result<()> {
    let store = ProblemStore::memory()?;
    store.init_schema()?;
    store.upsert_problem(&problem())?;
    store.upsert_schema(&schema(None))?;

    assert!(store.find_problem(&ProblemRef::parse("top-products"))?.is_some());
    assert!(store.find_problem(&ProblemRef::parse("7"))?.is_some());
    assert!(store.find_problem(&ProblemRef::parse("8"))?.is_none());

    let err = store
        .load_bundle(&ProblemRef::Numeric(7), Dialect::Postgresql)
        .unwrap_err();
    assert!(err.to_string().contains("postgresql"), "{err}");
    assert_eq!(store.list_bundles(Some(Dialect::Postgresql))?.len(), 0);
    assert_eq!(store.list_bundles(None)?.len(), 1);
    Ok(())
}

#[test]
fn audit_history_and_stats() -> anyhow::Result<()> {
    let store = ProblemStore::memory()?;
    store.init_schema()?;
    store.upsert_problem(&problem())?;
    store.upsert_schema(&schema(None))?;

    for (status, at) in [("missing_expected", "2026-01-01T00:00:00Z"), ("ok", "2026-01-02T00:00:00Z")] {
        store.record_audit(&AuditRecord {
            problem_id: "top-products".into(),
            dialect: Dialect::Mysql,
            status: status.into(),
            message: None,
            repaired: status == "ok",
            audited_at: at.into(),
        })?;
    }

    let recent = store.recent_audits(1)?;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status, "ok");
    assert!(recent[0].repaired);

    let stats = store.stats()?;
    assert_eq!(stats.problems, 1);
    assert_eq!(stats.schemas, 1);
    assert_eq!(stats.missing_expected, 1);
    assert_eq!(stats.last_audit_at.as_deref(), Some("2026-01-02T00:00:00Z"));
    Ok(())
}
