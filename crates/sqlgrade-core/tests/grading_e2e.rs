use sqlgrade_core::catalog::{import_catalog, parse_catalog};
use sqlgrade_core::engine::{
    run_audit, AuditOptions, AuditStatus, ExecuteResponse, Executor, ExecutorSettings, Generator,
    Grader, GraderSettings, SubmitRequest,
};
use sqlgrade_core::guard::QueryGuard;
use sqlgrade_core::model::{Dialect, ProblemRef};
use sqlgrade_core::sandbox::SandboxPool;
use sqlgrade_core::{GradeError, ProblemStore};
use std::sync::Arc;

const CATALOG: &str = r#"
problems:
  - id: list-customers
    numeric_id: 1
    title: List customers
    schemas:
      - dialect: postgresql
        setup_sql: |
          CREATE TABLE customers (id INT, name TEXT);
          INSERT INTO customers VALUES (1, 'John'), (2, 'Jane');
        solution_sql: SELECT * FROM customers ORDER BY id
  - id: any-order
    numeric_id: 2
    title: Customers in any order
    comparison:
      order: unordered
    schemas:
      - dialect: postgresql
        setup_sql: |
          CREATE TABLE customers (id INT, name TEXT, referrer INT);
          INSERT INTO customers VALUES (1, 'John', NULL), (2, 'Jane', 1);
        solution_sql: SELECT id, referrer FROM customers ORDER BY id
  - id: balances
    numeric_id: 3
    title: Balances
    schemas:
      - dialect: postgresql
        setup_sql: |
          CREATE TABLE accounts (id INT, balance DECIMAL(10,2), active BOOLEAN);
          INSERT INTO accounts VALUES (1, 12.5, 1), (2, 7, 0);
        solution_sql: SELECT id, balance, active FROM accounts ORDER BY id
        expected_output: '[{"id":1,"balance":12.5,"active":true},{"id":2,"balance":7,"active":false}]'
  - id: unvalidated
    numeric_id: 4
    title: No expected output yet
    schemas:
      - dialect: postgresql
        setup_sql: |
          CREATE TABLE t (x INT);
          INSERT INTO t VALUES (1), (2), (3);
        solution_sql: SELECT x FROM t
"#;

struct Fixture {
    store: ProblemStore,
    grader: Grader,
}

async fn fixture() -> anyhow::Result<Fixture> {
    let store = ProblemStore::memory()?;
    store.init_schema()?;
    import_catalog(&store, &parse_catalog(CATALOG, true)?)?;

    let executor = Executor::new(SandboxPool::new(2)?, ExecutorSettings::default());
    let generator = Generator::new(executor.clone());
    for (id, dialect) in [("list-customers", Dialect::Postgresql), ("any-order", Dialect::Postgresql)] {
        generator
            .regenerate(&store, &ProblemRef::Id(id.into()), dialect)
            .await?;
    }

    let grader = Grader::new(
        executor,
        Arc::new(store.clone()),
        QueryGuard::default(),
        GraderSettings::default(),
    );
    Ok(Fixture { store, grader })
}

fn submit(sql: &str, problem: &str) -> SubmitRequest {
    SubmitRequest {
        sql: sql.into(),
        dialect: Dialect::Postgresql,
        problem_id: Some(problem.into()),
        problem_numeric_id: None,
    }
}

#[tokio::test]
async fn identical_query_is_correct_and_reversed_order_is_not() -> anyhow::Result<()> {
    let fx = fixture().await?;

    let ok = fx
        .grader
        .submit(&submit("SELECT * FROM customers ORDER BY id", "list-customers"))
        .await
        .map_err(|r| r.error)?;
    assert_eq!(ok.is_correct, Some(true));
    assert_eq!(ok.feedback, "Correct! Your query produced the expected output.");
    assert_eq!(ok.columns, vec!["id", "name"]);
    assert_eq!(ok.row_count, 2);

    let wrong = fx
        .grader
        .submit(&submit("SELECT * FROM customers ORDER BY id DESC", "list-customers"))
        .await
        .map_err(|r| r.error)?;
    assert_eq!(wrong.is_correct, Some(false));
    assert!(wrong.feedback.contains("row index 0"), "{}", wrong.feedback);
    Ok(())
}

#[tokio::test]
async fn row_count_mismatch_cites_both_counts() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let data = fx
        .grader
        .submit(&SubmitRequest {
            sql: "SELECT * FROM customers WHERE id = 1".into(),
            dialect: Dialect::Postgresql,
            problem_id: None,
            problem_numeric_id: Some(1),
        })
        .await
        .map_err(|r| r.error)?;
    assert_eq!(data.is_correct, Some(false));
    assert_eq!(data.feedback, "Expected 2 rows, but got 1 rows.");
    Ok(())
}

#[tokio::test]
async fn unordered_problem_accepts_any_row_order_and_matches_nulls() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let data = fx
        .grader
        .submit(&submit(
            "SELECT id, referrer FROM customers ORDER BY id DESC",
            "any-order",
        ))
        .await
        .map_err(|r| r.error)?;
    assert_eq!(data.is_correct, Some(true));
    Ok(())
}

#[tokio::test]
async fn authored_legacy_numbers_match_declared_scale() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let data = fx
        .grader
        .submit(&submit(
            "SELECT id, balance, active FROM accounts ORDER BY id",
            "balances",
        ))
        .await
        .map_err(|r| r.error)?;
    assert_eq!(data.is_correct, Some(true), "{}", data.feedback);
    Ok(())
}

#[tokio::test]
async fn missing_expected_output_is_never_blamed_on_the_user() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let data = fx
        .grader
        .submit(&submit("SELECT * FROM t", "unvalidated"))
        .await
        .map_err(|r| r.error)?;
    assert_eq!(data.is_correct, None);
    assert!(data.feedback.contains("instead of SELECT *"));
    assert!(data.integrity.is_some());
    Ok(())
}

#[tokio::test]
async fn syntax_errors_carry_verbatim_message_and_feedback() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let err = fx
        .grader
        .submit(&submit("SELECT nme FROM customers", "list-customers"))
        .await
        .unwrap_err();
    match &err.error {
        GradeError::QuerySyntax { message } => assert_eq!(message, "no such column: nme"),
        other => panic!("unexpected {other:?}"),
    }
    let feedback = err.feedback.as_ref().expect("feedback");
    assert_eq!(feedback.suggestions[0], "Did you mean \"name\"?");

    let body = serde_json::to_value(ExecuteResponse::from_result(Err(err)))?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "no such column: nme");
    assert_eq!(body["feedback"]["type"], "column_not_found");
    Ok(())
}

#[tokio::test]
async fn rejected_queries_never_reach_the_sandbox() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let err = fx
        .grader
        .submit(&submit("DROP TABLE customers", "list-customers"))
        .await
        .unwrap_err();
    assert!(matches!(err.error, GradeError::QueryRejected { .. }));
    let body = serde_json::to_value(ExecuteResponse::from_result(Err(err)))?;
    assert_eq!(body["error"], "Query not allowed");

    // the seeded data is untouched for the next submission
    let ok = fx
        .grader
        .submit(&submit("SELECT * FROM customers ORDER BY id", "list-customers"))
        .await
        .map_err(|r| r.error)?;
    assert_eq!(ok.is_correct, Some(true));
    Ok(())
}

#[tokio::test]
async fn unknown_problem_is_reported_as_not_found() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let err = fx
        .grader
        .submit(&submit("SELECT 1", "nope"))
        .await
        .unwrap_err();
    assert_eq!(err.error.user_message(), "Problem not found");
    Ok(())
}

#[tokio::test]
async fn success_response_has_the_documented_shape() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let data = fx
        .grader
        .submit(&submit("SELECT * FROM customers ORDER BY id", "list-customers"))
        .await
        .map_err(|r| r.error)?;
    let body = serde_json::to_value(ExecuteResponse::from_result(Ok(data)))?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["rowCount"], 2);
    assert_eq!(body["data"]["isCorrect"], true);
    assert_eq!(body["data"]["rows"][0]["name"], "John");
    assert!(body["data"].get("executionTime").is_some());
    assert!(body["data"].get("verdict").is_none());
    Ok(())
}

#[tokio::test]
async fn display_rows_are_capped_but_grading_uses_all() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let executor = fx.grader.executor().clone();
    let grader = Grader::new(
        executor,
        Arc::new(fx.store.clone()),
        QueryGuard::default(),
        GraderSettings {
            max_display_rows: 1,
            ..Default::default()
        },
    );
    let data = grader
        .submit(&submit("SELECT * FROM customers ORDER BY id", "list-customers"))
        .await
        .map_err(|r| r.error)?;
    assert_eq!(data.rows.len(), 1);
    assert_eq!(data.row_count, 2);
    assert_eq!(data.is_correct, Some(true));
    assert!(data.feedback.ends_with("(Showing first 1 of 2 rows)"));
    Ok(())
}

#[tokio::test]
async fn concurrent_submissions_do_not_share_namespaces() -> anyhow::Result<()> {
    let fx = Arc::new(fixture().await?);
    let mut handles = Vec::new();
    for i in 0..8 {
        let fx = fx.clone();
        handles.push(tokio::spawn(async move {
            let (sql, problem) = if i % 2 == 0 {
                ("SELECT * FROM customers ORDER BY id", "list-customers")
            } else {
                ("SELECT id, balance, active FROM accounts ORDER BY id", "balances")
            };
            fx.grader.submit(&submit(sql, problem)).await
        }));
    }
    for h in handles {
        let data = h.await?.map_err(|r| r.error)?;
        assert_eq!(data.is_correct, Some(true), "{}", data.feedback);
    }
    Ok(())
}

#[tokio::test]
async fn joined_tables_with_repeated_column_names_grade_their_own_solution() -> anyhow::Result<()> {
    let store = ProblemStore::memory()?;
    store.init_schema()?;
    import_catalog(
        &store,
        &parse_catalog(
            r#"
problems:
  - id: customer-orders
    numeric_id: 20
    title: Customers with their orders
    schemas:
      - setup_sql: |
          CREATE TABLE a (id INT, name TEXT);
          CREATE TABLE b (id INT, a_id INT);
          INSERT INTO a VALUES (1, 'John');
          INSERT INTO b VALUES (10, 1);
        solution_sql: SELECT * FROM a JOIN b ON b.a_id = a.id
"#,
            true,
        )?,
    )?;
    let executor = Executor::new(SandboxPool::new(1)?, ExecutorSettings::default());
    let generator = Generator::new(executor.clone());
    let out = generator
        .regenerate(&store, &ProblemRef::Id("customer-orders".into()), Dialect::Postgresql)
        .await?;
    assert_eq!(out.json, r#"[{"id":"1","name":"John","id_2":"10","a_id":"1"}]"#);

    let report = run_audit(&store, &generator, &AuditOptions::default()).await?;
    assert_eq!(report.entries[0].status, AuditStatus::Ok, "{:?}", report.entries[0]);

    let grader = Grader::new(
        executor,
        Arc::new(store.clone()),
        QueryGuard::default(),
        GraderSettings::default(),
    );
    let data = grader
        .submit(&submit("SELECT * FROM a JOIN b ON b.a_id = a.id", "customer-orders"))
        .await
        .map_err(|r| r.error)?;
    assert_eq!(data.columns, vec!["id", "name", "id_2", "a_id"]);
    assert_eq!(data.is_correct, Some(true), "{}", data.feedback);
    Ok(())
}
