use anyhow::Result;
use serde_json::Value;
use sqlgrade_core::catalog::{import_catalog, parse_catalog};
use sqlgrade_core::ProblemStore;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

#[test]
fn test_stdio_flow() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("problems.db");
    {
        let store = ProblemStore::open(&db)?;
        store.init_schema()?;
        import_catalog(
            &store,
            &parse_catalog(
                r#"
problems:
  - id: one
    numeric_id: 1
    title: One
    schemas:
      - setup_sql: CREATE TABLE t (x INT); INSERT INTO t VALUES (1);
        solution_sql: SELECT x FROM t
        expected_output: '[{"x":1}]'
"#,
                true,
            )?,
        )?;
    }

    let mut child = Command::new(env!("CARGO_BIN_EXE_sqlgrade-server"))
        .arg("--db")
        .arg(&db)
        .env("SQLGRADE_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;

    let mut stdin = child.stdin.take().expect("stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("stdout"));
    let mut line = String::new();

    writeln!(stdin, r#"{{"jsonrpc":"2.0","method":"initialize","id":1}}"#)?;
    reader.read_line(&mut line)?;
    let resp: Value = serde_json::from_str(&line)?;
    assert_eq!(resp["result"]["serverInfo"]["name"], "sqlgrade-server");

    // notifications produce no output line
    writeln!(stdin, r#"{{"jsonrpc":"2.0","method":"notifications/initialized"}}"#)?;
    writeln!(
        stdin,
        r#"{{"jsonrpc":"2.0","method":"execute","params":{{"sql":"SELECT x FROM t","problemId":"one"}},"id":2}}"#
    )?;
    line.clear();
    reader.read_line(&mut line)?;
    let resp: Value = serde_json::from_str(&line)?;
    assert_eq!(resp["id"], 2);
    assert_eq!(resp["result"]["data"]["isCorrect"], true);

    drop(stdin);
    let status = child.wait()?;
    assert!(status.success());
    Ok(())
}
