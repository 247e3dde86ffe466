use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn sqlgrade(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sqlgrade").unwrap();
    cmd.current_dir(dir.path()).env_remove("SQLGRADE_DB");
    cmd
}

/// init + import with generated expected output.
fn initialized() -> TempDir {
    let dir = TempDir::new().unwrap();
    sqlgrade(&dir).arg("init").assert().success();
    sqlgrade(&dir)
        .args(["import", "--generate-missing"])
        .assert()
        .success()
        .stderr(contains("1 problems, 1 schemas"));
    dir
}

#[test]
fn init_writes_config_and_catalog() {
    let dir = TempDir::new().unwrap();
    sqlgrade(&dir)
        .args(["init", "--gitignore"])
        .assert()
        .success()
        .stderr(contains("created sqlgrade.yaml"));
    assert!(dir.path().join("sqlgrade.yaml").exists());
    assert!(dir.path().join("problems.yaml").exists());
    assert!(dir.path().join(".gitignore").exists());

    sqlgrade(&dir)
        .arg("init")
        .assert()
        .success()
        .stderr(contains("already exists"));
}

#[test]
fn correct_query_exits_zero() {
    let dir = initialized();
    sqlgrade(&dir)
        .args([
            "check",
            "--problem",
            "1",
            "--sql",
            "SELECT id, name FROM customers ORDER BY id",
        ])
        .assert()
        .success()
        .stderr(contains("Correct!"));
}

#[test]
fn wrong_order_exits_one_with_row_diff() {
    let dir = initialized();
    sqlgrade(&dir)
        .args([
            "check",
            "--problem",
            "list-customers",
            "--sql",
            "SELECT * FROM customers ORDER BY id DESC",
        ])
        .assert()
        .code(1)
        .stderr(contains("row index 0"));
}

#[test]
fn json_output_follows_the_execute_shape() {
    let dir = initialized();
    let out = sqlgrade(&dir)
        .args([
            "check",
            "--problem",
            "1",
            "--format",
            "json",
            "--sql",
            "SELECT nme FROM customers",
        ])
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();
    let body: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "E_QUERY");
    assert_eq!(body["feedback"]["type"], "column_not_found");
}

#[test]
fn query_from_file_and_free_form_run() {
    let dir = initialized();
    let sql = dir.path().join("q.sql");
    fs::write(&sql, "SELECT 1 AS one").unwrap();
    sqlgrade(&dir)
        .args(["check", "--file"])
        .arg(&sql)
        .assert()
        .success()
        .stderr(contains("Query executed successfully"));
}

#[test]
fn blocked_statement_is_rejected() {
    let dir = initialized();
    sqlgrade(&dir)
        .args(["check", "--problem", "1", "--sql", "DELETE FROM customers"])
        .assert()
        .code(1)
        .stderr(contains("Query not allowed"));
}

#[test]
fn unknown_problem_is_a_data_error() {
    let dir = initialized();
    sqlgrade(&dir)
        .args(["check", "--problem", "999", "--sql", "SELECT 1"])
        .assert()
        .code(2)
        .stderr(contains("Problem not found"));
}

#[test]
fn setup_reports_seeded_tables() {
    let dir = initialized();
    sqlgrade(&dir)
        .args(["setup", "--problem", "list-customers"])
        .assert()
        .success()
        .stderr(contains("customers").and(contains("2 rows")));
}

#[test]
fn audit_flags_and_repairs_missing_output() {
    let dir = TempDir::new().unwrap();
    sqlgrade(&dir).arg("init").assert().success();
    sqlgrade(&dir).arg("import").assert().success();

    sqlgrade(&dir)
        .arg("audit")
        .assert()
        .code(1)
        .stderr(contains("missing_expected"));
    sqlgrade(&dir)
        .args(["audit", "--repair"])
        .assert()
        .success()
        .stderr(contains("(repaired)"));
    sqlgrade(&dir).arg("audit").assert().success();
}

#[test]
fn regenerate_dry_run_does_not_write() {
    let dir = TempDir::new().unwrap();
    sqlgrade(&dir).arg("init").assert().success();
    sqlgrade(&dir).arg("import").assert().success();
    sqlgrade(&dir)
        .args(["regenerate", "--all", "--dry-run"])
        .assert()
        .success()
        .stderr(contains("(dry run)"));
    sqlgrade(&dir)
        .args(["check", "--problem", "1", "--sql", "SELECT * FROM customers"])
        .assert()
        .success()
        .stderr(contains("instead of SELECT *"));
}

#[test]
fn strict_config_rejects_unknown_keys() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sqlgrade.yaml"),
        "configVersion: 1\nsettings:\n  timeout: 10\n",
    )
    .unwrap();
    sqlgrade(&dir)
        .args(["audit", "--strict"])
        .assert()
        .code(2)
        .stderr(contains("Unknown fields"));
}

#[test]
fn version_prints_package_version() {
    let dir = TempDir::new().unwrap();
    sqlgrade(&dir)
        .arg("version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}
