use super::{exit_codes, open_workspace};
use crate::cli::args::CheckArgs;
use sqlgrade_core::engine::{ExecuteResponse, SubmitRequest};
use sqlgrade_core::model::ProblemRef;
use sqlgrade_core::report::console::{print_execution, print_rejection};
use tokio::io::AsyncReadExt;

pub async fn run(args: CheckArgs) -> anyhow::Result<i32> {
    let sql = match (&args.sql, &args.file) {
        (Some(s), _) => s.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path).await?,
        (None, None) => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let ws = match open_workspace(&args.store) {
        Ok(ws) => ws,
        Err(code) => return Ok(code),
    };
    let req = request(&args, sql);
    let result = ws.grader().submit(&req).await;

    let code = match &result {
        Ok(data) if data.is_correct == Some(false) => exit_codes::TEST_FAILED,
        Ok(_) => exit_codes::OK,
        Err(r) if r.error.is_admin_only() => exit_codes::CONFIG_ERROR,
        Err(_) => exit_codes::TEST_FAILED,
    };

    if args.format == "json" {
        let body = ExecuteResponse::from_result(result);
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        match &result {
            Ok(data) => print_execution(data),
            Err(r) => print_rejection(r),
        }
    }
    Ok(code)
}

fn request(args: &CheckArgs, sql: String) -> SubmitRequest {
    let (problem_id, problem_numeric_id) = match args.problem.as_deref().map(ProblemRef::parse) {
        Some(ProblemRef::Id(id)) => (Some(id), None),
        Some(ProblemRef::Numeric(n)) => (None, Some(n)),
        None => (None, None),
    };
    SubmitRequest {
        sql,
        dialect: args.dialect,
        problem_id,
        problem_numeric_id,
    }
}
