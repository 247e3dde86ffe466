use super::{exit_codes, open_workspace};
use crate::cli::args::SetupArgs;
use sqlgrade_core::errors::GradeError;
use sqlgrade_core::model::ProblemRef;
use sqlgrade_core::report::console::print_setup;

pub async fn run(args: SetupArgs) -> anyhow::Result<i32> {
    let ws = match open_workspace(&args.store) {
        Ok(ws) => ws,
        Err(code) => return Ok(code),
    };

    let problem = ProblemRef::parse(&args.problem);
    match ws.grader().setup_problem(&problem, args.dialect).await {
        Ok(report) => {
            if args.format == "json" {
                let body = serde_json::json!({
                    "success": true,
                    "message": "Problem setup completed",
                    "data": report,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_setup(&report);
            }
            Ok(exit_codes::OK)
        }
        Err(e) => {
            if args.format == "json" {
                let body = serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "code": e.code(),
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                eprintln!("💥 [{}] {}", e.code(), e);
            }
            Ok(match e {
                GradeError::Timeout { .. } => exit_codes::TEST_FAILED,
                _ => exit_codes::CONFIG_ERROR,
            })
        }
    }
}
