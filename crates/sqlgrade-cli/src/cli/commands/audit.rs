use super::{exit_codes, open_workspace};
use crate::cli::args::AuditArgs;
use sqlgrade_core::engine::{run_audit, AuditOptions};
use sqlgrade_core::model::ProblemRef;
use sqlgrade_core::report::console::print_audit;

pub async fn run(args: AuditArgs) -> anyhow::Result<i32> {
    let ws = match open_workspace(&args.store) {
        Ok(ws) => ws,
        Err(code) => return Ok(code),
    };

    let opts = AuditOptions {
        dialect: args.dialect,
        problem: args.problem.as_deref().map(ProblemRef::parse),
        repair: args.repair,
        default_policy: ws.cfg.settings.comparison,
    };
    let report = match run_audit(&ws.store, &ws.generator(), &opts).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("audit error: {:#}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_audit(&report);
    }

    if report.is_clean() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::TEST_FAILED)
    }
}
