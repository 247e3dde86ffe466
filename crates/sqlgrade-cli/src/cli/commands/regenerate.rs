use super::{exit_codes, open_workspace};
use crate::cli::args::RegenerateArgs;
use sqlgrade_core::model::ProblemRef;
use sqlgrade_core::report::console::print_generated;

pub async fn run(args: RegenerateArgs) -> anyhow::Result<i32> {
    let ws = match open_workspace(&args.store) {
        Ok(ws) => ws,
        Err(code) => return Ok(code),
    };

    let mut bundles = ws.store.list_bundles(args.dialect)?;
    if let Some(p) = &args.problem {
        let r = ProblemRef::parse(p);
        let Some(found) = ws.store.find_problem(&r)? else {
            eprintln!("problem {} not found", r);
            return Ok(exit_codes::CONFIG_ERROR);
        };
        bundles.retain(|b| b.problem.id == found.id);
        if bundles.is_empty() {
            eprintln!("problem {} has no schema to regenerate", found.id);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    }

    let generator = ws.generator();
    let mut failed = 0usize;
    for bundle in &bundles {
        let out = match generator.generate(&bundle.schema).await {
            Ok(out) => out,
            Err(e) => {
                failed += 1;
                eprintln!(
                    "❌ {} [{}]: [{}] {}",
                    bundle.problem.id,
                    bundle.schema.dialect,
                    e.code(),
                    e
                );
                continue;
            }
        };
        if !args.dry_run {
            generator.persist(&ws.store, &out)?;
        }
        print_generated(&out, !args.dry_run);
    }

    eprintln!(
        "{} of {} schema(s) regenerated{}",
        bundles.len() - failed,
        bundles.len(),
        if args.dry_run { " (dry run)" } else { "" }
    );
    if failed > 0 {
        return Ok(exit_codes::TEST_FAILED);
    }
    Ok(exit_codes::OK)
}
