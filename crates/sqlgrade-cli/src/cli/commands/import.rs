use super::{exit_codes, open_workspace};
use crate::cli::args::ImportArgs;
use sqlgrade_core::catalog::{import_catalog, load_catalog, Catalog};
use sqlgrade_core::model::ProblemRef;
use sqlgrade_core::report::console::print_generated;

pub async fn run(args: ImportArgs) -> anyhow::Result<i32> {
    let ws = match open_workspace(&args.store) {
        Ok(ws) => ws,
        Err(code) => return Ok(code),
    };

    let paths = if args.paths.is_empty() {
        ws.cfg.catalogs.clone()
    } else {
        args.paths.clone()
    };
    if paths.is_empty() {
        eprintln!("config error: no catalog given and `catalogs` is empty in the config");
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let mut catalogs: Vec<Catalog> = Vec::with_capacity(paths.len());
    for p in &paths {
        match load_catalog(p, args.store.strict) {
            Ok(c) => catalogs.push(c),
            Err(e) => {
                eprintln!("config error: {}", e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        }
    }

    for (path, catalog) in paths.iter().zip(&catalogs) {
        let summary = match import_catalog(&ws.store, catalog) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("import failed for {}: {:#}", path.display(), e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        };
        eprintln!(
            "imported {}: {} problems, {} schemas ({} with expected output)",
            path.display(),
            summary.problems,
            summary.schemas,
            summary.with_expected
        );
    }

    if !args.generate_missing {
        return Ok(exit_codes::OK);
    }

    let generator = ws.generator();
    let mut failed = 0usize;
    for problem in catalogs.iter().flat_map(|c| &c.problems) {
        for schema in &problem.schemas {
            let stored = ws.store.get_schema(&problem.id, schema.dialect)?;
            if stored.and_then(|s| s.expected_output).is_some() {
                continue;
            }
            let r = ProblemRef::Id(problem.id.clone());
            match generator.regenerate(&ws.store, &r, schema.dialect).await {
                Ok(out) => print_generated(&out, true),
                Err(e) => {
                    failed += 1;
                    eprintln!("❌ {} [{}]: {}", problem.id, schema.dialect, e);
                }
            }
        }
    }

    if failed > 0 {
        eprintln!("{} schema(s) could not be generated", failed);
        return Ok(exit_codes::TEST_FAILED);
    }
    Ok(exit_codes::OK)
}
