use super::exit_codes;
use crate::cli::args::InitArgs;
use sqlgrade_core::config::{write_sample_catalog, write_sample_config};
use std::path::Path;

const GITIGNORE: &str = "/.sqlgrade/\n*.db\n*.db-shm\n*.db-wal\n";

pub fn run(args: InitArgs) -> anyhow::Result<i32> {
    write_if_missing(&args.config, |p| Ok(write_sample_config(p)?))?;
    let catalog = match args.config.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && args.catalog.is_relative() => {
            dir.join(&args.catalog)
        }
        _ => args.catalog.clone(),
    };
    write_if_missing(&catalog, |p| Ok(write_sample_catalog(p)?))?;

    if args.gitignore {
        write_if_missing(Path::new(".gitignore"), |p| {
            std::fs::write(p, GITIGNORE)?;
            Ok(())
        })?;
    }

    eprintln!("next: sqlgrade import --config {}", args.config.display());
    Ok(exit_codes::OK)
}

fn write_if_missing(
    path: &Path,
    write: impl FnOnce(&Path) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    if path.exists() {
        eprintln!("note: {} already exists (skipped)", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write(path)?;
    eprintln!("created {}", path.display());
    Ok(())
}
