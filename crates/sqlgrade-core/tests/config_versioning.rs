use sqlgrade_core::config::{load_config, load_or_default, write_sample_catalog, DEFAULT_DB_FILE};
use sqlgrade_core::catalog::load_catalog;
use sqlgrade_core::model::RowOrder;
use std::io::Write;

#[test]
fn missing_file_yields_defaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = load_or_default(&dir.path().join("absent.yaml"), true)?;
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.settings.database.to_str(), Some(DEFAULT_DB_FILE));
    assert!(cfg.catalogs.is_empty());
    Ok(())
}

#[test]
fn future_config_version_is_refused() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "configVersion: 2")?;
    let err = load_config(file.path(), false).unwrap_err();
    assert!(err.0.contains("unsupported configVersion 2"), "{}", err.0);
    Ok(())
}

#[test]
fn settings_map_onto_executor_limits() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        "configVersion: 1\nsettings:\n  timeout_ms: 250\n  max_result_rows: 10\n  comparison:\n    order: unordered\n    numeric_tolerance: 0.001\n"
    )?;
    let cfg = load_config(file.path(), true)?;
    let exec = cfg.settings.executor();
    assert_eq!(exec.timeout_ms, 250);
    assert_eq!(exec.max_result_rows, 10);
    assert_eq!(cfg.settings.comparison.order, RowOrder::Unordered);
    assert_eq!(cfg.settings.comparison.numeric_tolerance, Some(0.001));
    Ok(())
}

#[test]
fn extension_keys_are_tolerated_in_strict_mode() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "configVersion: 1\nx-owner: data-team\n")?;
    assert!(load_config(file.path(), true).is_ok());
    Ok(())
}

#[test]
fn sample_catalog_loads_strictly() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("problems.yaml");
    write_sample_catalog(&path)?;
    let catalog = load_catalog(&path, true)?;
    assert_eq!(catalog.problems.len(), 1);
    assert_eq!(catalog.problems[0].numeric_id, Some(1));
    Ok(())
}
