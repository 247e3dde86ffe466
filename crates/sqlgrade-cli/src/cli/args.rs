use clap::{Parser, Subcommand};
use sqlgrade_core::model::Dialect;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sqlgrade",
    version,
    about = "Sandboxed SQL practice grader: run queries, compare results, maintain expected output"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a starter config and problem catalog
    Init(InitArgs),
    /// Load problem catalogs into the problem store
    Import(ImportArgs),
    /// Run a query and grade it against a problem's expected output
    Check(CheckArgs),
    /// Apply a problem's setup SQL on a fresh sandbox and report what was seeded
    Setup(SetupArgs),
    /// Rebuild expected output from solution SQL
    Regenerate(RegenerateArgs),
    /// Re-run every solution and flag stale or broken expected output
    Audit(AuditArgs),
    Version,
}

/// Options shared by every command that touches the problem store.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = "sqlgrade.yaml")]
    pub config: PathBuf,

    /// Overrides settings.database from the config
    #[arg(long, env = "SQLGRADE_DB")]
    pub db: Option<PathBuf>,

    /// Fail on unknown config keys instead of warning
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "sqlgrade.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = "problems.yaml")]
    pub catalog: PathBuf,

    /// generate .gitignore for the problem store
    #[arg(long)]
    pub gitignore: bool,
}

#[derive(Parser, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Catalog files; defaults to `catalogs` from the config
    pub paths: Vec<PathBuf>,

    /// Generate expected output for imported schemas that have none
    #[arg(long)]
    pub generate_missing: bool,
}

#[derive(Parser, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Problem id, slug or numeric id. Without it the query only runs.
    #[arg(long)]
    pub problem: Option<String>,

    #[arg(long, default_value = "postgresql")]
    pub dialect: Dialect,

    /// Query text (use --file to read it from disk)
    #[arg(long, conflicts_with = "file")]
    pub sql: Option<String>,

    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Clone)]
pub struct SetupArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub problem: String,

    #[arg(long, default_value = "postgresql")]
    pub dialect: Dialect,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Clone)]
pub struct RegenerateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Single problem to regenerate
    #[arg(long, required_unless_present = "all")]
    pub problem: Option<String>,

    /// Regenerate every schema in the store
    #[arg(long, conflicts_with = "problem")]
    pub all: bool,

    /// Restrict to one dialect (default: all dialects of the selection)
    #[arg(long)]
    pub dialect: Option<Dialect>,

    /// Generate and report without writing to the store
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone)]
pub struct AuditArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub problem: Option<String>,

    #[arg(long)]
    pub dialect: Option<Dialect>,

    /// Rewrite stale and missing expected output
    #[arg(long)]
    pub repair: bool,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}
