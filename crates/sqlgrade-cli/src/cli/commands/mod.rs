use super::args::*;
use anyhow::Context as _;
use sqlgrade_core::config::{load_or_default, GradeConfig};
use sqlgrade_core::engine::{Executor, Generator, Grader, GraderSettings};
use sqlgrade_core::guard::QueryGuard;
use sqlgrade_core::sandbox::SandboxPool;
use sqlgrade_core::ProblemStore;
use std::sync::Arc;

pub mod audit;
pub mod check;
pub mod import;
pub mod init;
pub mod regenerate;
pub mod setup;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => init::run(args),
        Command::Import(args) => import::run(args).await,
        Command::Check(args) => check::run(args).await,
        Command::Setup(args) => setup::run(args).await,
        Command::Regenerate(args) => regenerate::run(args).await,
        Command::Audit(args) => audit::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

/// Config, store and executor resolved from the shared store options.
pub(crate) struct Workspace {
    pub cfg: GradeConfig,
    pub store: ProblemStore,
    pub executor: Executor,
}

impl Workspace {
    pub fn open(args: &StoreArgs) -> anyhow::Result<Self> {
        let cfg = load_or_default(&args.config, args.strict)
            .map_err(|e| anyhow::anyhow!("config error: {}", e))?;
        let db = args.db.clone().unwrap_or_else(|| cfg.settings.database.clone());
        let store = ProblemStore::open(&db)
            .with_context(|| format!("failed to open problem store {}", db.display()))?;
        store.init_schema()?;
        tracing::debug!(event = "workspace_open", db = %db.display(), pool_size = cfg.settings.pool_size);
        let pool = SandboxPool::new(cfg.settings.pool_size)?;
        let executor = Executor::new(pool, cfg.settings.executor());
        Ok(Self {
            cfg,
            store,
            executor,
        })
    }

    pub fn generator(&self) -> Generator {
        Generator::new(self.executor.clone())
    }

    pub fn grader(&self) -> Grader {
        Grader::new(
            self.executor.clone(),
            Arc::new(self.store.clone()),
            QueryGuard::new(self.cfg.settings.guard.clone()),
            GraderSettings {
                max_display_rows: self.cfg.settings.max_display_rows,
                default_policy: self.cfg.settings.comparison,
            },
        )
    }
}

/// Config failures map to exit code 2; everything else propagates.
pub(crate) fn open_workspace(args: &StoreArgs) -> Result<Workspace, i32> {
    match Workspace::open(args) {
        Ok(ws) => Ok(ws),
        Err(e) => {
            eprintln!("{:#}", e);
            Err(exit_codes::CONFIG_ERROR)
        }
    }
}
