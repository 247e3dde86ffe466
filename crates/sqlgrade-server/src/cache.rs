use async_trait::async_trait;
use moka::sync::Cache;
use sqlgrade_core::errors::GradeError;
use sqlgrade_core::model::{Dialect, ProblemBundle, ProblemRef};
use sqlgrade_core::source::ProblemSource;
use sqlgrade_core::ProblemStore;

/// Problem bundles keyed by the reference the caller used. Lookup failures
/// are not cached.
pub struct CachedProblems {
    store: ProblemStore,
    bundles: Cache<(ProblemRef, Dialect), ProblemBundle>,
}

impl CachedProblems {
    pub fn new(store: ProblemStore, max_entries: u64) -> Self {
        Self {
            store,
            bundles: Cache::new(max_entries),
        }
    }

    /// Drops every cached entry for `problem_id` in `dialect`, whichever
    /// reference (id, slug, numeric id) it was loaded by.
    pub fn invalidate(&self, problem_id: &str, dialect: Dialect) {
        let stale: Vec<_> = self
            .bundles
            .iter()
            .filter(|(k, b)| k.1 == dialect && b.problem.id == problem_id)
            .map(|(k, _)| k)
            .collect();
        for k in &stale {
            self.bundles.invalidate(k.as_ref());
        }
        tracing::debug!(event = "cache_invalidate", problem = problem_id, dialect = %dialect, entries = stale.len());
    }

    pub fn len(&self) -> u64 {
        self.bundles.run_pending_tasks();
        self.bundles.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProblemSource for CachedProblems {
    async fn load(&self, problem: &ProblemRef, dialect: Dialect) -> Result<ProblemBundle, GradeError> {
        let key = (problem.clone(), dialect);
        if let Some(hit) = self.bundles.get(&key) {
            return Ok(hit);
        }
        let bundle = self.store.load(problem, dialect).await?;
        self.bundles.insert(key, bundle.clone());
        Ok(bundle)
    }
}
