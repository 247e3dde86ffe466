use crate::errors::GradeError;
use crate::model::{Dialect, ProblemBundle, ProblemRef};
use crate::storage::ProblemStore;
use async_trait::async_trait;

/// Where graded problems come from. The server layers a cache over the store
/// through this seam.
#[async_trait]
pub trait ProblemSource: Send + Sync {
    async fn load(&self, problem: &ProblemRef, dialect: Dialect) -> Result<ProblemBundle, GradeError>;
}

#[async_trait]
impl ProblemSource for ProblemStore {
    async fn load(&self, problem: &ProblemRef, dialect: Dialect) -> Result<ProblemBundle, GradeError> {
        let store = self.clone();
        let problem = problem.clone();
        tokio::task::spawn_blocking(move || store.load_bundle(&problem, dialect))
            .await
            .map_err(|e| GradeError::Storage(e.to_string()))?
    }
}
