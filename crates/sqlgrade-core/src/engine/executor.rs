use crate::errors::{GradeError, SetupError};
use crate::model::QueryResult;
use crate::sandbox::split::{excerpt, split_statements};
use crate::sandbox::{
    EngineError, EngineErrorKind, Interrupter, SandboxEngine, SandboxLease, SandboxPool,
    SetupReport,
};
use std::time::Instant;
use tokio::time::{timeout, Duration};

const EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub timeout_ms: u64,
    pub setup_timeout_ms: u64,
    pub max_result_rows: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            setup_timeout_ms: 30_000,
            max_result_rows: 100_000,
        }
    }
}

/// Runs setup + query cycles on pooled namespaces. Every engine failure is
/// translated into [`GradeError`] here.
#[derive(Clone)]
pub struct Executor {
    pool: SandboxPool,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(pool: SandboxPool, settings: ExecutorSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Leases a namespace for one cycle.
    pub async fn session(&self) -> Result<Session, GradeError> {
        let lease = self.pool.acquire().await.map_err(sandbox_err)?;
        Ok(Session {
            lease,
            settings: self.settings,
        })
    }

    /// Fresh setup followed by one query, on a single namespace.
    pub async fn run(
        &self,
        setup_sql: &str,
        sample_data: Option<&str>,
        query_sql: &str,
    ) -> Result<(SetupReport, QueryResult), GradeError> {
        let mut session = self.session().await?;
        let report = session.setup(setup_sql, sample_data).await?;
        let result = session.query(query_sql).await?;
        Ok((report, result))
    }
}

pub struct Session {
    lease: SandboxLease,
    settings: ExecutorSettings,
}

enum Bounded<T> {
    Done(T),
    TimedOut,
}

impl Session {
    pub fn namespace(&self) -> &str {
        self.lease.namespace()
    }

    /// Drops everything in the namespace, then applies `setup_sql` and
    /// `sample_data` in one transaction. Fails if no table ends up with rows.
    pub async fn setup(
        &mut self,
        setup_sql: &str,
        sample_data: Option<&str>,
    ) -> Result<SetupReport, GradeError> {
        let mut statements = split_statements(setup_sql);
        if let Some(sample) = sample_data {
            statements.extend(split_statements(sample));
        }
        if statements.is_empty() {
            return Err(SetupError::EmptySeed { tables: vec![] }.into());
        }

        let start = Instant::now();
        let count = statements.len();
        let limit_ms = self.settings.setup_timeout_ms;
        let outcome = self
            .bounded(limit_ms, move |engine| {
                engine
                    .reset()
                    .map_err(|e| SetupError::Reset(e.message))?;
                engine.apply(&statements).map_err(|(i, e)| SetupError::Statement {
                    index: i + 1,
                    excerpt: excerpt(statements.get(i).map(String::as_str).unwrap_or(""), EXCERPT_CHARS),
                    message: e.message,
                })?;
                engine
                    .table_stats()
                    .map_err(|e| SetupError::Reset(e.message))
            })
            .await?;

        let tables = match outcome {
            Bounded::Done(r) => r?,
            Bounded::TimedOut => return Err(SetupError::Timeout { limit_ms }.into()),
        };

        if tables.iter().all(|t| t.rows == 0) {
            return Err(SetupError::EmptySeed {
                tables: tables.into_iter().map(|t| t.name).collect(),
            }
            .into());
        }

        let report = SetupReport {
            namespace: self.namespace().to_string(),
            statements: count,
            tables,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            event = "sandbox_setup",
            namespace = %report.namespace,
            statements = report.statements,
            tables = report.tables.len(),
            rows = report.seeded_rows(),
            elapsed_ms = report.elapsed_ms
        );
        Ok(report)
    }

    /// Empties the namespace without seeding it.
    pub async fn reset(&mut self) -> Result<(), GradeError> {
        let limit_ms = self.settings.setup_timeout_ms;
        match self.bounded(limit_ms, |engine| engine.reset()).await? {
            Bounded::Done(r) => r.map_err(|e| SetupError::Reset(e.message).into()),
            Bounded::TimedOut => Err(SetupError::Timeout { limit_ms }.into()),
        }
    }

    /// Runs one statement against the current namespace state. Repeated
    /// column names come back suffixed (`id`, `id_2`).
    pub async fn query(&mut self, sql: &str) -> Result<QueryResult, GradeError> {
        let sql = sql.to_string();
        let limit_ms = self.settings.timeout_ms;
        let max_rows = self.settings.max_result_rows;
        let outcome = self
            .bounded(limit_ms, move |engine| engine.query(&sql, max_rows))
            .await?;

        match outcome {
            Bounded::Done(Ok(result)) => {
                let result = result.with_unique_column_names();
                tracing::debug!(
                    event = "sandbox_query",
                    namespace = %self.namespace(),
                    rows = result.row_count(),
                    elapsed_ms = result.elapsed_ms
                );
                Ok(result)
            }
            Bounded::Done(Err(e)) => Err(self.translate(e, limit_ms, max_rows)),
            Bounded::TimedOut => {
                tracing::warn!(event = "sandbox_timeout", namespace = %self.namespace(), limit_ms);
                Err(GradeError::Timeout { limit_ms })
            }
        }
    }

    fn translate(&mut self, e: EngineError, limit_ms: u64, max_rows: usize) -> GradeError {
        match e.kind {
            EngineErrorKind::Interrupted => {
                self.lease.poison();
                GradeError::Timeout { limit_ms }
            }
            EngineErrorKind::TooManyRows => GradeError::ResultTooLarge { limit: max_rows },
            EngineErrorKind::Other => GradeError::QuerySyntax { message: e.message },
        }
    }

    /// Runs `f` on the blocking pool. On expiry the running statement is
    /// interrupted and the namespace poisoned. Dropping this future while
    /// `f` runs also interrupts it.
    async fn bounded<T, F>(&mut self, limit_ms: u64, f: F) -> Result<Bounded<T>, GradeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SandboxEngine) -> T + Send + 'static,
    {
        let mut engine = self
            .lease
            .take()
            .ok_or_else(|| GradeError::Sandbox("namespace engine unavailable".to_string()))?;
        let guard = InterruptOnDrop::new(engine.interrupter());

        let mut handle = tokio::task::spawn_blocking(move || {
            let out = f(engine.as_mut());
            (engine, out)
        });

        match timeout(Duration::from_millis(limit_ms), &mut handle).await {
            Ok(joined) => {
                guard.disarm();
                let (engine, out) = joined.map_err(|e| GradeError::Sandbox(e.to_string()))?;
                self.lease.restore(engine);
                Ok(Bounded::Done(out))
            }
            Err(_) => {
                guard.fire();
                self.lease.poison();
                if let Ok((engine, _)) = handle.await {
                    self.lease.restore(engine);
                }
                Ok(Bounded::TimedOut)
            }
        }
    }
}

struct InterruptOnDrop {
    interrupter: Option<Interrupter>,
}

impl InterruptOnDrop {
    fn new(interrupter: Interrupter) -> Self {
        Self {
            interrupter: Some(interrupter),
        }
    }

    fn disarm(mut self) {
        self.interrupter = None;
    }

    fn fire(mut self) {
        if let Some(i) = self.interrupter.take() {
            i.fire();
        }
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(i) = self.interrupter.take() {
            tracing::warn!(event = "sandbox_cancelled");
            i.fire();
        }
    }
}

fn sandbox_err(e: EngineError) -> GradeError {
    GradeError::Sandbox(e.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const SETUP: &str = "CREATE TABLE customers (id INT, name TEXT);\n\
        INSERT INTO customers VALUES (1, 'John'), (2, 'Jane');";

    fn executor(timeout_ms: u64) -> Executor {
        Executor::new(
            SandboxPool::new(1).unwrap(),
            ExecutorSettings {
                timeout_ms,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn setup_then_query() -> anyhow::Result<()> {
        let (report, result) = executor(5_000)
            .run(SETUP, None, "SELECT name FROM customers ORDER BY id")
            .await?;
        assert_eq!(report.statements, 2);
        assert_eq!(report.seeded_rows(), 2);
        assert_eq!(result.row_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn setup_error_names_the_statement() {
        let err = executor(5_000)
            .run("CREATE TABLE a (x INT);\nINSERT INTO b VALUES (1);", None, "SELECT 1")
            .await
            .unwrap_err();
        match err {
            GradeError::Setup(SetupError::Statement { index, excerpt, message }) => {
                assert_eq!(index, 2);
                assert_eq!(excerpt, "INSERT INTO b VALUES (1)");
                assert!(message.contains("no such table"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_seed_is_reported() {
        let err = executor(5_000)
            .run("CREATE TABLE a (x INT);", None, "SELECT * FROM a")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GradeError::Setup(SetupError::EmptySeed { ref tables }) if tables == &["a".to_string()]
        ));
    }

    #[tokio::test]
    async fn syntax_error_is_verbatim() {
        let err = executor(5_000)
            .run(SETUP, None, "SELEC * FROM customers")
            .await
            .unwrap_err();
        match err {
            GradeError::QuerySyntax { message } => assert!(message.contains("syntax error")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn runaway_query_times_out_and_namespace_recovers() -> anyhow::Result<()> {
        let exec = executor(100);
        let err = exec
            .run(
                SETUP,
                None,
                "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r) SELECT COUNT(*) FROM r",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::Timeout { limit_ms: 100 }));

        let (_, result) = exec.run(SETUP, None, "SELECT * FROM customers").await?;
        assert_eq!(result.row_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn previous_session_state_does_not_leak() -> anyhow::Result<()> {
        let exec = executor(5_000);
        exec.run(
            "CREATE TABLE leftover (x INT); INSERT INTO leftover VALUES (1);",
            None,
            "SELECT 1",
        )
        .await?;
        let err = exec
            .run(SETUP, None, "SELECT * FROM leftover")
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::QuerySyntax { .. }));
        Ok(())
    }

    /// Delegates to SQLite and records whether the interrupter was fired.
    struct Recording {
        inner: crate::sandbox::SqliteEngine,
        interrupted: Arc<AtomicBool>,
    }

    impl SandboxEngine for Recording {
        fn namespace(&self) -> &str {
            self.inner.namespace()
        }
        fn reset(&mut self) -> Result<(), EngineError> {
            self.inner.reset()
        }
        fn apply(&mut self, statements: &[String]) -> Result<(), (usize, EngineError)> {
            self.inner.apply(statements)
        }
        fn table_stats(&mut self) -> Result<Vec<crate::sandbox::TableStats>, EngineError> {
            self.inner.table_stats()
        }
        fn query(&mut self, sql: &str, max_rows: usize) -> Result<QueryResult, EngineError> {
            self.inner.query(sql, max_rows)
        }
        fn interrupter(&self) -> Interrupter {
            let inner = self.inner.interrupter();
            let flag = self.interrupted.clone();
            Interrupter::new(move || {
                flag.store(true, Ordering::SeqCst);
                inner.fire();
            })
        }
    }

    #[tokio::test]
    async fn abandoned_query_is_interrupted_and_namespace_replaced() -> anyhow::Result<()> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        let pool = SandboxPool::with_factory(1, move |name| {
            Ok(Box::new(Recording {
                inner: crate::sandbox::SqliteEngine::open(name)?,
                interrupted: flag.clone(),
            }) as Box<dyn SandboxEngine>)
        })?;
        let exec = Executor::new(
            pool,
            ExecutorSettings {
                timeout_ms: 60_000,
                ..Default::default()
            },
        );

        let mut session = exec.session().await?;
        session.setup(SETUP, None).await?;
        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            session.query(
                "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r) SELECT COUNT(*) FROM r",
            ),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(interrupted.load(Ordering::SeqCst));
        drop(session);

        let mut next = exec.session().await?;
        let err = next.query("SELECT * FROM customers").await.unwrap_err();
        assert!(
            matches!(err, GradeError::QuerySyntax { ref message } if message.contains("no such table")),
            "{err:?}"
        );
        Ok(())
    }
}
