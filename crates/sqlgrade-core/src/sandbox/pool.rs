use super::{EngineError, SandboxEngine, SqliteEngine};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type Factory = dyn Fn(&str) -> Result<Box<dyn SandboxEngine>, EngineError> + Send + Sync;

struct PoolInner {
    free: Mutex<Vec<Box<dyn SandboxEngine>>>,
    factory: Box<Factory>,
}

impl PoolInner {
    fn free(&self) -> MutexGuard<'_, Vec<Box<dyn SandboxEngine>>> {
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fixed set of namespaces (`sandbox_1` .. `sandbox_n`). A lease gives one
/// caller exclusive use of a namespace until it is dropped.
#[derive(Clone)]
pub struct SandboxPool {
    sem: Arc<Semaphore>,
    inner: Arc<PoolInner>,
    size: usize,
}

impl SandboxPool {
    pub fn new(size: usize) -> Result<Self, EngineError> {
        Self::with_factory(size, |name| {
            SqliteEngine::open(name).map(|e| Box::new(e) as Box<dyn SandboxEngine>)
        })
    }

    pub fn with_factory<F>(size: usize, factory: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Result<Box<dyn SandboxEngine>, EngineError> + Send + Sync + 'static,
    {
        let size = size.max(1);
        let mut free = Vec::with_capacity(size);
        for n in (1..=size).rev() {
            free.push(factory(&namespace_name(n))?);
        }
        Ok(Self {
            sem: Arc::new(Semaphore::new(size)),
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                factory: Box::new(factory),
            }),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Waits for a free namespace.
    pub async fn acquire(&self) -> Result<SandboxLease, EngineError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::other(format!("sandbox pool closed: {}", e)))?;
        let engine = self
            .inner
            .free()
            .pop()
            .ok_or_else(|| EngineError::other("sandbox pool is empty"))?;
        let name = engine.namespace().to_string();
        tracing::debug!(event = "sandbox_acquire", namespace = %name);
        Ok(SandboxLease {
            name,
            engine: Some(engine),
            poisoned: false,
            inner: self.inner.clone(),
            permit: Some(permit),
        })
    }
}

fn namespace_name(n: usize) -> String {
    format!("sandbox_{}", n)
}

/// Exclusive use of one namespace. On drop the namespace goes back to the
/// pool; a poisoned or lost engine is replaced with a fresh one first. If
/// that fails for a lost engine, the namespace is retired for good.
pub struct SandboxLease {
    name: String,
    engine: Option<Box<dyn SandboxEngine>>,
    poisoned: bool,
    inner: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl SandboxLease {
    pub fn namespace(&self) -> &str {
        &self.name
    }

    /// Marks the namespace unusable, e.g. after a cancelled statement.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub(crate) fn take(&mut self) -> Option<Box<dyn SandboxEngine>> {
        self.engine.take()
    }

    pub(crate) fn restore(&mut self, engine: Box<dyn SandboxEngine>) {
        self.engine = Some(engine);
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        let engine = match self.engine.take() {
            Some(e) if !self.poisoned => e,
            old => match (self.inner.factory)(&self.name) {
                Ok(fresh) => {
                    tracing::warn!(event = "sandbox_replaced", namespace = %self.name);
                    fresh
                }
                Err(e) => match old {
                    Some(old) => {
                        tracing::error!(event = "sandbox_replace_failed", namespace = %self.name, error = %e);
                        old
                    }
                    None => {
                        // the pool shrinks by one; its permit must not come back
                        tracing::error!(event = "sandbox_lost", namespace = %self.name, error = %e);
                        if let Some(permit) = self.permit.take() {
                            permit.forget();
                        }
                        return;
                    }
                },
            },
        };
        self.inner.free().push(engine);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn leases_are_exclusive_and_returned() -> anyhow::Result<()> {
        let pool = SandboxPool::new(2)?;
        let a = pool.acquire().await?;
        let b = pool.acquire().await?;
        assert_ne!(a.namespace(), b.namespace());
        assert_eq!(pool.available(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err());

        drop(a);
        let c = tokio::time::timeout(Duration::from_millis(500), pool.acquire()).await??;
        assert!(c.namespace().starts_with("sandbox_"));
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn poisoned_namespace_comes_back_empty() -> anyhow::Result<()> {
        let pool = SandboxPool::new(1)?;
        let mut lease = pool.acquire().await?;
        let mut engine = lease.take().expect("engine");
        engine
            .apply(&["CREATE TABLE t (x INT)".to_string()])
            .map_err(|(_, e)| e)?;
        lease.restore(engine);
        lease.poison();
        drop(lease);

        let mut lease = pool.acquire().await?;
        let mut engine = lease.take().expect("engine");
        assert!(engine.table_stats()?.is_empty());
        lease.restore(engine);
        Ok(())
    }

    #[tokio::test]
    async fn lost_engine_is_recreated() -> anyhow::Result<()> {
        let pool = SandboxPool::new(1)?;
        let mut lease = pool.acquire().await?;
        drop(lease.take());
        drop(lease);
        let lease = pool.acquire().await?;
        assert_eq!(lease.namespace(), "sandbox_1");
        Ok(())
    }

    #[tokio::test]
    async fn unrecoverable_namespace_is_retired_with_its_permit() -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let pool = SandboxPool::with_factory(2, move |name| {
            if counter.fetch_add(1, Ordering::SeqCst) >= 2 {
                return Err(EngineError::other("out of memory"));
            }
            SqliteEngine::open(name).map(|e| Box::new(e) as Box<dyn SandboxEngine>)
        })?;

        let mut lease = pool.acquire().await?;
        drop(lease.take());
        drop(lease);
        assert_eq!(pool.available(), 1);

        for _ in 0..3 {
            let lease = pool.acquire().await?;
            assert!(lease.namespace().starts_with("sandbox_"));
        }
        let blocked = {
            let _held = pool.acquire().await?;
            tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await
        };
        assert!(blocked.is_err());
        Ok(())
    }
}
