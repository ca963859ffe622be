//! Storage backend with failure injection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use vigil_core::error::{Error, Result};
use vigil_core::storage::{
    MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
};

#[derive(Debug, Default)]
struct PutFailurePlan {
    /// Puts allowed to succeed before failing.
    skip: usize,
    /// Puts still to fail.
    remaining: usize,
}

/// In-memory backend that fails on demand.
///
/// Failures are transient [`Error::Storage`] errors, the kind the index
/// trail retries.
#[derive(Debug, Clone, Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    plan: Arc<Mutex<PutFailurePlan>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    fail_all: Arc<AtomicBool>,
    put_attempts: Arc<AtomicUsize>,
    injected: Arc<AtomicUsize>,
}

impl FailingBackend {
    /// Creates a backend that does not fail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` puts.
    pub fn fail_next_puts(&self, count: usize) {
        self.fail_puts_after(0, count);
    }

    /// Lets `successes` puts through, then fails the next `failures`.
    pub fn fail_puts_after(&self, successes: usize, failures: usize) {
        let mut plan = self.plan.lock().expect("lock");
        plan.skip = successes;
        plan.remaining = failures;
    }

    /// Fails every operation on paths starting with `prefix`.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(prefix.into());
    }

    /// Fails every operation while `enabled`.
    pub fn fail_all(&self, enabled: bool) {
        self.fail_all.store(enabled, Ordering::SeqCst);
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        *self.plan.lock().expect("lock") = PutFailurePlan::default();
        self.fail_paths.lock().expect("lock").clear();
        self.fail_all.store(false, Ordering::SeqCst);
    }

    /// Number of put calls seen, including failed ones.
    #[must_use]
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// Number of failures injected so far.
    #[must_use]
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let by_path = self
            .fail_paths
            .lock()
            .expect("lock")
            .iter()
            .any(|p| path.starts_with(p));
        if by_path || self.fail_all.load(Ordering::SeqCst) {
            return Err(self.injected_error(path));
        }
        Ok(())
    }

    fn check_put_plan(&self, path: &str) -> Result<()> {
        let mut plan = self.plan.lock().expect("lock");
        if plan.remaining == 0 {
            return Ok(());
        }
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        plan.remaining -= 1;
        drop(plan);
        Err(self.injected_error(path))
    }

    fn injected_error(&self, path: &str) -> Error {
        self.injected.fetch_add(1, Ordering::SeqCst);
        Error::storage(format!("injected failure for path: {path}"))
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.check_failure(path)?;
        self.inner.get(path).await
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_failure(path)?;
        self.check_put_plan(path)?;
        self.inner.put(path, data, precondition).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_failure(path)?;
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.check_failure(prefix)?;
        self.inner.list(prefix).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.check_failure(path)?;
        self.inner.head(path).await
    }
}
