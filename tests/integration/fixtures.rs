//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Seeding an in-memory store with predefined task sets
//! - Store stubs that force or script version conflicts
//! - Building coordinators without backoff delays

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Barrier;

use tasklane::core::{Task, TaskId, TaskUpdate, Version};
use tasklane::rbac::{Role, RoleCatalog};
use tasklane::store::{InMemoryTaskStore, ProjectContext, StoreError, TaskStore};
use tasklane::{ClaimCoordinator, RetryPolicy};

pub const PROJECT: &str = "proj-1";

pub fn context() -> ProjectContext {
    ProjectContext::new(PROJECT, "org-1", Role::Developer)
}

/// A -> B -> C, all in the backlog.
pub fn chain_tasks() -> Vec<Task> {
    vec![
        Task::new("A", "Schema"),
        Task::new("B", "API").with_dependencies(["A"]),
        Task::new("C", "UI").with_dependencies(["B"]),
    ]
}

/// X and Y depend on each other.
pub fn cycle_tasks() -> Vec<Task> {
    vec![
        Task::new("X", "x").with_dependencies(["Y"]),
        Task::new("Y", "y").with_dependencies(["X"]),
    ]
}

/// `n` independent backlog tasks named `t00`, `t01`, ...
pub fn independent_tasks(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| Task::new(format!("t{:02}", i), "independent"))
        .collect()
}

pub async fn seeded_store(tasks: Vec<Task>) -> InMemoryTaskStore {
    let store = InMemoryTaskStore::new();
    store.seed(PROJECT, tasks).await;
    store
}

/// Coordinator with built-in roles and immediate retries.
pub fn coordinator(store: Arc<dyn TaskStore>) -> ClaimCoordinator {
    ClaimCoordinator::new(store, Arc::new(RoleCatalog::builtin()), context())
        .with_retry_policy(RetryPolicy::immediate(RetryPolicy::DEFAULT_MAX_ATTEMPTS))
}

/// Store whose first `parties` task reads wait for each other, so that
/// that many agents start from the same version.
pub struct RacingStore {
    inner: InMemoryTaskStore,
    barrier: Barrier,
    parties: usize,
    reads: AtomicUsize,
}

impl RacingStore {
    pub fn new(inner: InMemoryTaskStore, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            parties,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &InMemoryTaskStore {
        &self.inner
    }
}

#[async_trait]
impl TaskStore for RacingStore {
    async fn get_task(&self, id: &TaskId) -> Result<Task, StoreError> {
        let task = self.inner.get_task(id).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait().await;
        }
        Ok(task)
    }

    async fn list_tasks_in_project(&self, project_id: &str) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks_in_project(project_id).await
    }

    async fn conditional_update(
        &self,
        id: &TaskId,
        version: &Version,
        update: TaskUpdate,
    ) -> Result<Version, StoreError> {
        self.inner.conditional_update(id, version, update).await
    }
}

/// Store that reports a version mismatch for the first `conflicts`
/// writes without changing the record.
pub struct ScriptedStore {
    inner: InMemoryTaskStore,
    conflicts: AtomicU32,
    writes: AtomicU32,
}

impl ScriptedStore {
    pub fn new(inner: InMemoryTaskStore, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(conflicts),
            writes: AtomicU32::new(0),
        }
    }

    /// Conditional writes attempted so far.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryTaskStore {
        &self.inner
    }
}

#[async_trait]
impl TaskStore for ScriptedStore {
    async fn get_task(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.inner.get_task(id).await
    }

    async fn list_tasks_in_project(&self, project_id: &str) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks_in_project(project_id).await
    }

    async fn conditional_update(
        &self,
        id: &TaskId,
        version: &Version,
        update: TaskUpdate,
    ) -> Result<Version, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::VersionConflict {
                task_id: id.clone(),
                expected: version.clone(),
                actual: None,
            });
        }
        self.inner.conditional_update(id, version, update).await
    }
}
