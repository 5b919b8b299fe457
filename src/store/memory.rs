//! In-process [`TaskStore`] implementation.
//!
//! Versions are a per-store counter, so every accepted write produces a
//! token no earlier read could hold.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{StoreError, TaskStore};
use crate::core::task::{Task, TaskId, TaskUpdate, Version};
use crate::error::Result;
use crate::tlog_trace;

/// Serialized form used by [`InMemoryTaskStore::from_json`].
#[derive(Debug, Serialize, Deserialize)]
struct StoreDump {
    projects: BTreeMap<String, Vec<Task>>,
}

/// Task store backed by a map guarded by an async `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    /// project id -> task id -> task
    projects: RwLock<BTreeMap<String, BTreeMap<TaskId, Task>>>,
    next_version: AtomicU64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_version(&self) -> Version {
        let n = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        Version::new(n.to_string())
    }

    /// Insert or replace a task, assigning it a fresh version.
    pub async fn insert(&self, project_id: &str, mut task: Task) -> Version {
        let version = self.issue_version();
        task.version = version.clone();
        task.updated_at = Utc::now();
        self.projects
            .write()
            .await
            .entry(project_id.to_string())
            .or_default()
            .insert(task.id.clone(), task);
        version
    }

    /// Insert many tasks into one project.
    pub async fn seed<I>(&self, project_id: &str, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        for task in tasks {
            self.insert(project_id, task).await;
        }
    }

    /// Load a store from JSON of the form `{"projects": {"<id>": [tasks]}}`.
    pub async fn from_json(json: &str) -> Result<Self> {
        let dump: StoreDump = serde_json::from_str(json)?;
        let store = Self::new();
        for (project_id, tasks) in dump.projects {
            store.seed(&project_id, tasks).await;
        }
        Ok(store)
    }

    /// Serialize every project to JSON.
    pub async fn to_json(&self) -> Result<String> {
        let projects = self.projects.read().await;
        let dump = StoreDump {
            projects: projects
                .iter()
                .map(|(project, tasks)| (project.clone(), tasks.values().cloned().collect()))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&dump)?)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, id: &TaskId) -> std::result::Result<Task, StoreError> {
        let projects = self.projects.read().await;
        projects
            .values()
            .find_map(|tasks| tasks.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list_tasks_in_project(
        &self,
        project_id: &str,
    ) -> std::result::Result<Vec<Task>, StoreError> {
        let projects = self.projects.read().await;
        Ok(projects
            .get(project_id)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn conditional_update(
        &self,
        id: &TaskId,
        version: &Version,
        update: TaskUpdate,
    ) -> std::result::Result<Version, StoreError> {
        let mut projects = self.projects.write().await;
        let task = projects
            .values_mut()
            .find_map(|tasks| tasks.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if &task.version != version {
            tlog_trace!(
                "memory store: conflict on {} (expected {}, have {})",
                id,
                version,
                task.version
            );
            return Err(StoreError::VersionConflict {
                task_id: id.clone(),
                expected: version.clone(),
                actual: Some(task.version.clone()),
            });
        }

        let new_version = self.issue_version();
        update.apply(task);
        task.version = new_version.clone();
        task.updated_at = Utc::now();
        Ok(new_version)
    }
}
