//! Claim coordination.
//!
//! The `ClaimCoordinator` is the only component that talks to the task
//! store. One claim attempt walks through:
//!
//! Pending -> Authorized -> ReadinessChecked -> TransitionValidated -> Committed
//!
//! Every stage except `Committed` is a pure check against freshly loaded
//! state. A version conflict on the committing write moves the attempt to
//! `Retrying`: the task and project are reloaded and every check runs
//! again, up to the retry policy's bound.

use crate::config::Config;
use crate::core::dag::{BlockedTask, DependencyGraph, TaskSnapshot};
use crate::core::lifecycle::TaskStateMachine;
use crate::core::task::{AgentId, Task, TaskId, TaskStatus, TaskUpdate, Version};
use crate::error::{Error, Result};
use crate::orchestration::retry::RetryPolicy;
use crate::rbac::{self, required_permission, Role, RoleSource};
use crate::store::{ProjectContext, StoreError, TaskStore};
use crate::{tlog, tlog_debug, tlog_error, tlog_warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One agent's request to move one task to a new status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentClaim {
    pub agent_id: AgentId,
    pub role: Role,
    pub task_id: TaskId,
    pub target: TaskStatus,
}

impl AgentClaim {
    pub fn new(agent_id: AgentId, role: Role, task_id: impl Into<TaskId>, target: TaskStatus) -> Self {
        Self {
            agent_id,
            role,
            task_id: task_id.into(),
            target,
        }
    }
}

/// Progress of a single claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStage {
    Pending,
    Authorized,
    ReadinessChecked,
    TransitionValidated,
    Committed,
    Retrying,
    Failed,
}

impl std::fmt::Display for ClaimStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimStage::Pending => write!(f, "pending"),
            ClaimStage::Authorized => write!(f, "authorized"),
            ClaimStage::ReadinessChecked => write!(f, "readiness_checked"),
            ClaimStage::TransitionValidated => write!(f, "transition_validated"),
            ClaimStage::Committed => write!(f, "committed"),
            ClaimStage::Retrying => write!(f, "retrying"),
            ClaimStage::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    /// Status the committed attempt moved the task from.
    pub from: TaskStatus,
    pub status: TaskStatus,
    /// Version token issued by the store for the committed write.
    pub version: Version,
    /// Attempts used, including the committed one.
    pub attempts: u32,
    /// Stages passed by the committed attempt.
    pub stages: Vec<ClaimStage>,
}

/// Events emitted by the coordinator.
///
/// These allow observers (dashboards, schedulers) to follow claims without
/// polling the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimEvent {
    /// A transition was written.
    Committed {
        task_id: TaskId,
        agent_id: AgentId,
        status: TaskStatus,
        attempts: u32,
    },
    /// The committing write lost an optimistic version check.
    Conflict {
        task_id: TaskId,
        agent_id: AgentId,
        attempt: u32,
    },
    /// The claim failed for good.
    Rejected {
        task_id: TaskId,
        agent_id: AgentId,
        reason: String,
    },
}

/// Whether moving to `target` starts or resumes active work.
fn enters_active_work(target: TaskStatus) -> bool {
    matches!(target, TaskStatus::Claimed | TaskStatus::InProgress)
}

/// Orchestrates permission, readiness and transition checks around a
/// conditional store write.
///
/// Holds no mutable state of its own; one coordinator can serve any number
/// of concurrent agents.
pub struct ClaimCoordinator {
    store: Arc<dyn TaskStore>,
    roles: Arc<dyn RoleSource>,
    project: ProjectContext,
    lifecycle: TaskStateMachine,
    retry: RetryPolicy,
    event_tx: Option<mpsc::Sender<ClaimEvent>>,
}

impl ClaimCoordinator {
    /// Create a coordinator with the default retry policy.
    pub fn new(
        store: Arc<dyn TaskStore>,
        roles: Arc<dyn RoleSource>,
        project: ProjectContext,
    ) -> Self {
        Self {
            store,
            roles,
            project,
            lifecycle: TaskStateMachine::new(),
            retry: RetryPolicy::default(),
            event_tx: None,
        }
    }

    /// Create a coordinator whose role catalog and retry policy come from
    /// `config`.
    pub fn from_config(
        store: Arc<dyn TaskStore>,
        project: ProjectContext,
        config: &Config,
    ) -> Result<Self> {
        let catalog = config.role_catalog()?;
        Ok(Self::new(store, Arc::new(catalog), project).with_retry_policy(config.claim.retry_policy()))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Emit [`ClaimEvent`]s on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<ClaimEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn project(&self) -> &ProjectContext {
        &self.project
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Publish without waiting; a full or closed channel drops the event.
    fn emit(&self, event: ClaimEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tlog_warn!("claim event dropped, observer lagging: {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tlog_debug!("claim event dropped, observer gone");
            }
        }
    }

    // ========== Read-side operations ==========

    /// Snapshot of every task in the project.
    pub async fn snapshot(&self) -> Result<TaskSnapshot> {
        let tasks = self
            .store
            .list_tasks_in_project(&self.project.project_id)
            .await?;
        TaskSnapshot::from_tasks(&tasks)
    }

    /// Ready tasks of the project, ascending by id.
    pub async fn ready_tasks(&self) -> Result<Vec<TaskId>> {
        Ok(self.snapshot().await?.ready_tasks())
    }

    /// Blocked backlog tasks of the project with their unmet dependencies.
    pub async fn blocked_tasks(&self) -> Result<Vec<BlockedTask>> {
        Ok(self.snapshot().await?.blocked_tasks())
    }

    /// Dependency order of every task in the project.
    pub async fn topological_order(&self) -> Result<Vec<TaskId>> {
        let snapshot = self.snapshot().await?;
        DependencyGraph::build(&snapshot).topological_sort()
    }

    /// Check a transition without touching the store.
    pub fn validate_transition(&self, from: TaskStatus, to: TaskStatus) -> Result<()> {
        self.lifecycle.validate_transition(from, to)
    }

    /// Check a permission without touching the store.
    pub fn require_permission(&self, role: Role, requested: &str) -> Result<()> {
        rbac::require_permission(self.roles.as_ref(), role, requested)
    }

    // ========== Claim ==========

    /// Load the task and a project snapshot that reflects it.
    async fn load(&self, task_id: &TaskId) -> Result<(Task, TaskSnapshot)> {
        let task = self.store.get_task(task_id).await.map_err(|err| match err {
            StoreError::NotFound(id) => Error::TaskNotFound(id),
            other => Error::Store(other),
        })?;
        let tasks = self
            .store
            .list_tasks_in_project(&self.project.project_id)
            .await?;
        let mut snapshot = TaskSnapshot::from_tasks(tasks.iter().filter(|t| t.id != task.id))?;
        snapshot.insert(task.id.clone(), task.status, task.depends_on.clone())?;
        Ok((task, snapshot))
    }

    /// Run the pure checks of one attempt, recording passed stages.
    fn check(
        &self,
        claim: &AgentClaim,
        task: &Task,
        snapshot: &TaskSnapshot,
        stages: &mut Vec<ClaimStage>,
    ) -> Result<()> {
        let action = required_permission(task.status, claim.target);
        self.require_permission(claim.role, action)?;
        stages.push(ClaimStage::Authorized);

        if enters_active_work(claim.target) {
            let unmet = snapshot.unmet_dependencies(&claim.task_id);
            if !unmet.is_empty() {
                return Err(Error::TaskNotReady {
                    task_id: claim.task_id.clone(),
                    unmet: unmet.iter().map(|dep| dep.task_id().clone()).collect(),
                });
            }
        }
        stages.push(ClaimStage::ReadinessChecked);

        self.lifecycle.validate_transition(task.status, claim.target)?;
        stages.push(ClaimStage::TransitionValidated);
        Ok(())
    }

    fn reject(&self, claim: &AgentClaim, err: Error) -> Result<ClaimReceipt> {
        tlog_debug!(
            "claim {} -> {} by {} rejected: {}",
            claim.task_id,
            claim.target,
            claim.agent_id.short(),
            err
        );
        self.emit(ClaimEvent::Rejected {
            task_id: claim.task_id.clone(),
            agent_id: claim.agent_id.clone(),
            reason: err.to_string(),
        });
        Err(err)
    }

    /// Move `claim.task_id` to `claim.target` on behalf of `claim.agent_id`.
    ///
    /// Permission, readiness (for `Claimed`/`InProgress` targets) and
    /// transition legality are checked against freshly loaded state before
    /// a conditional write at the loaded version. On a version conflict the
    /// whole attempt is repeated after a jittered backoff. If the reload
    /// shows another agent changed the task's status or assignee in the
    /// meantime, the race is lost and the claim fails at once.
    ///
    /// # Errors
    /// - [`Error::PermissionDenied`], [`Error::TaskNotReady`],
    ///   [`Error::InvalidTransition`]: validation failures, never retried
    /// - [`Error::SelfDependency`]: some task in the project lists itself as
    ///   a dependency. The whole project snapshot is rejected, so this fails
    ///   claims on unrelated tasks too until the record is fixed
    /// - [`Error::ClaimConflict`]: lost the race or ran out of attempts
    /// - [`Error::Cancelled`]: `cancel` fired before a commit
    /// - [`Error::TaskNotFound`], [`Error::Store`]: store failures
    pub async fn claim(&self, claim: &AgentClaim, cancel: &CancellationToken) -> Result<ClaimReceipt> {
        let mut attempt: u32 = 0;
        let mut observed: Option<(TaskStatus, Option<AgentId>)> = None;

        loop {
            if cancel.is_cancelled() {
                return self
                    .reject(claim, Error::Cancelled { task_id: claim.task_id.clone() });
            }
            attempt += 1;
            let mut stages = vec![ClaimStage::Pending];

            let (task, snapshot) = match self.load(&claim.task_id).await {
                Ok(loaded) => loaded,
                Err(err) => {
                    if matches!(err, Error::Store(_)) {
                        tlog_error!("claim {}: store read failed: {}", claim.task_id, err);
                    }
                    return self.reject(claim, err);
                }
            };

            if let Some((status, assignee)) = &observed {
                if *status != task.status || *assignee != task.assignee {
                    tlog_warn!(
                        "claim {} by {}: lost race, task is now {} ({})",
                        claim.task_id,
                        claim.agent_id.short(),
                        task.status,
                        task.assignee.as_ref().map(AgentId::as_str).unwrap_or("unassigned")
                    );
                    let err = Error::ClaimConflict {
                        task_id: claim.task_id.clone(),
                        attempts: attempt - 1,
                    };
                    return self.reject(claim, err);
                }
            }

            if let Err(err) = self.check(claim, &task, &snapshot, &mut stages) {
                return self.reject(claim, err);
            }
            tlog_debug!(
                "claim {} -> {} by {} attempt {}: {}",
                claim.task_id,
                claim.target,
                claim.agent_id.short(),
                attempt,
                stages
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" -> ")
            );

            let update = TaskUpdate::transition(claim.target, &claim.agent_id);
            match self
                .store
                .conditional_update(&claim.task_id, &task.version, update)
                .await
                .map_err(Error::from)
            {
                Ok(version) => {
                    stages.push(ClaimStage::Committed);
                    tlog!(
                        "task {} {} -> {} by {} (attempt {})",
                        claim.task_id,
                        task.status,
                        claim.target,
                        claim.agent_id.short(),
                        attempt
                    );
                    self.emit(ClaimEvent::Committed {
                        task_id: claim.task_id.clone(),
                        agent_id: claim.agent_id.clone(),
                        status: claim.target,
                        attempts: attempt,
                    });
                    return Ok(ClaimReceipt {
                        task_id: claim.task_id.clone(),
                        agent_id: claim.agent_id.clone(),
                        from: task.status,
                        status: claim.target,
                        version,
                        attempts: attempt,
                        stages,
                    });
                }
                Err(err) if err.is_retryable() => {
                    stages.push(ClaimStage::Retrying);
                    tlog_warn!(
                        "claim by {}: {} (attempt {}/{})",
                        claim.agent_id.short(),
                        err,
                        attempt,
                        self.retry.max_attempts()
                    );
                    self.emit(ClaimEvent::Conflict {
                        task_id: claim.task_id.clone(),
                        agent_id: claim.agent_id.clone(),
                        attempt,
                    });

                    if !self.retry.allows_retry(attempt) {
                        let err = Error::ClaimConflict {
                            task_id: claim.task_id.clone(),
                            attempts: attempt,
                        };
                        return self.reject(claim, err);
                    }
                    observed = Some((task.status, task.assignee.clone()));

                    let delay = self.retry.delay(attempt);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let err = Error::Cancelled { task_id: claim.task_id.clone() };
                            return self.reject(claim, err);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(Error::Store(StoreError::NotFound(id))) => {
                    return self.reject(claim, Error::TaskNotFound(id));
                }
                Err(err) => {
                    tlog_error!("claim {}: store write failed: {}", claim.task_id, err);
                    return self.reject(claim, err);
                }
            }
        }
    }

    /// Claim the first ready task, in dependency order, that this agent can
    /// win.
    ///
    /// Tasks lost to other agents, or no longer ready by the time they are
    /// attempted, are skipped. Returns `Ok(None)` when nothing is left.
    /// A cyclic project falls back to ascending id order among ready tasks.
    pub async fn claim_next(
        &self,
        agent_id: &AgentId,
        role: Role,
        cancel: &CancellationToken,
    ) -> Result<Option<ClaimReceipt>> {
        let snapshot = self.snapshot().await?;
        let ready = snapshot.ready_tasks();
        let candidates = match DependencyGraph::build(&snapshot).topological_sort() {
            Ok(order) => order.into_iter().filter(|id| ready.contains(id)).collect(),
            Err(err) => {
                tlog_warn!("claim_next: {}; using id order", err);
                ready
            }
        };

        for task_id in candidates {
            let claim = AgentClaim::new(agent_id.clone(), role, task_id, TaskStatus::Claimed);
            match self.claim(&claim, cancel).await {
                Ok(receipt) => return Ok(Some(receipt)),
                Err(
                    Error::ClaimConflict { .. }
                    | Error::TaskNotReady { .. }
                    | Error::InvalidTransition { .. }
                    | Error::TaskNotFound(_),
                ) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for ClaimCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimCoordinator")
            .field("project", &self.project.project_id)
            .field("max_attempts", &self.retry.max_attempts())
            .field("events", &self.event_tx.is_some())
            .finish()
    }
}
