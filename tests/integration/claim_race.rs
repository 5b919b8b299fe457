//! Concurrent claim integration tests.
//!
//! These tests verify that the conditional write is the only arbiter of a
//! claim: racing agents never both win, and conflicts are retried against
//! fresh state up to the policy bound.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tasklane::core::{AgentId, TaskId, TaskStatus};
use tasklane::rbac::Role;
use tasklane::store::{InMemoryTaskStore, TaskStore};
use tasklane::{AgentClaim, ClaimEvent, Error, RetryPolicy};

use crate::fixtures::{
    chain_tasks, coordinator, independent_tasks, seeded_store, RacingStore, ScriptedStore,
};

/// Test: Two agents racing for one task
/// Given two agents that load task A at the same version
/// When both try to claim it
/// Then exactly one succeeds and the other gets ClaimConflict
#[tokio::test]
async fn test_two_agents_race_exactly_one_wins() {
    let store = Arc::new(RacingStore::new(seeded_store(chain_tasks()).await, 2));
    let coordinator = coordinator(store.clone());
    let cancel = CancellationToken::new();

    let claims: Vec<AgentClaim> = ["agent-1", "agent-2"]
        .into_iter()
        .map(|agent| AgentClaim::new(AgentId::from(agent), Role::Developer, "A", TaskStatus::Claimed))
        .collect();
    let results = join_all(claims.iter().map(|claim| coordinator.claim(claim, &cancel))).await;

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "Exactly one claim should commit: {:?}", results);

    let loser = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("One claim should fail");
    assert!(
        matches!(loser, Error::ClaimConflict { task_id, .. } if task_id.as_str() == "A"),
        "Loser should see ClaimConflict, got {:?}",
        loser
    );

    let task = store.inner().get_task(&TaskId::from("A")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Claimed);
    assert_eq!(task.assignee.as_ref(), Some(&winners[0].agent_id));
}

/// Test: A single injected mismatch is retried
/// Given a store that rejects the first write once
/// When an agent claims a ready task
/// Then the claim commits on the second attempt
#[tokio::test]
async fn test_conflict_once_then_commit() {
    let store = Arc::new(ScriptedStore::new(seeded_store(chain_tasks()).await, 1));
    let coordinator = coordinator(store.clone());

    let claim = AgentClaim::new(AgentId::from("agent-1"), Role::Developer, "A", TaskStatus::Claimed);
    let receipt = coordinator
        .claim(&claim, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(receipt.attempts, 2);
    assert_eq!(store.writes(), 2);
    let task = store.inner().get_task(&TaskId::from("A")).await.unwrap();
    assert_eq!(task.version, receipt.version);
}

/// Test: Retry budget is bounded
/// Given a store that always reports a version mismatch
/// When an agent claims a task
/// Then ClaimConflict is returned after the default three attempts
#[tokio::test]
async fn test_conflicts_exhaust_retry_budget() {
    let store = Arc::new(ScriptedStore::new(seeded_store(chain_tasks()).await, u32::MAX));
    let (tx, mut rx) = mpsc::channel(16);
    let coordinator = coordinator(store.clone()).with_events(tx);

    let claim = AgentClaim::new(AgentId::from("agent-1"), Role::Developer, "A", TaskStatus::Claimed);
    let err = coordinator
        .claim(&claim, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ClaimConflict { attempts: 3, .. }));
    assert_eq!(store.writes(), 3);
    assert_eq!(
        store.inner().get_task(&TaskId::from("A")).await.unwrap().status,
        TaskStatus::Backlog
    );

    drop(coordinator);
    let mut conflicts = 0;
    let mut rejected = 0;
    while let Some(event) = rx.recv().await {
        match event {
            ClaimEvent::Conflict { .. } => conflicts += 1,
            ClaimEvent::Rejected { .. } => rejected += 1,
            ClaimEvent::Committed { .. } => panic!("Nothing should commit"),
        }
    }
    assert_eq!(conflicts, 3);
    assert_eq!(rejected, 1);
}

/// Test: Validation failures are never retried
/// Given a task whose dependency is incomplete
/// When an agent claims it
/// Then TaskNotReady is returned without any write
#[tokio::test]
async fn test_not_ready_is_not_retried() {
    let store = Arc::new(ScriptedStore::new(seeded_store(chain_tasks()).await, 0));
    let coordinator = coordinator(store.clone());

    let claim = AgentClaim::new(AgentId::from("agent-1"), Role::Developer, "B", TaskStatus::Claimed);
    let err = coordinator
        .claim(&claim, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TaskNotReady { ref unmet, .. } if unmet == &vec![TaskId::from("A")]));
    assert_eq!(store.writes(), 0);
}

/// Test: Full lifecycle by one agent
/// Given a ready task
/// When an agent claims, starts, submits and gets approved
/// Then each step commits and the dependent task becomes ready
#[tokio::test]
async fn test_full_lifecycle_unblocks_dependent() {
    let store = Arc::new(seeded_store(chain_tasks()).await);
    let coordinator = coordinator(store.clone());
    let cancel = CancellationToken::new();
    let dev = AgentId::from("dev");
    let qa = AgentId::from("qa");

    for (agent, role, target) in [
        (&dev, Role::Developer, TaskStatus::Claimed),
        (&dev, Role::Developer, TaskStatus::InProgress),
        (&dev, Role::Developer, TaskStatus::InReview),
        (&qa, Role::QA, TaskStatus::Completed),
    ] {
        let claim = AgentClaim::new(agent.clone(), role, "A", target);
        let receipt = coordinator.claim(&claim, &cancel).await.unwrap();
        assert_eq!(receipt.status, target);
    }

    assert_eq!(coordinator.ready_tasks().await.unwrap(), vec![TaskId::from("B")]);
}

/// Test: Many agents draining a backlog
/// Given 12 independent tasks and 6 agents on a multi-threaded runtime
/// When every agent keeps calling claim_next until nothing is left
/// Then every task is claimed exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_agents_claim_each_task_once() {
    let store = Arc::new(seeded_store(independent_tasks(12)).await);
    let coordinator = Arc::new(
        coordinator(store.clone()).with_retry_policy(RetryPolicy::new(
            5,
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(5),
            0.5,
        )),
    );
    let cancel = CancellationToken::new();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let agent = AgentId::new(format!("agent-{}", i));
                let mut won = Vec::new();
                while let Some(receipt) = coordinator
                    .claim_next(&agent, Role::Developer, &cancel)
                    .await
                    .unwrap()
                {
                    won.push(receipt.task_id);
                }
                won
            })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }

    let unique: BTreeSet<_> = claimed.iter().cloned().collect();
    assert_eq!(claimed.len(), 12, "Each task should be claimed once: {:?}", claimed);
    assert_eq!(unique.len(), 12);

    let tasks = store.list_tasks_in_project(crate::fixtures::PROJECT).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Claimed && t.assignee.is_some()));
}

/// Test: Cancellation stops a claim before any write
#[tokio::test]
async fn test_cancelled_claim_writes_nothing() {
    let store = Arc::new(ScriptedStore::new(InMemoryTaskStore::new(), 0));
    store.inner().seed(crate::fixtures::PROJECT, chain_tasks()).await;
    let coordinator = coordinator(store.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let claim = AgentClaim::new(AgentId::from("agent-1"), Role::Developer, "A", TaskStatus::Claimed);
    let err = coordinator.claim(&claim, &cancel).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled { .. }));
    assert_eq!(store.writes(), 0);
}
