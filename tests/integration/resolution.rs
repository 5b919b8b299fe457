//! Dependency resolution integration tests.
//!
//! These tests verify ordering, readiness and cycle reporting on project
//! snapshots loaded through the coordinator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tasklane::core::{DependencyGraph, Task, TaskId, TaskSnapshot, TaskStatus, UnmetDependency};
use tasklane::rbac::Role;
use tasklane::store::InMemoryTaskStore;
use tasklane::Error;

use crate::fixtures::{chain_tasks, coordinator, cycle_tasks, seeded_store};

fn ids(names: &[&str]) -> Vec<TaskId> {
    names.iter().map(|n| TaskId::from(*n)).collect()
}

/// Test: Linear chain
/// Given A <- B <- C, all in the backlog
/// When the project is resolved
/// Then the order is [A, B, C] and only A is ready
#[tokio::test]
async fn test_chain_order_and_readiness() {
    let store = Arc::new(seeded_store(chain_tasks()).await);
    let coordinator = coordinator(store);

    assert_eq!(coordinator.topological_order().await.unwrap(), ids(&["A", "B", "C"]));
    assert_eq!(coordinator.ready_tasks().await.unwrap(), ids(&["A"]));

    let blocked = coordinator.blocked_tasks().await.unwrap();
    assert_eq!(blocked.len(), 2);
    assert_eq!(blocked[0].task_id, TaskId::from("B"));
    assert_eq!(blocked[0].unmet_ids(), ids(&["A"]));
    assert_eq!(blocked[1].task_id, TaskId::from("C"));
}

/// Test: Two-task cycle
/// Given X depends on Y and Y depends on X
/// When the project is resolved
/// Then one cycle containing both is reported and sorting fails
#[tokio::test]
async fn test_cycle_detected_and_sort_fails() {
    let store = Arc::new(seeded_store(cycle_tasks()).await);
    let coordinator = coordinator(store);

    let snapshot = coordinator.snapshot().await.unwrap();
    let cycles = DependencyGraph::build(&snapshot).detect_cycles();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].contains(&TaskId::from("X")));
    assert!(cycles[0].contains(&TaskId::from("Y")));

    match coordinator.topological_order().await {
        Err(Error::CyclicDependency { cycles, unresolved }) => {
            assert_eq!(cycles.len(), 1);
            assert_eq!(unresolved, ids(&["X", "Y"]));
        }
        other => panic!("Expected CyclicDependency, got {:?}", other),
    }

    // Nothing in a cycle is ever ready, so nothing can be claimed.
    assert!(coordinator.ready_tasks().await.unwrap().is_empty());
    let next = coordinator
        .claim_next(&"agent".into(), Role::Developer, &CancellationToken::new())
        .await
        .unwrap();
    assert!(next.is_none());
}

/// Test: Dangling dependency
/// Given B depends on a task that does not exist
/// When readiness is evaluated
/// Then B is blocked on the missing id and sorting still succeeds
#[tokio::test]
async fn test_missing_dependency_blocks_but_sorts() {
    let store = Arc::new(
        seeded_store(vec![
            Task::new("A", "a"),
            Task::new("B", "b").with_dependencies(["ghost"]),
        ])
        .await,
    );
    let coordinator = coordinator(store);

    assert_eq!(coordinator.ready_tasks().await.unwrap(), ids(&["A"]));
    let blocked = coordinator.blocked_tasks().await.unwrap();
    assert_eq!(
        blocked[0].unmet,
        vec![UnmetDependency::Missing {
            task_id: TaskId::from("ghost")
        }]
    );
    assert_eq!(coordinator.topological_order().await.unwrap(), ids(&["A", "B"]));
}

/// Test: Completing a dependency unblocks its dependents
#[tokio::test]
async fn test_completed_dependency_unblocks() {
    let store = Arc::new(
        seeded_store(vec![
            Task::new("A", "a").with_status(TaskStatus::Completed),
            Task::new("B", "b").with_dependencies(["A"]),
            Task::new("C", "c").with_dependencies(["A", "B"]),
        ])
        .await,
    );
    let coordinator = coordinator(store);

    assert_eq!(coordinator.ready_tasks().await.unwrap(), ids(&["B"]));
    let blocked = coordinator.blocked_tasks().await.unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].unmet_ids(), ids(&["B"]));
}

/// Test: Self-dependency is rejected when the snapshot is built
#[tokio::test]
async fn test_self_dependency_rejected() {
    let store = Arc::new(seeded_store(vec![Task::new("S", "s").with_dependencies(["S"])]).await);
    let coordinator = coordinator(store);

    assert!(matches!(
        coordinator.ready_tasks().await,
        Err(Error::SelfDependency { task_id }) if task_id.as_str() == "S"
    ));
}

/// Test: Store dump round trip keeps dependency structure
#[tokio::test]
async fn test_store_json_preserves_graph() {
    let store = seeded_store(chain_tasks()).await;
    let json = store.to_json().await.unwrap();
    let restored = InMemoryTaskStore::from_json(&json).await.unwrap();

    let coordinator = coordinator(Arc::new(restored));
    assert_eq!(coordinator.topological_order().await.unwrap(), ids(&["A", "B", "C"]));
}

/// Test: Diamond ordering is deterministic
#[test]
fn test_diamond_order_is_deterministic() {
    let tasks = vec![
        Task::new("d", "join").with_dependencies(["b", "c"]),
        Task::new("c", "right").with_dependencies(["a"]),
        Task::new("b", "left").with_dependencies(["a"]),
        Task::new("a", "root"),
    ];
    let snapshot = TaskSnapshot::from_tasks(&tasks).unwrap();
    let graph = DependencyGraph::build(&snapshot);

    assert_eq!(graph.topological_sort().unwrap(), ids(&["a", "b", "c", "d"]));
    assert_eq!(graph.dependents(&TaskId::from("a")), ids(&["b", "c"]));
    assert!(graph.detect_cycles().is_empty());
}
