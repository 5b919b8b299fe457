//! Dependency resolution over a point-in-time task snapshot.
//!
//! A [`TaskSnapshot`] captures each task's status and declared dependencies.
//! [`DependencyGraph`] is built fresh from a snapshot for every resolution
//! and is never persisted. Edges point from a dependency to its dependent
//! (the dependency must complete first). References to tasks absent from
//! the snapshot become [`GraphNode::Missing`] nodes instead of being dropped.
//!
//! All iteration is in ascending task-id order so cycle reports and
//! topological orders are reproducible for identical input.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

/// Status and dependencies of one task inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub status: TaskStatus,
    pub depends_on: BTreeSet<TaskId>,
}

/// Point-in-time view of a project's tasks, keyed by task id.
///
/// The caller is responsible for consistency; the resolver never fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    entries: BTreeMap<TaskId, SnapshotEntry>,
}

impl TaskSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from task records.
    ///
    /// # Errors
    /// Returns [`Error::SelfDependency`] if any task lists itself.
    pub fn from_tasks<'a, I>(tasks: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut snapshot = Self::new();
        for task in tasks {
            snapshot.insert(task.id.clone(), task.status, task.depends_on.clone())?;
        }
        Ok(snapshot)
    }

    /// Add or replace one task's entry.
    ///
    /// # Errors
    /// Returns [`Error::SelfDependency`] if `depends_on` contains `id`.
    pub fn insert(
        &mut self,
        id: TaskId,
        status: TaskStatus,
        depends_on: BTreeSet<TaskId>,
    ) -> Result<()> {
        if depends_on.contains(&id) {
            return Err(Error::SelfDependency { task_id: id });
        }
        self.entries.insert(id, SnapshotEntry { status, depends_on });
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<&SnapshotEntry> {
        self.entries.get(id)
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.entries.get(id).map(|entry| entry.status)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Task ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.entries.keys()
    }

    /// Dependencies of `id` that are not yet satisfied.
    ///
    /// A dependency is satisfied only when it exists in the snapshot with
    /// status `Completed`. Unknown ids never satisfy. Returns an empty list
    /// for ids absent from the snapshot.
    pub fn unmet_dependencies(&self, id: &TaskId) -> Vec<UnmetDependency> {
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        entry
            .depends_on
            .iter()
            .filter_map(|dep| match self.entries.get(dep) {
                None => Some(UnmetDependency::Missing {
                    task_id: dep.clone(),
                }),
                Some(dep_entry) if dep_entry.status != TaskStatus::Completed => {
                    Some(UnmetDependency::Incomplete {
                        task_id: dep.clone(),
                        status: dep_entry.status,
                    })
                }
                Some(_) => None,
            })
            .collect()
    }

    /// Whether `id` is a `Backlog` task whose dependencies are all completed.
    pub fn is_ready(&self, id: &TaskId) -> bool {
        self.status(id) == Some(TaskStatus::Backlog) && self.unmet_dependencies(id).is_empty()
    }

    /// All ready tasks in ascending id order.
    ///
    /// A task is ready iff it is in `Backlog` and every dependency maps to a
    /// `Completed` task in this snapshot.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.entries
            .keys()
            .filter(|id| self.is_ready(id))
            .cloned()
            .collect()
    }

    /// `Backlog` tasks held back by at least one unmet dependency, with the
    /// dependencies holding them back.
    ///
    /// Tasks an agent already holds and completed tasks are neither ready
    /// nor blocked.
    pub fn blocked_tasks(&self) -> Vec<BlockedTask> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.status == TaskStatus::Backlog)
            .filter_map(|(id, _)| {
                let unmet = self.unmet_dependencies(id);
                if unmet.is_empty() {
                    None
                } else {
                    Some(BlockedTask {
                        task_id: id.clone(),
                        unmet,
                    })
                }
            })
            .collect()
    }
}

/// Why a dependency is not satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum UnmetDependency {
    /// The dependency id does not exist in the snapshot.
    Missing { task_id: TaskId },
    /// The dependency exists but has not completed.
    Incomplete { task_id: TaskId, status: TaskStatus },
}

impl UnmetDependency {
    pub fn task_id(&self) -> &TaskId {
        match self {
            UnmetDependency::Missing { task_id } => task_id,
            UnmetDependency::Incomplete { task_id, .. } => task_id,
        }
    }
}

impl std::fmt::Display for UnmetDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmetDependency::Missing { task_id } => write!(f, "{} (unknown task)", task_id),
            UnmetDependency::Incomplete { task_id, status } => {
                write!(f, "{} ({})", task_id, status)
            }
        }
    }
}

/// A backlog task that cannot start yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: TaskId,
    pub unmet: Vec<UnmetDependency>,
}

impl BlockedTask {
    pub fn unmet_ids(&self) -> Vec<TaskId> {
        self.unmet.iter().map(|dep| dep.task_id().clone()).collect()
    }
}

/// Node of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphNode {
    /// A task present in the snapshot.
    Task(TaskId),
    /// A referenced id absent from the snapshot.
    Missing(TaskId),
}

impl GraphNode {
    pub fn id(&self) -> &TaskId {
        match self {
            GraphNode::Task(id) | GraphNode::Missing(id) => id,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, GraphNode::Missing(_))
    }
}

/// Derived dependency graph for one resolution call.
pub struct DependencyGraph {
    /// Edges run dependency -> dependent.
    graph: DiGraph<GraphNode, ()>,
    /// Index mapping from TaskId to NodeIndex, ordered by id.
    index: BTreeMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph for a snapshot.
    pub fn build(snapshot: &TaskSnapshot) -> Self {
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();

        for id in snapshot.ids() {
            let node = graph.add_node(GraphNode::Task(id.clone()));
            index.insert(id.clone(), node);
        }

        for (id, entry) in &snapshot.entries {
            let dependent = index[id];
            for dep in &entry.depends_on {
                let dependency = match index.get(dep) {
                    Some(&node) => node,
                    None => {
                        let node = graph.add_node(GraphNode::Missing(dep.clone()));
                        index.insert(dep.clone(), node);
                        node
                    }
                };
                graph.add_edge(dependency, dependent, ());
            }
        }

        Self { graph, index }
    }

    /// Number of snapshot tasks (missing nodes excluded).
    pub fn task_count(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|node| !node.is_missing())
            .count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &TaskId) -> Option<&GraphNode> {
        self.index
            .get(id)
            .and_then(|&node| self.graph.node_weight(node))
    }

    /// Ids `id` depends on, ascending.
    pub fn dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, Direction::Incoming)
    }

    /// Ids that depend on `id`, ascending.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, Direction::Outgoing)
    }

    /// Referenced ids that are absent from the snapshot, ascending.
    pub fn missing_dependencies(&self) -> Vec<TaskId> {
        self.index
            .iter()
            .filter(|(_, &node)| self.graph[node].is_missing())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn neighbor_ids(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<TaskId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].id().clone())
            .collect();
        ids.sort();
        ids
    }

    fn sorted_neighbors(&self, node: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(node, direction).collect();
        neighbors.sort_by(|a, b| self.graph[*a].id().cmp(self.graph[*b].id()));
        neighbors
    }

    /// Find dependency cycles by depth-first search.
    ///
    /// Walks from each node (ascending id) along "depends on" edges, keeping
    /// an on-stack set and a global visited set. Reaching a node that is on
    /// the current stack reports the stack from that node onward, closed by
    /// the repeated node: `X depends on Y depends on X` yields `[X, Y, X]`.
    pub fn detect_cycles(&self) -> Vec<Vec<TaskId>> {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();
        let mut path: Vec<NodeIndex> = Vec::new();
        let mut cycles = Vec::new();

        for &start in self.index.values() {
            if !visited.insert(start) {
                continue;
            }
            on_stack.insert(start);
            path.push(start);
            let mut frames = vec![self.sorted_neighbors(start, Direction::Incoming).into_iter()];

            loop {
                let step = match frames.last_mut() {
                    Some(neighbors) => neighbors.next(),
                    None => break,
                };
                match step {
                    Some(next) if on_stack.contains(&next) => {
                        if let Some(pos) = path.iter().position(|n| *n == next) {
                            let mut cycle: Vec<TaskId> = path[pos..]
                                .iter()
                                .map(|n| self.graph[*n].id().clone())
                                .collect();
                            cycle.push(self.graph[next].id().clone());
                            cycles.push(cycle);
                        }
                    }
                    Some(next) => {
                        if visited.insert(next) {
                            on_stack.insert(next);
                            path.push(next);
                            frames.push(self.sorted_neighbors(next, Direction::Incoming).into_iter());
                        }
                    }
                    None => {
                        frames.pop();
                        if let Some(done) = path.pop() {
                            on_stack.remove(&done);
                        }
                    }
                }
            }
        }

        cycles
    }

    /// Order tasks so every dependency precedes its dependents.
    ///
    /// Kahn's algorithm; among nodes with no remaining dependencies the
    /// smallest id goes first. Missing nodes take part in the ordering but
    /// are left out of the result.
    ///
    /// # Errors
    /// Returns [`Error::CyclicDependency`] carrying [`detect_cycles`] output
    /// and the tasks that could not be ordered.
    ///
    /// [`detect_cycles`]: DependencyGraph::detect_cycles
    pub fn topological_sort(&self) -> Result<Vec<TaskId>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|node| {
                let degree = self
                    .graph
                    .neighbors_directed(node, Direction::Incoming)
                    .count();
                (node, degree)
            })
            .collect();

        let mut queue: BinaryHeap<Reverse<(&TaskId, NodeIndex)>> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&node, _)| Reverse((self.graph[node].id(), node)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        let mut consumed = 0usize;

        while let Some(Reverse((id, node))) = queue.pop() {
            consumed += 1;
            if !self.graph[node].is_missing() {
                order.push(id.clone());
            }
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(Reverse((self.graph[dependent].id(), dependent)));
                    }
                }
            }
        }

        if consumed < self.graph.node_count() {
            let mut unresolved: Vec<TaskId> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(node, _)| self.graph[node].id().clone())
                .collect();
            unresolved.sort();
            return Err(Error::CyclicDependency {
                cycles: self.detect_cycles(),
                unresolved,
            });
        }

        Ok(order)
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.edge_count())
            .finish()
    }
}
