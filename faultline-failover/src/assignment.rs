use std::collections::HashSet;

use faultline_grid::{GridMap, NodeId};

use crate::model::TaskId;

/// The grid map recording which tasks each node believes it is running.
pub(crate) const NODE_TASKS_MAP: &str = "node-tasks";

#[derive(Clone)]
/// The per-node set of in-flight task ids.
///
/// This tracker is the idempotency guard of the whole coordinator: before a
/// handler resumes a task it discovered through a topology event, it checks
/// the task is not already recorded against the local node. Without the
/// check, noisy, rapidly-repeating topology events could start duplicate
/// executors.
pub struct NodeAssignments {
    map: GridMap<HashSet<TaskId>>,
}

impl NodeAssignments {
    pub(crate) fn new(map: GridMap<HashSet<TaskId>>) -> Self {
        Self { map }
    }

    /// Adds the task to the node's assignment set, creating the set if
    /// absent.
    pub fn record(&self, node_id: NodeId, task_id: &str) {
        let key = node_key(node_id);
        let mut tasks = self.map.get(&key).unwrap_or_default();
        tasks.insert(task_id.to_string());
        self.map.put(&key, tasks);
    }

    /// Removes the task from the node's assignment set.
    pub fn clear(&self, node_id: NodeId, task_id: &str) {
        let key = node_key(node_id);
        if let Some(mut tasks) = self.map.get(&key) {
            if tasks.remove(task_id) {
                self.map.put(&key, tasks);
            }
        }
    }

    /// The tasks the given node believes it is actively running.
    ///
    /// Read-only; failover decisions never mutate through this view.
    pub fn assignments_for(&self, node_id: NodeId) -> HashSet<TaskId> {
        self.map.get(&node_key(node_id)).unwrap_or_default()
    }

    /// Whether the node already recorded an attempt for the task.
    pub fn is_assigned(&self, node_id: NodeId, task_id: &str) -> bool {
        self.map
            .get(&node_key(node_id))
            .map(|tasks| tasks.contains(task_id))
            .unwrap_or(false)
    }
}

fn node_key(node_id: NodeId) -> String {
    node_id.to_string()
}
