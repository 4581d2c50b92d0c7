use std::sync::Arc;

use faultline_grid::{GridHandle, MapEvent};

use crate::assignment::NodeAssignments;
use crate::quorum::QuorumGate;
use crate::registry::TaskRegistry;
use crate::storage::TaskStore;
use crate::trigger::TaskTriggerService;
use crate::TaskStatus;

/// Bridges registry map events to the trigger/cleanup flow.
///
/// The grid delivers entry events only on the node which owns the key, so
/// everything here already runs with partition authority.
pub struct RegistryListener {
    grid: GridHandle,
    registry: TaskRegistry,
    assignments: NodeAssignments,
    tasks: Arc<dyn TaskStore>,
    trigger: Arc<TaskTriggerService>,
    gate: QuorumGate,
}

impl RegistryListener {
    pub(crate) fn new(
        grid: GridHandle,
        registry: TaskRegistry,
        assignments: NodeAssignments,
        tasks: Arc<dyn TaskStore>,
        trigger: Arc<TaskTriggerService>,
        gate: QuorumGate,
    ) -> Self {
        Self {
            grid,
            registry,
            assignments,
            tasks,
            trigger,
            gate,
        }
    }

    pub async fn on_map_event(&self, event: MapEvent<TaskStatus>) {
        match event {
            MapEvent::EntryAdded { key, .. } => self.on_entry_added(&key).await,
            MapEvent::EntryUpdated { key, value } => {
                self.on_entry_updated(&key, value).await
            },
            MapEvent::EntryRemoved { key, .. } => {
                debug!(task_id = %key, "Task removed from the cluster registry.");
                self.assignments.clear(self.grid.node_id(), &key);
            },
            MapEvent::PartitionLost { partition } => {
                // Potential registry data loss; surfaced for alerting only.
                error!(partition, "Registry partition lost.");
            },
        }
    }

    async fn on_entry_added(&self, task_id: &str) {
        if !self.gate.is_present() {
            debug!(task_id, "Quorum absent, not starting newly registered task.");
            return;
        }

        info!(
            task_id,
            node_id = self.grid.node_id(),
            "Task assigned to this member.",
        );
        if let Err(error) = self.trigger.trigger(task_id).await {
            error!(error = ?error, task_id, "Failed to start newly registered task.");
        }
    }

    /// Consistency check on status updates: a terminal record whose registry
    /// entry still lingers is cleaned up here. No other side effects.
    async fn on_entry_updated(&self, task_id: &str, status: TaskStatus) {
        debug!(task_id, status = ?status, "Registry entry updated.");

        match self.tasks.get_task(task_id).await {
            Ok(Some(record)) if record.status.is_terminal() => {
                debug!(
                    task_id,
                    status = ?record.status,
                    "Task finished execution, removing stale registry entry.",
                );
                self.registry.remove(task_id);
            },
            Ok(_) => {},
            Err(error) => {
                error!(error = ?error, task_id, "Task lookup failed during update check.");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use faultline_grid::{Grid, GridMember};

    use super::*;
    use crate::test_utils::TestBench;

    fn member(id: u64) -> GridMember {
        GridMember::new(id, test_helper::get_unused_addr())
    }

    #[tokio::test]
    async fn test_entry_added_triggers_assignable_work() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;
        bench.gate.set(true);

        bench.insert_task("t1", TaskStatus::InProgress, false);
        bench
            .listener
            .on_map_event(MapEvent::EntryAdded {
                key: "t1".to_string(),
                value: TaskStatus::InProgress,
            })
            .await;

        assert_eq!(bench.runner.submitted(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_entry_added_gated_on_quorum() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;

        bench.insert_task("t1", TaskStatus::InProgress, false);
        bench
            .listener
            .on_map_event(MapEvent::EntryAdded {
                key: "t1".to_string(),
                value: TaskStatus::InProgress,
            })
            .await;

        assert!(bench.runner.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_entry_updated_cleans_up_terminal_records() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;
        bench.gate.set(true);

        bench.insert_task("t1", TaskStatus::Completed, false);
        bench.registry.add("t1", TaskStatus::InProgress);

        bench
            .listener
            .on_map_event(MapEvent::EntryUpdated {
                key: "t1".to_string(),
                value: TaskStatus::Completed,
            })
            .await;

        assert!(!bench.registry.contains("t1"));
        assert_eq!(bench.resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_entry_removed_clears_local_assignment() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;
        bench.assignments.record(1, "t1");

        bench
            .listener
            .on_map_event(MapEvent::EntryRemoved {
                key: "t1".to_string(),
                value: Some(TaskStatus::Completed),
            })
            .await;

        assert!(!bench.assignments.is_assigned(1, "t1"));
    }
}
