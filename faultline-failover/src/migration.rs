use std::sync::Arc;

use faultline_grid::{partition_of, GridHandle, NodeId, PartitionId};

use crate::assignment::NodeAssignments;
use crate::quorum::QuorumGate;
use crate::registry::TaskRegistry;
use crate::trigger::TaskTriggerService;

/// Reacts to partition-ownership handoffs.
///
/// Both sub-events consult live state only: migration-started and
/// migration-completed for the same partition may be separated by an
/// arbitrary delay and by other topology events.
pub struct MigrationHandler {
    grid: GridHandle,
    registry: TaskRegistry,
    assignments: NodeAssignments,
    trigger: Arc<TaskTriggerService>,
    gate: QuorumGate,
}

impl MigrationHandler {
    pub(crate) fn new(
        grid: GridHandle,
        registry: TaskRegistry,
        assignments: NodeAssignments,
        trigger: Arc<TaskTriggerService>,
        gate: QuorumGate,
    ) -> Self {
        Self {
            grid,
            registry,
            assignments,
            trigger,
            gate,
        }
    }

    /// The local node is about to lose authority over the partition's keys.
    ///
    /// Already-submitted work keeps executing; only bookkeeping moves. When
    /// quorum is absent, locally armed schedules for the partition's tasks
    /// are cancelled defensively so a minority partition cannot keep firing
    /// them.
    pub async fn on_migration_started(
        &self,
        partition: PartitionId,
        old_owner: Option<NodeId>,
        new_owner: NodeId,
    ) {
        if old_owner != Some(self.grid.node_id()) {
            return;
        }
        trace!(
            partition,
            new_owner,
            "Partition migration away from this node started.",
        );

        if self.gate.is_present() {
            return;
        }

        for task_id in self.local_assignments_in(partition) {
            if let Err(error) = self.trigger.clean_up_for_migration(&task_id).await {
                error!(
                    error = ?error,
                    task_id,
                    partition,
                    "Schedule cancellation ahead of the handoff failed.",
                );
            }
        }
    }

    /// Ownership of the partition has moved.
    ///
    /// Adoption only happens when the previous owner is no longer a member,
    /// i.e. the migration was caused by a node dying: the new owner then
    /// re-triggers every registry entry of the partition it has not already
    /// started. On a live handoff the previous owner keeps executing and the
    /// new node inherits nothing; the old owner only drops its assignment
    /// bookkeeping, deferring authority to the new owner.
    pub async fn on_migration_completed(
        &self,
        partition: PartitionId,
        old_owner: Option<NodeId>,
        new_owner: NodeId,
    ) {
        let local_node = self.grid.node_id();

        if new_owner == local_node && old_owner.is_none() {
            if !self.gate.is_present() {
                debug!(
                    partition,
                    "Quorum absent, not adopting the migrated partition's tasks.",
                );
                return;
            }

            let mine = self.assignments.assignments_for(local_node);
            for task_id in self.registry.local_keys_in_partition(partition) {
                if mine.contains(&task_id) {
                    debug!(task_id, "Task already re-triggered on this node.");
                    continue;
                }

                info!(task_id, partition, "Adopting task after partition migration.");
                if let Err(error) = self.trigger.trigger(&task_id).await {
                    error!(
                        error = ?error,
                        task_id,
                        "Failed to adopt migrated task, continuing with the rest.",
                    );
                }
            }
        } else if old_owner == Some(local_node) {
            for task_id in self.local_assignments_in(partition) {
                self.assignments.clear(local_node, &task_id);
            }
        }

        trace!(partition, new_owner, "Partition migration completed.");
    }

    /// The local node's assignment-set entries belonging to one partition.
    fn local_assignments_in(&self, partition: PartitionId) -> Vec<String> {
        self.assignments
            .assignments_for(self.grid.node_id())
            .into_iter()
            .filter(|task_id| partition_of(task_id) == partition)
            .collect()
    }
}
