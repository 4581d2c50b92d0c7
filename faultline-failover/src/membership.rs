use std::sync::Arc;

use faultline_grid::{partition_of, GridHandle, GridMember};

use crate::assignment::NodeAssignments;
use crate::cluster::ClusterViewService;
use crate::quorum::QuorumGate;
use crate::trigger::TaskTriggerService;

/// Reacts to cluster membership changes.
///
/// A joining node never inherits existing work; a leaving node's assignment
/// set is scanned and every orphaned task whose partition the local node now
/// owns is resumed here. Other nodes run the same scan independently; the
/// ownership check is what keeps the number of resumers at one.
pub struct MembershipHandler {
    grid: GridHandle,
    assignments: NodeAssignments,
    trigger: Arc<TaskTriggerService>,
    gate: QuorumGate,
    view: ClusterViewService,
}

impl MembershipHandler {
    pub(crate) fn new(
        grid: GridHandle,
        assignments: NodeAssignments,
        trigger: Arc<TaskTriggerService>,
        gate: QuorumGate,
        view: ClusterViewService,
    ) -> Self {
        Self {
            grid,
            assignments,
            trigger,
            gate,
            view,
        }
    }

    pub async fn on_member_added(&self, member: &GridMember) {
        debug!(%member, "Member joined the cluster.");
        if let Err(error) = self.view.member_added(member).await {
            error!(error = ?error, %member, "Failed to persist cluster view after join.");
        }
    }

    /// Resumes the dead node's orphaned tasks on the local node where the
    /// local node owns their partitions, then records the topology change.
    ///
    /// One bad task never blocks failover for the rest of the set, and the
    /// cluster view is persisted regardless of how the scan went.
    pub async fn on_member_removed(&self, member: &GridMember, remaining: &[GridMember]) {
        debug!(%member, "Member removed event, checking for orphaned tasks.");

        let orphaned = self.assignments.assignments_for(member.node_id);
        if orphaned.is_empty() {
            debug!(%member, "Departed member had no in-flight tasks.");
        } else if !self.gate.is_present() {
            debug!(
                %member,
                num_orphaned = orphaned.len(),
                "Quorum absent, leaving orphaned tasks for recovery after quorum returns.",
            );
        } else {
            info!(
                %member,
                num_orphaned = orphaned.len(),
                "Re-triggering tasks orphaned by the departed member.",
            );

            let local_node = self.grid.node_id();
            let mine = self.assignments.assignments_for(local_node);
            for task_id in orphaned {
                let owner = self.grid.partition_owner(partition_of(&task_id));
                if owner != Some(local_node) {
                    continue;
                }
                if mine.contains(&task_id) {
                    debug!(task_id, "Task already re-triggered on this node.");
                    continue;
                }

                if let Err(error) = self.trigger.trigger(&task_id).await {
                    error!(
                        error = ?error,
                        task_id,
                        "Failed to re-trigger orphaned task, continuing with the rest.",
                    );
                }
            }
        }

        if let Err(error) = self.view.member_removed(member, remaining).await {
            error!(error = ?error, %member, "Failed to persist cluster view after leave.");
        }
    }
}

#[cfg(test)]
mod tests {
    use faultline_grid::{Grid, GridMember};

    use super::*;
    use crate::test_utils::TestBench;
    use crate::TaskStatus;

    fn member(id: u64) -> GridMember {
        GridMember::new(id, test_helper::get_unused_addr())
    }

    #[tokio::test]
    async fn test_member_removed_with_empty_set_only_persists_view() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;
        bench.gate.set(true);

        let departed = member(2);
        bench
            .membership
            .on_member_removed(&departed, &[bench.me()])
            .await;

        assert!(bench.runner.submitted().is_empty());
        assert_eq!(bench.views.persist_calls(), 1);
    }

    #[tokio::test]
    async fn test_member_removed_resumes_owned_tasks_only() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;
        bench.gate.set(true);

        // The departed node claimed t1; the surviving node owns every
        // partition, so the resume must land here exactly once.
        bench.insert_task("t1", TaskStatus::InProgress, false);
        bench.assignments.record(2, "t1");

        let departed = member(2);
        bench
            .membership
            .on_member_removed(&departed, &[bench.me()])
            .await;

        assert_eq!(bench.runner.submitted(), vec!["t1".to_string()]);
        assert!(bench.assignments.is_assigned(1, "t1"));
    }

    #[tokio::test]
    async fn test_member_removed_skips_already_assigned_tasks() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;
        bench.gate.set(true);

        bench.insert_task("t1", TaskStatus::InProgress, false);
        bench.assignments.record(2, "t1");
        bench.assignments.record(1, "t1");

        bench
            .membership
            .on_member_removed(&member(2), &[bench.me()])
            .await;

        assert!(bench.runner.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_member_removed_without_quorum_triggers_nothing() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;

        bench.insert_task("t1", TaskStatus::InProgress, false);
        bench.assignments.record(2, "t1");

        bench
            .membership
            .on_member_removed(&member(2), &[bench.me()])
            .await;

        assert!(bench.runner.submitted().is_empty());
        // The topology audit still happens.
        assert_eq!(bench.views.persist_calls(), 1);
    }

    #[tokio::test]
    async fn test_one_bad_task_never_blocks_the_batch() {
        let grid = Grid::new(1);
        let bench = TestBench::join(&grid, member(1)).await;
        bench.gate.set(true);

        bench.insert_task("t-bad", TaskStatus::InProgress, false);
        bench.insert_task("t-good", TaskStatus::InProgress, false);
        bench.resolver.fail_for("t-bad");
        bench.assignments.record(2, "t-bad");
        bench.assignments.record(2, "t-good");

        bench
            .membership
            .on_member_removed(&member(2), &[bench.me()])
            .await;

        assert_eq!(bench.runner.submitted(), vec!["t-good".to_string()]);
    }
}
