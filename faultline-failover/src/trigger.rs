use std::sync::Arc;

use faultline_grid::GridHandle;

use crate::assignment::NodeAssignments;
use crate::error::FailoverError;
use crate::registry::TaskRegistry;
use crate::storage::{ExecutionResolver, ScheduleStore, TaskRunner, TaskStore};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// What a [`TaskTriggerService::trigger`] call ended up doing.
pub enum TriggerOutcome {
    /// The task was resolved and submitted to the asynchronous runner.
    Submitted,
    /// Nothing to execute: the record is gone, terminal, or its schedule no
    /// longer active. Stale registry tracking was cleaned up where needed.
    Skipped,
}

/// The single place a task id is resolved into an executable unit and
/// started on the local node.
///
/// Every failover path funnels through [`TaskTriggerService::trigger`]; the
/// assignment record written on successful submission is what makes repeat
/// attempts observable, and therefore skippable, by later handlers.
pub struct TaskTriggerService {
    grid: GridHandle,
    registry: TaskRegistry,
    assignments: NodeAssignments,
    tasks: Arc<dyn TaskStore>,
    schedules: Arc<dyn ScheduleStore>,
    resolver: Arc<dyn ExecutionResolver>,
    runner: Arc<dyn TaskRunner>,
}

impl TaskTriggerService {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        grid: GridHandle,
        registry: TaskRegistry,
        assignments: NodeAssignments,
        tasks: Arc<dyn TaskStore>,
        schedules: Arc<dyn ScheduleStore>,
        resolver: Arc<dyn ExecutionResolver>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            grid,
            registry,
            assignments,
            tasks,
            schedules,
            resolver,
            runner,
        }
    }

    /// Resumes or starts the given task on the local node.
    ///
    /// A missing record, a terminal status or a dead schedule are all
    /// "nothing to do" rather than errors; the latter two also remove the
    /// stale registry entry.
    pub async fn trigger(&self, task_id: &str) -> Result<TriggerOutcome, FailoverError> {
        debug!(task_id, "Resuming task on the local node.");

        let record = self
            .tasks
            .get_task(task_id)
            .await
            .map_err(FailoverError::Store)?;

        let record = match record {
            Some(record) => record,
            None => {
                debug!(task_id, "No durable record found, nothing to resume.");
                return Ok(TriggerOutcome::Skipped);
            },
        };

        if record.status.is_terminal() {
            debug!(
                task_id,
                status = ?record.status,
                "Task finished execution, removing it from the cluster registry.",
            );
            self.registry.remove(task_id);
            return Ok(TriggerOutcome::Skipped);
        }

        if record.scheduled {
            let schedule = self
                .schedules
                .get_schedule(task_id)
                .await
                .map_err(FailoverError::Store)?;

            let active = schedule
                .map(|spec| spec.status.is_active())
                .unwrap_or(false);
            if !active {
                debug!(
                    task_id,
                    "Schedule no longer active, removing the task from the cluster registry.",
                );
                self.registry.remove(task_id);
                return Ok(TriggerOutcome::Skipped);
            }
        }

        let plan = self
            .resolver
            .resolve(&record)
            .await
            .map_err(FailoverError::Setup)?;
        self.runner
            .submit(plan)
            .await
            .map_err(FailoverError::Setup)?;

        info!(task_id, node_id = self.grid.node_id(), "Submitted task for execution.");

        // Best effort: a missing assignment record only means failover for
        // this task falls back to registry-based discovery.
        self.assignments.record(self.grid.node_id(), task_id);

        Ok(TriggerOutcome::Submitted)
    }

    /// Best-effort local cleanup ahead of losing ownership of a partition:
    /// cancels the locally armed schedule, leaving the durable record and
    /// any in-flight execution alone.
    pub async fn clean_up_for_migration(
        &self,
        task_id: &str,
    ) -> Result<(), FailoverError> {
        debug!(task_id, "Cancelling locally armed schedule ahead of ownership handoff.");
        self.runner
            .cancel_local_schedule(task_id)
            .await
            .map_err(FailoverError::Setup)
    }

    /// Explicit assignment-tracker eviction for the local node.
    pub fn remove_from_node_cache(&self, task_id: &str) {
        self.assignments.clear(self.grid.node_id(), task_id);
    }
}
