use std::sync::Arc;

use faultline_grid::GridHandle;

use crate::quorum::QuorumGate;
use crate::registry::TaskRegistry;
use crate::storage::{ScheduleStore, TaskRunner, TaskStore};
use crate::TaskStatus;

/// Recovers application state around quorum transitions.
///
/// When quorum is re-established the oldest live member re-registers every
/// active schedule and in-progress task in the registry; the resulting
/// entry-added events re-trigger each task on whichever node owns its
/// partition. When quorum is lost every locally armed schedule is cancelled
/// so a minority partition cannot make independent scheduling decisions.
pub struct Bootstrapper {
    grid: GridHandle,
    registry: TaskRegistry,
    tasks: Arc<dyn TaskStore>,
    schedules: Arc<dyn ScheduleStore>,
    runner: Arc<dyn TaskRunner>,
    gate: QuorumGate,
}

impl Bootstrapper {
    pub(crate) fn new(
        grid: GridHandle,
        registry: TaskRegistry,
        tasks: Arc<dyn TaskStore>,
        schedules: Arc<dyn ScheduleStore>,
        runner: Arc<dyn TaskRunner>,
        gate: QuorumGate,
    ) -> Self {
        Self {
            grid,
            registry,
            tasks,
            schedules,
            runner,
            gate,
        }
    }

    /// Reloads persisted, non-terminal work and re-arms it cluster-wide.
    ///
    /// Runs only on the oldest live member, and only while quorum holds;
    /// registry inserts are insert-if-absent so entries another node already
    /// owns are left alone.
    pub async fn initialize_application_tasks(&self) {
        if !self.gate.is_present() {
            debug!("Quorum absent, skipping application task recovery.");
            return;
        }
        if !self.is_oldest_member() {
            debug!("Not the oldest cluster member, deferring task recovery to it.");
            return;
        }

        info!("Re-arming persisted schedules and in-progress tasks.");

        match self.schedules.active_schedules().await {
            Ok(specs) => {
                for spec in specs {
                    self.registry.add(&spec.id, TaskStatus::Scheduled);
                }
            },
            Err(error) => {
                error!(error = ?error, "Failed to load active schedules for recovery.");
            },
        }

        match self.tasks.in_progress_tasks().await {
            Ok(records) => {
                for record in records {
                    self.registry.add(&record.id, record.status);
                }
            },
            Err(error) => {
                error!(error = ?error, "Failed to load in-progress tasks for recovery.");
            },
        }
    }

    /// Cancels every locally armed recurring/future schedule. Durable task
    /// records are never touched here.
    pub async fn remove_all_schedules_from_current_node(&self) {
        if let Err(error) = self.runner.cancel_all_local_schedules().await {
            error!(error = ?error, "Failed to cancel locally armed schedules.");
        }
    }

    fn is_oldest_member(&self) -> bool {
        self.grid
            .members()
            .first()
            .map(|member| member.node_id == self.grid.node_id())
            .unwrap_or(false)
    }
}
