use async_trait::async_trait;

use crate::model::{
    ClusterView,
    ExecutionPlan,
    ResourceKind,
    ScheduleSpec,
    TaskRecord,
};

#[async_trait]
/// Durable storage of [`TaskRecord`]s.
pub trait TaskStore: Send + Sync + 'static {
    /// Loads the record for the given task id, if one exists.
    async fn get_task(&self, task_id: &str) -> anyhow::Result<Option<TaskRecord>>;

    /// All persisted tasks which are still in flight.
    ///
    /// Used when quorum is re-established to recover work the cluster may
    /// have dropped while partitioned.
    async fn in_progress_tasks(&self) -> anyhow::Result<Vec<TaskRecord>>;
}

#[async_trait]
/// Durable storage of schedule specifications.
pub trait ScheduleStore: Send + Sync + 'static {
    /// Loads the schedule attached to the given task, if one exists.
    async fn get_schedule(&self, task_id: &str)
        -> anyhow::Result<Option<ScheduleSpec>>;

    /// All schedules which should still drive executions.
    async fn active_schedules(&self) -> anyhow::Result<Vec<ScheduleSpec>>;
}

#[async_trait]
/// Resolves a task record into an executable unit.
///
/// This is the seam to the execution-strategy layer: endpoint lookup,
/// credential resolution and strategy construction all live behind it.
pub trait ExecutionResolver: Send + Sync + 'static {
    async fn resolve(&self, record: &TaskRecord) -> anyhow::Result<ExecutionPlan>;
}

#[async_trait]
/// The asynchronous task runner the coordination layer submits work to.
///
/// Submission returns once the work is enqueued; actual fault execution
/// happens on a worker pool outside this subsystem.
pub trait TaskRunner: Send + Sync + 'static {
    async fn submit(&self, plan: ExecutionPlan) -> anyhow::Result<()>;

    /// Cancels the locally armed schedule for one task, leaving the durable
    /// record untouched.
    async fn cancel_local_schedule(&self, task_id: &str) -> anyhow::Result<()>;

    /// Cancels every locally armed recurring/future schedule.
    async fn cancel_all_local_schedules(&self) -> anyhow::Result<()>;
}

#[async_trait]
/// The contract a cache-backed service implements to participate in
/// multi-node resync broadcasts.
pub trait ResyncHandler: Send + Sync + 'static {
    fn kind(&self) -> ResourceKind;

    /// Refreshes the local in-memory cache for the given object ids.
    async fn resync(&self, ids: &[String]) -> anyhow::Result<()>;
}

#[async_trait]
/// Durable storage of the [`ClusterView`] topology record.
pub trait ClusterViewStore: Send + Sync + 'static {
    async fn load(&self) -> anyhow::Result<Option<ClusterView>>;
    async fn persist(&self, view: &ClusterView) -> anyhow::Result<()>;
}
